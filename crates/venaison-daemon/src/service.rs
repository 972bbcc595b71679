//! The custody service: every core operation with permission checks and
//! optimistic concurrency.
//!
//! The service is synchronous over the store; the protocol layer calls it
//! from per-connection tasks. Custody transitions are applied with a single
//! check-then-set on the fiche row version — a stale transition surfaces as
//! a conflict the client resolves by refetching, never as a merge. Field
//! merges from offline clients bypass the version check on purpose: they
//! are commutative at field granularity.
//!
//! Domain events are emitted after the owning write committed; a sink
//! failure never fails the commit path.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use venaison_core::carcass::{Carcass, CarcassError, CarcassStatus, resolve_status};
use venaison_core::catalog::ReasonCatalog;
use venaison_core::custody::{self, CustodyError, HandoffEpisode, TransferGate};
use venaison_core::dispatch::{DispatchError, DispatchPlan};
use venaison_core::events::{DomainEvent, EventSink};
use venaison_core::fiche::Fiche;
use venaison_core::identity::{OwnerRef, Principal, Role};
use venaison_core::keys::EntityKey;
use venaison_core::ledger::{CarcassMirror, Decision, InspectionRecord, LedgerError, check_close_out};
use venaison_core::merge::{
    FieldPatch, MergeError, allowed_carcass_fields, allowed_fiche_fields,
    allowed_inspection_fields, merge,
};

use crate::store::{Page, SqliteStore, StoreError};

// =============================================================================
// Error taxonomy
// =============================================================================

/// Coarse error classes the protocol maps to distinct codes, so clients
/// can branch on recovery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// User-correctable: a named precondition is missing.
    Validation,
    /// The actor is outside its role or custody window; not retryable.
    Permission,
    /// Another actor advanced the entity; refetch and review.
    Conflict,
    /// The referenced entity does not exist (or was deleted).
    NotFound,
    /// Storage or serialization failure; nothing the actor can fix.
    Internal,
}

/// Errors surfaced by service operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServiceError {
    /// Custody state machine rejection.
    #[error(transparent)]
    Custody(#[from] CustodyError),

    /// Inspection ledger rejection.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Dispatch plan rejection.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Carcass-level invariant violation.
    #[error(transparent)]
    Carcass(#[from] CarcassError),

    /// Field merge failure.
    #[error(transparent)]
    Merge(#[from] MergeError),

    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A fiche with this number already exists.
    #[error("fiche {numero} already exists")]
    FicheAlreadyExists {
        /// The duplicate number.
        numero: String,
    },

    /// A carcass with this bracelet already exists on the fiche.
    #[error("bracelet {bracelet} is already used on fiche {fiche_numero}")]
    BraceletTaken {
        /// The owning fiche.
        fiche_numero: String,
        /// The duplicate bracelet.
        bracelet: String,
    },

    /// The referenced fiche does not exist.
    #[error("fiche {numero} not found")]
    FicheNotFound {
        /// The missing number.
        numero: String,
    },

    /// The referenced carcass does not exist.
    #[error("carcass {bracelet} not found on fiche {fiche_numero}")]
    CarcassNotFound {
        /// The owning fiche.
        fiche_numero: String,
        /// The missing bracelet.
        bracelet: String,
    },

    /// The referenced episode does not exist.
    #[error("episode {episode_id} not found")]
    EpisodeNotFound {
        /// The missing episode.
        episode_id: String,
    },

    /// The referenced inspection record does not exist.
    #[error("inspection record {fiche_numero}/{bracelet}/{episode_id} not found")]
    InspectionNotFound {
        /// The owning fiche.
        fiche_numero: String,
        /// The bracelet.
        bracelet: String,
        /// The episode.
        episode_id: String,
    },

    /// The acting principal does not hold the role it claims.
    #[error("user {user_id} does not hold role {role}")]
    RoleNotHeld {
        /// The acting user.
        user_id: String,
        /// The missing role.
        role: Role,
    },

    /// The acting account is deactivated.
    #[error("account {user_id} is not activated")]
    NotActivated {
        /// The acting user.
        user_id: String,
    },

    /// The episode belongs to another actor.
    #[error("episode {episode_id} does not belong to user {user_id}")]
    NotEpisodeOwner {
        /// The episode.
        episode_id: String,
        /// The acting user.
        user_id: String,
    },

    /// Seizure reason not present in the controlled catalog.
    #[error("seizure reason not in catalog: {reason}")]
    UnknownSeizureReason {
        /// The rejected reason text.
        reason: String,
    },
}

impl ServiceError {
    /// The recovery class of this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Custody(err) => match err {
                CustodyError::NotCustodian { .. }
                | CustodyError::NotProposedRecipient { .. }
                | CustodyError::NotActivated { .. }
                | CustodyError::CloseRequiresSvi { .. } => ErrorCode::Permission,
                CustodyError::VersionConflict { .. } => ErrorCode::Conflict,
                _ => ErrorCode::Validation,
            },
            Self::Ledger(err) => match err {
                LedgerError::CarcassNotVisible { .. } => ErrorCode::Permission,
                _ => ErrorCode::Validation,
            },
            Self::Store(err) => match err {
                StoreError::VersionConflict { .. } => ErrorCode::Conflict,
                StoreError::FicheNotFound { .. } => ErrorCode::NotFound,
                StoreError::Database(_) | StoreError::Document(_) => ErrorCode::Internal,
            },
            Self::Dispatch(_)
            | Self::Carcass(_)
            | Self::Merge(_)
            | Self::FicheAlreadyExists { .. }
            | Self::BraceletTaken { .. }
            | Self::UnknownSeizureReason { .. } => ErrorCode::Validation,
            Self::FicheNotFound { .. }
            | Self::CarcassNotFound { .. }
            | Self::EpisodeNotFound { .. }
            | Self::InspectionNotFound { .. } => ErrorCode::NotFound,
            Self::RoleNotHeld { .. } | Self::NotActivated { .. } | Self::NotEpisodeOwner { .. } => {
                ErrorCode::Permission
            }
        }
    }
}

// =============================================================================
// Request payloads
// =============================================================================

/// Data for fiche creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFiche {
    /// Unique fiche number.
    pub numero: String,
    /// Date of the kill.
    pub kill_date: NaiveDate,
    /// Municipality of the kill.
    pub kill_commune: String,
    /// Time of kill of the first carcass.
    pub first_kill_time: Option<NaiveTime>,
    /// Time of evisceration of the last carcass.
    pub last_evisceration_time: Option<NaiveTime>,
}

/// Data for carcass creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCarcass {
    /// Owning fiche number.
    pub fiche_numero: String,
    /// Bracelet number, assigned before any biological data exists.
    pub bracelet: String,
    /// Species label.
    pub species: String,
    /// Head count when this is a small-game lot.
    pub lot_size: Option<u32>,
}

/// Examiner findings for one carcass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Findings {
    /// Abnormalities on the carcass.
    pub carcass_abnormalities: Vec<String>,
    /// Abnormalities on the viscera.
    pub viscera_abnormalities: Vec<String>,
    /// Explicit "no abnormality" sign-off.
    pub no_abnormality: bool,
}

/// Result of taking charge of a fiche or a dispatch group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeChargeOutcome {
    /// The fiche after the transition.
    pub fiche: Fiche,
    /// The episode opened for the confirming actor, when its role records
    /// decisions.
    pub episode: Option<HandoffEpisode>,
}

// =============================================================================
// Service
// =============================================================================

/// The authoritative custody service.
pub struct CustodyService {
    store: SqliteStore,
    catalog: Box<dyn ReasonCatalog>,
    sink: Arc<dyn EventSink>,
}

impl CustodyService {
    /// Builds a service over a store, catalog and event sink.
    #[must_use]
    pub fn new(
        store: SqliteStore,
        catalog: Box<dyn ReasonCatalog>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            catalog,
            sink,
        }
    }

    /// Read access to the store, for registry-style queries.
    #[must_use]
    pub const fn store(&self) -> &SqliteStore {
        &self.store
    }

    fn ensure_activated(principal: &Principal) -> Result<(), ServiceError> {
        if !principal.activated {
            return Err(ServiceError::NotActivated {
                user_id: principal.user_id.clone(),
            });
        }
        Ok(())
    }

    fn load_fiche(&self, numero: &str) -> Result<Fiche, ServiceError> {
        self.store
            .get_fiche(numero)?
            .ok_or_else(|| ServiceError::FicheNotFound {
                numero: numero.to_string(),
            })
    }

    fn load_carcass(&self, fiche_numero: &str, bracelet: &str) -> Result<Carcass, ServiceError> {
        self.store
            .get_carcass(fiche_numero, bracelet)?
            .ok_or_else(|| ServiceError::CarcassNotFound {
                fiche_numero: fiche_numero.to_string(),
                bracelet: bracelet.to_string(),
            })
    }

    fn load_episode(&self, episode_id: &str) -> Result<HandoffEpisode, ServiceError> {
        self.store
            .get_episode(episode_id)?
            .ok_or_else(|| ServiceError::EpisodeNotFound {
                episode_id: episode_id.to_string(),
            })
    }

    fn ensure_episode_owner(
        episode: &HandoffEpisode,
        principal: &Principal,
    ) -> Result<(), ServiceError> {
        let user_match = episode.user_id == principal.user_id;
        let entity_match = episode
            .entity_id
            .as_ref()
            .is_some_and(|e| principal.entity_ids.contains(e));
        if user_match || entity_match {
            Ok(())
        } else {
            Err(ServiceError::NotEpisodeOwner {
                episode_id: episode.id.clone(),
                user_id: principal.user_id.clone(),
            })
        }
    }

    fn ensure_custodian(fiche: &Fiche, principal: &Principal) -> Result<(), ServiceError> {
        if !principal.acts_for(&fiche.current_owner) {
            return Err(ServiceError::Custody(CustodyError::NotCustodian {
                numero: fiche.numero.clone(),
                user_id: principal.user_id.clone(),
            }));
        }
        Ok(())
    }

    /// The proposing custodian's most recent episode on this fiche, used
    /// by the propose gate for decision-recording roles.
    fn own_episode(
        &self,
        fiche: &Fiche,
        principal: &Principal,
    ) -> Result<Option<HandoffEpisode>, ServiceError> {
        let episodes = self.store.list_episodes(&fiche.numero)?;
        Ok(episodes.into_iter().find(|e| {
            e.role == fiche.current_owner.role
                && (e.user_id == principal.user_id
                    || e.entity_id
                        .as_ref()
                        .is_some_and(|id| principal.entity_ids.contains(id)))
        }))
    }

    // =========================================================================
    // Examiner operations
    // =========================================================================

    /// Creates a fiche under the examiner's custody.
    pub fn create_fiche(
        &self,
        principal: &Principal,
        new: NewFiche,
    ) -> Result<Fiche, ServiceError> {
        Self::ensure_activated(principal)?;
        if !principal.has_role(Role::ExaminateurInitial) {
            return Err(ServiceError::RoleNotHeld {
                user_id: principal.user_id.clone(),
                role: Role::ExaminateurInitial,
            });
        }
        if self.store.get_fiche(&new.numero)?.is_some() {
            return Err(ServiceError::FicheAlreadyExists { numero: new.numero });
        }
        let now = Utc::now();
        let mut fiche = Fiche::new(
            new.numero,
            new.kill_date,
            new.kill_commune,
            OwnerRef::for_user(Role::ExaminateurInitial, principal.user_id.clone()),
            now,
        );
        fiche.first_kill_time = new.first_kill_time;
        fiche.last_evisceration_time = new.last_evisceration_time;
        self.store.put_fiche(&fiche)?;
        info!(numero = %fiche.numero, "fiche created");
        Ok(fiche)
    }

    /// Adds a carcass (or small-game lot) to a fiche.
    pub fn add_carcass(
        &self,
        principal: &Principal,
        new: NewCarcass,
    ) -> Result<Carcass, ServiceError> {
        Self::ensure_activated(principal)?;
        let fiche = self.load_fiche(&new.fiche_numero)?;
        if fiche.is_closed() {
            return Err(ServiceError::Custody(CustodyError::FicheClosed {
                numero: fiche.numero,
            }));
        }
        Self::ensure_custodian(&fiche, principal)?;
        if self.store.get_carcass(&new.fiche_numero, &new.bracelet)?.is_some() {
            return Err(ServiceError::BraceletTaken {
                fiche_numero: new.fiche_numero,
                bracelet: new.bracelet,
            });
        }
        let now = Utc::now();
        let carcass = match new.lot_size {
            Some(count) => Carcass::new_lot(new.bracelet, new.fiche_numero, new.species, count, now)?,
            None => Carcass::new(new.bracelet, new.fiche_numero, new.species, now),
        };
        self.store.put_carcass(&carcass)?;
        debug!(fiche = %carcass.fiche_numero, bracelet = %carcass.bracelet, "carcass created");
        Ok(carcass)
    }

    /// Soft-deletes a carcass.
    ///
    /// Rows are never hard-deleted: downstream actors may already hold
    /// records about the bracelet, and the audit trail must keep resolving.
    pub fn delete_carcass(
        &self,
        principal: &Principal,
        fiche_numero: &str,
        bracelet: &str,
    ) -> Result<Carcass, ServiceError> {
        Self::ensure_activated(principal)?;
        let fiche = self.load_fiche(fiche_numero)?;
        if fiche.is_closed() {
            return Err(ServiceError::Custody(CustodyError::FicheClosed {
                numero: fiche.numero,
            }));
        }
        Self::ensure_custodian(&fiche, principal)?;
        let mut carcass = self.load_carcass(fiche_numero, bracelet)?;
        carcass.soft_delete(Utc::now());
        self.store.put_carcass(&carcass)?;
        info!(fiche = %fiche_numero, bracelet = %bracelet, "carcass soft-deleted");
        Ok(carcass)
    }

    /// Records the examiner's findings on one carcass.
    pub fn record_examination(
        &self,
        principal: &Principal,
        fiche_numero: &str,
        bracelet: &str,
        findings: Findings,
    ) -> Result<Carcass, ServiceError> {
        Self::ensure_activated(principal)?;
        let fiche = self.load_fiche(fiche_numero)?;
        Self::ensure_custodian(&fiche, principal)?;
        let mut carcass = self.load_carcass(fiche_numero, bracelet)?;
        carcass.record_findings(
            findings.carcass_abnormalities,
            findings.viscera_abnormalities,
            findings.no_abnormality,
            Utc::now(),
        )?;
        self.store.put_carcass(&carcass)?;
        Ok(carcass)
    }

    /// Approves release on the market, unlocking the examiner's transfer
    /// proposal.
    pub fn approve_market_release(
        &self,
        principal: &Principal,
        fiche_numero: &str,
    ) -> Result<Fiche, ServiceError> {
        Self::ensure_activated(principal)?;
        let mut fiche = self.load_fiche(fiche_numero)?;
        if fiche.is_closed() {
            return Err(ServiceError::Custody(CustodyError::FicheClosed {
                numero: fiche.numero,
            }));
        }
        Self::ensure_custodian(&fiche, principal)?;
        fiche.approve_market_release(Utc::now());
        self.store.put_fiche(&fiche)?;
        info!(numero = %fiche.numero, "market release approved");
        Ok(fiche)
    }

    // =========================================================================
    // Custody transitions
    // =========================================================================

    /// Proposes a next custodian for the fiche.
    pub fn propose_transfer(
        &self,
        principal: &Principal,
        fiche_numero: &str,
        next: OwnerRef,
    ) -> Result<Fiche, ServiceError> {
        let mut fiche = self.load_fiche(fiche_numero)?;
        let expected = fiche.row_version;
        let episode = self.own_episode(&fiche, principal)?;
        custody::propose_transfer(
            &mut fiche,
            principal,
            next,
            TransferGate {
                episode: episode.as_ref(),
                dispatch_checked: false,
            },
            Utc::now(),
        )?;
        self.store.cas_put_fiche(&fiche, expected)?;
        info!(numero = %fiche.numero, next = ?fiche.next_owner, "transfer proposed");
        Ok(fiche)
    }

    /// Takes charge of a fiche or of a dispatch group.
    ///
    /// When the principal is the fiche's proposed next custodian, this is
    /// the full custody confirmation: pointer swap, episode creation for
    /// decision-recording roles, pending-record materialization for the
    /// visible set. When the principal is instead the recipient of a
    /// non-primary dispatch group (its entity is stamped on carcasses but
    /// the fiche's pointer names another recipient), the same confirm runs
    /// without the pointer swap: episode plus pending records only.
    ///
    /// `expected_version` is the row version the caller fetched; a fiche
    /// that moved since then surfaces as a conflict.
    pub fn take_charge(
        &self,
        principal: &Principal,
        fiche_numero: &str,
        expected_version: u64,
    ) -> Result<TakeChargeOutcome, ServiceError> {
        Self::ensure_activated(principal)?;
        let mut fiche = self.load_fiche(fiche_numero)?;
        if fiche.row_version != expected_version {
            return Err(ServiceError::Custody(CustodyError::VersionConflict {
                numero: fiche.numero,
                expected: expected_version,
                actual: fiche.row_version,
            }));
        }

        let is_primary = fiche
            .next_owner
            .as_ref()
            .is_some_and(|next| principal.acts_for(next));

        if is_primary {
            let previous_role = Some(fiche.current_owner.role);
            let episode = custody::confirm_transfer(&mut fiche, principal, Utc::now())?;
            self.store.cas_put_fiche(&fiche, expected_version)?;
            if let Some(episode) = &episode {
                self.store.put_episode(episode)?;
                self.ensure_records(episode)?;
            }
            self.sink.emit(DomainEvent::CustodyChanged {
                fiche_numero: fiche.numero.clone(),
                previous_role,
                new_owner: fiche.current_owner.clone(),
                at: fiche.updated_at,
            });
            info!(numero = %fiche.numero, owner = %fiche.current_owner, "custody confirmed");
            return Ok(TakeChargeOutcome { fiche, episode });
        }

        // Non-primary dispatch group: the recipient is named by the stamps
        // on its carcasses, not by the fiche pointer.
        let group_role = self
            .store
            .list_carcasses(&fiche.numero, false)?
            .iter()
            .filter(|c| {
                c.next_recipient_entity_id
                    .as_ref()
                    .is_some_and(|e| principal.entity_ids.contains(e))
            })
            .find_map(|c| c.next_recipient_kind.and_then(|k| k.custody_role()))
            .filter(|role| principal.has_role(*role));
        let Some(role) = group_role else {
            return Err(ServiceError::Custody(CustodyError::NotProposedRecipient {
                numero: fiche.numero,
                user_id: principal.user_id.clone(),
            }));
        };
        let entity_id = principal.entity_ids.first().cloned();
        let episode = HandoffEpisode::open(
            fiche.numero.clone(),
            role,
            principal.user_id.clone(),
            entity_id,
            Utc::now(),
        );
        self.store.put_episode(&episode)?;
        self.ensure_records(&episode)?;
        info!(numero = %fiche.numero, episode = %episode.id, "dispatch group taken in charge");
        Ok(TakeChargeOutcome {
            fiche,
            episode: Some(episode),
        })
    }

    /// Rejects a pending transfer; custody bounces back to the proposer.
    pub fn reject_transfer(
        &self,
        principal: &Principal,
        fiche_numero: &str,
    ) -> Result<Fiche, ServiceError> {
        let mut fiche = self.load_fiche(fiche_numero)?;
        let expected = fiche.row_version;
        custody::reject_transfer(&mut fiche, principal, Utc::now())?;
        self.store.cas_put_fiche(&fiche, expected)?;
        info!(numero = %fiche.numero, "transfer rejected");
        Ok(fiche)
    }

    /// Re-proposes to a different custodian without changing custody.
    pub fn repropose_transfer(
        &self,
        principal: &Principal,
        fiche_numero: &str,
        next: OwnerRef,
    ) -> Result<Fiche, ServiceError> {
        let mut fiche = self.load_fiche(fiche_numero)?;
        let expected = fiche.row_version;
        let episode = self.own_episode(&fiche, principal)?;
        custody::repropose_to_third_party(
            &mut fiche,
            principal,
            next,
            TransferGate {
                episode: episode.as_ref(),
                dispatch_checked: false,
            },
            Utc::now(),
        )?;
        self.store.cas_put_fiche(&fiche, expected)?;
        Ok(fiche)
    }

    /// Materializes pending inspection records for an episode's visible
    /// set. Explicit ensure-record: existence never depends on client
    /// rendering order. Idempotent.
    fn ensure_records(&self, episode: &HandoffEpisode) -> Result<(), ServiceError> {
        let now = Utc::now();
        for carcass in self.store.list_visible_carcasses(episode)? {
            let existing = self.store.get_inspection(
                &carcass.fiche_numero,
                &carcass.bracelet,
                &episode.id,
            )?;
            if existing.is_none() {
                let record = InspectionRecord::pending(
                    carcass.fiche_numero.clone(),
                    carcass.bracelet.clone(),
                    episode.id.clone(),
                    now,
                );
                self.store.put_inspection(&record)?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Submits the holder's dispatch plan.
    ///
    /// Every group stamps its routing onto its carcasses; only group 0's
    /// recipient becomes the fiche's own `next_owner`. The plan must cover
    /// every live carcass of the fiche, and each group must pass its
    /// completeness rules.
    pub fn submit_dispatch(
        &self,
        principal: &Principal,
        fiche_numero: &str,
        plan: DispatchPlan,
        expected_version: u64,
    ) -> Result<Fiche, ServiceError> {
        Self::ensure_activated(principal)?;
        let mut fiche = self.load_fiche(fiche_numero)?;
        if fiche.row_version != expected_version {
            return Err(ServiceError::Custody(CustodyError::VersionConflict {
                numero: fiche.numero,
                expected: expected_version,
                actual: fiche.row_version,
            }));
        }
        if fiche.is_closed() {
            return Err(ServiceError::Custody(CustodyError::FicheClosed {
                numero: fiche.numero,
            }));
        }
        Self::ensure_custodian(&fiche, principal)?;

        let all_bracelets: Vec<String> = self
            .store
            .list_carcasses(&fiche.numero, false)?
            .into_iter()
            .map(|c| c.bracelet)
            .collect();
        let submission = plan.into_submission(fiche.current_owner.role, &all_bracelets)?;

        let now = Utc::now();
        for group in &submission.groups {
            for bracelet in &group.bracelets {
                let mut carcass = self.load_carcass(&fiche.numero, bracelet)?;
                group.routing.apply(&mut carcass, now);
                self.store.put_carcass(&carcass)?;
            }
        }

        if let Some(primary) = submission.primary_next_owner {
            custody::propose_transfer(
                &mut fiche,
                principal,
                primary,
                TransferGate {
                    episode: None,
                    dispatch_checked: true,
                },
                now,
            )?;
            self.store.cas_put_fiche(&fiche, expected_version)?;
        }
        info!(
            numero = %fiche.numero,
            groups = submission.groups.len(),
            "dispatch submitted"
        );
        Ok(fiche)
    }

    // =========================================================================
    // Inspection ledger
    // =========================================================================

    /// Records an intermediary's decision about one carcass.
    ///
    /// The record write and the carcass mirror rebuild land in one store
    /// transaction; repeating the call with the same inputs converges on
    /// the same stored state.
    pub fn record_decision(
        &self,
        principal: &Principal,
        fiche_numero: &str,
        bracelet: &str,
        episode_id: &str,
        decision: Decision,
        comment: Option<String>,
    ) -> Result<InspectionRecord, ServiceError> {
        Self::ensure_activated(principal)?;
        let fiche = self.load_fiche(fiche_numero)?;
        if fiche.is_closed() {
            return Err(ServiceError::Custody(CustodyError::FicheClosed {
                numero: fiche.numero,
            }));
        }
        let episode = self.load_episode(episode_id)?;
        Self::ensure_episode_owner(&episode, principal)?;
        if !episode.is_open() {
            return Err(ServiceError::Ledger(LedgerError::EpisodeFinished {
                episode_id: episode.id,
            }));
        }
        let visible = self.store.list_visible_carcasses(&episode)?;
        if !visible.iter().any(|c| c.bracelet == bracelet) {
            return Err(ServiceError::Ledger(LedgerError::CarcassNotVisible {
                bracelet: bracelet.to_string(),
                episode_id: episode.id,
            }));
        }
        if let Decision::Refused { reason } = &decision {
            if !self.catalog.is_refusal_reason(reason) {
                return Err(ServiceError::Ledger(LedgerError::UnknownRefusalReason {
                    reason: reason.clone(),
                }));
            }
        }

        let now = Utc::now();
        let mut record = self
            .store
            .get_inspection(fiche_numero, bracelet, episode_id)?
            .unwrap_or_else(|| {
                InspectionRecord::pending(fiche_numero, bracelet, episode_id, now)
            });
        record.record(decision, comment, principal.user_id.clone(), now);

        let mut carcass = self.load_carcass(fiche_numero, bracelet)?;
        CarcassMirror::from_record(&record).apply(&mut carcass, now);
        self.store.put_decision(&record, &carcass)?;

        if !record.decision.is_pending() {
            self.sink.emit(DomainEvent::DecisionRecorded {
                fiche_numero: record.fiche_numero.clone(),
                bracelet: record.bracelet.clone(),
                episode_id: record.episode_id.clone(),
                decision: record.decision.label().to_string(),
                at: record.updated_at,
            });
        }
        debug!(
            fiche = %record.fiche_numero,
            bracelet = %record.bracelet,
            decision = record.decision.label(),
            "decision recorded"
        );
        Ok(record)
    }

    /// Closes out an episode's inspection work.
    ///
    /// Rejected with a validation error naming every undecided bracelet
    /// while any visible carcass is still under review.
    pub fn finish_check(
        &self,
        principal: &Principal,
        episode_id: &str,
    ) -> Result<HandoffEpisode, ServiceError> {
        Self::ensure_activated(principal)?;
        let mut episode = self.load_episode(episode_id)?;
        Self::ensure_episode_owner(&episode, principal)?;
        let visible: Vec<String> = self
            .store
            .list_visible_carcasses(&episode)?
            .into_iter()
            .map(|c| c.bracelet)
            .collect();
        let records = self.store.list_inspections_for_episode(episode_id)?;
        check_close_out(&visible, &records)?;
        episode.finish(Utc::now())?;
        self.store.put_episode(&episode)?;
        info!(episode = %episode.id, "check finished");
        Ok(episode)
    }

    // =========================================================================
    // Veterinary inspection
    // =========================================================================

    /// Records a veterinary seizure on one carcass.
    pub fn seize_carcass(
        &self,
        principal: &Principal,
        fiche_numero: &str,
        bracelet: &str,
        reasons: Vec<String>,
        comment: Option<String>,
    ) -> Result<Carcass, ServiceError> {
        Self::ensure_activated(principal)?;
        let fiche = self.load_fiche(fiche_numero)?;
        if fiche.is_closed() {
            return Err(ServiceError::Custody(CustodyError::FicheClosed {
                numero: fiche.numero,
            }));
        }
        Self::ensure_custodian(&fiche, principal)?;
        if fiche.current_owner.role != Role::Svi {
            return Err(ServiceError::Custody(CustodyError::CloseRequiresSvi {
                numero: fiche.numero,
                role: fiche.current_owner.role,
            }));
        }
        for reason in &reasons {
            if !self.catalog.is_seizure_reason(reason) {
                return Err(ServiceError::UnknownSeizureReason {
                    reason: reason.clone(),
                });
            }
        }
        let mut carcass = self.load_carcass(fiche_numero, bracelet)?;
        carcass.seize(reasons, comment, Utc::now())?;
        self.store.put_carcass(&carcass)?;
        warn!(fiche = %fiche_numero, bracelet = %bracelet, "carcass seized");
        Ok(carcass)
    }

    /// Resolves the effective status of every carcass of a fiche.
    pub fn carcass_statuses(
        &self,
        fiche_numero: &str,
    ) -> Result<Vec<(String, CarcassStatus)>, ServiceError> {
        let carcasses = self.store.list_carcasses(fiche_numero, true)?;
        let mut statuses = Vec::with_capacity(carcasses.len());
        for carcass in carcasses {
            let records = self
                .store
                .list_inspections_for_carcass(fiche_numero, &carcass.bracelet)?;
            statuses.push((carcass.bracelet.clone(), resolve_status(&carcass, &records)));
        }
        Ok(statuses)
    }

    /// Veterinary sign-off: closes the fiche for good.
    pub fn close_fiche(
        &self,
        principal: &Principal,
        fiche_numero: &str,
        expected_version: u64,
    ) -> Result<Fiche, ServiceError> {
        Self::ensure_activated(principal)?;
        let mut fiche = self.load_fiche(fiche_numero)?;
        if fiche.row_version != expected_version {
            return Err(ServiceError::Custody(CustodyError::VersionConflict {
                numero: fiche.numero,
                expected: expected_version,
                actual: fiche.row_version,
            }));
        }
        let statuses = self.carcass_statuses(fiche_numero)?;
        custody::close_fiche(&mut fiche, principal, &statuses, Utc::now())?;
        self.store.cas_put_fiche(&fiche, expected_version)?;
        self.sink.emit(DomainEvent::FicheClosed {
            fiche_numero: fiche.numero.clone(),
            at: fiche.updated_at,
        });
        info!(numero = %fiche.numero, "fiche closed");
        Ok(fiche)
    }

    // =========================================================================
    // Offline merge
    // =========================================================================

    /// Applies a field patch queued by an offline client.
    ///
    /// The patch is sanitized against the acting role's allow-list, merged
    /// field-wise onto the current server copy, validated, and stored as
    /// one idempotent upsert on the entity's business key. Returns the
    /// merged entity for the client's read-model cache.
    pub fn merge_submit(
        &self,
        principal: &Principal,
        acting_role: Role,
        key: &EntityKey,
        mut patch: FieldPatch,
    ) -> Result<Value, ServiceError> {
        Self::ensure_activated(principal)?;
        if !principal.has_role(acting_role) {
            return Err(ServiceError::RoleNotHeld {
                user_id: principal.user_id.clone(),
                role: acting_role,
            });
        }
        let now = Utc::now();
        match key {
            EntityKey::Fiche { numero } => {
                patch.retain_allowed(allowed_fiche_fields(acting_role));
                let fiche = self.load_fiche(numero)?;
                if fiche.is_closed() {
                    return Err(ServiceError::Custody(CustodyError::FicheClosed {
                        numero: fiche.numero,
                    }));
                }
                let mut merged: Fiche = merge(&fiche, &patch)?;
                merged.updated_at = now;
                self.store.put_fiche(&merged)?;
                Ok(serde_json::to_value(merged).map_err(StoreError::from)?)
            }
            EntityKey::Carcass {
                fiche_numero,
                bracelet,
            } => {
                patch.retain_allowed(allowed_carcass_fields(acting_role));
                let carcass = self.load_carcass(fiche_numero, bracelet)?;
                if carcass.is_deleted() {
                    return Err(ServiceError::Carcass(CarcassError::Deleted {
                        bracelet: carcass.bracelet,
                    }));
                }
                let mut merged: Carcass = merge(&carcass, &patch)?;
                Self::check_carcass_invariants(&merged)?;
                merged.updated_at = now;
                self.store.put_carcass(&merged)?;
                Ok(serde_json::to_value(merged).map_err(StoreError::from)?)
            }
            EntityKey::Inspection {
                fiche_numero,
                bracelet,
                episode_id,
            } => {
                patch.retain_allowed(allowed_inspection_fields(acting_role));
                let record = self
                    .store
                    .get_inspection(fiche_numero, bracelet, episode_id)?
                    .ok_or_else(|| ServiceError::InspectionNotFound {
                        fiche_numero: fiche_numero.clone(),
                        bracelet: bracelet.clone(),
                        episode_id: episode_id.clone(),
                    })?;
                let episode = self.load_episode(episode_id)?;
                Self::ensure_episode_owner(&episode, principal)?;
                if !episode.is_open() {
                    return Err(ServiceError::Ledger(LedgerError::EpisodeFinished {
                        episode_id: episode.id,
                    }));
                }
                let mut merged: InspectionRecord = merge(&record, &patch)?;
                if let Decision::Refused { reason } = &merged.decision {
                    if !self.catalog.is_refusal_reason(reason) {
                        return Err(ServiceError::Ledger(LedgerError::UnknownRefusalReason {
                            reason: reason.clone(),
                        }));
                    }
                }
                merged.updated_at = now;
                merged.recorded_by = Some(principal.user_id.clone());
                // The mirror is rebuilt from the merged record in the same
                // transaction, exactly as on the online decision path.
                let mut carcass = self.load_carcass(fiche_numero, bracelet)?;
                CarcassMirror::from_record(&merged).apply(&mut carcass, now);
                self.store.put_decision(&merged, &carcass)?;
                Ok(serde_json::to_value(merged).map_err(StoreError::from)?)
            }
        }
    }

    fn check_carcass_invariants(carcass: &Carcass) -> Result<(), ServiceError> {
        let has_findings =
            !carcass.carcass_abnormalities.is_empty() || !carcass.viscera_abnormalities.is_empty();
        if has_findings && carcass.no_abnormality {
            return Err(ServiceError::Carcass(CarcassError::FindingsConflict {
                bracelet: carcass.bracelet.clone(),
            }));
        }
        if carcass.svi_seized && carcass.svi_seizure_reasons.is_empty() {
            return Err(ServiceError::Carcass(CarcassError::SeizureWithoutReason {
                bracelet: carcass.bracelet.clone(),
            }));
        }
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Fetches one entity by business key, as JSON.
    pub fn fetch(&self, key: &EntityKey) -> Result<Option<Value>, ServiceError> {
        let value = match key {
            EntityKey::Fiche { numero } => self
                .store
                .get_fiche(numero)?
                .map(serde_json::to_value)
                .transpose()
                .map_err(StoreError::from)?,
            EntityKey::Carcass {
                fiche_numero,
                bracelet,
            } => self
                .store
                .get_carcass(fiche_numero, bracelet)?
                .map(serde_json::to_value)
                .transpose()
                .map_err(StoreError::from)?,
            EntityKey::Inspection {
                fiche_numero,
                bracelet,
                episode_id,
            } => self
                .store
                .get_inspection(fiche_numero, bracelet, episode_id)?
                .map(serde_json::to_value)
                .transpose()
                .map_err(StoreError::from)?,
        };
        Ok(value)
    }

    /// The carcasses an episode can see.
    pub fn visible_carcasses(
        &self,
        principal: &Principal,
        episode_id: &str,
    ) -> Result<Vec<Carcass>, ServiceError> {
        let episode = self.load_episode(episode_id)?;
        Self::ensure_episode_owner(&episode, principal)?;
        Ok(self.store.list_visible_carcasses(&episode)?)
    }

    /// Registry listing of carcasses routed to a handling authority.
    pub fn registry_carcasses(
        &self,
        entity_id: &str,
        modified_since: Option<DateTime<Utc>>,
        include_deleted: bool,
        page: Page,
    ) -> Result<Vec<Carcass>, ServiceError> {
        Ok(self
            .store
            .list_carcasses_for_authority(entity_id, modified_since, include_deleted, page)?)
    }
}
