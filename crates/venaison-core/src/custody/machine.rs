//! Custody transitions.

use chrono::{DateTime, Utc};

use super::episode::HandoffEpisode;
use super::error::CustodyError;
use crate::carcass::CarcassStatus;
use crate::fiche::Fiche;
use crate::identity::{OwnerRef, Principal, Role};

/// Role-specific completeness inputs for a transfer proposal.
///
/// The machine owns the gate logic; callers only supply the facts it needs.
/// Each role reads a different slice:
///
/// - the initial examiner must have approved market release (read off the
///   fiche itself);
/// - the first holder must come through a validated dispatch plan
///   (`dispatch_checked`);
/// - a decision-recording custodian must have finished its check
///   (`episode`).
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferGate<'a> {
    /// The proposing custodian's open episode, when its role holds one.
    pub episode: Option<&'a HandoffEpisode>,
    /// Set by the dispatch engine once the submission preconditions passed.
    pub dispatch_checked: bool,
}

fn ensure_open(fiche: &Fiche) -> Result<(), CustodyError> {
    if fiche.is_closed() {
        return Err(CustodyError::FicheClosed {
            numero: fiche.numero.clone(),
        });
    }
    Ok(())
}

fn ensure_activated(principal: &Principal) -> Result<(), CustodyError> {
    if !principal.activated {
        return Err(CustodyError::NotActivated {
            user_id: principal.user_id.clone(),
        });
    }
    Ok(())
}

fn ensure_custodian(fiche: &Fiche, principal: &Principal) -> Result<(), CustodyError> {
    if !principal.acts_for(&fiche.current_owner) {
        return Err(CustodyError::NotCustodian {
            numero: fiche.numero.clone(),
            user_id: principal.user_id.clone(),
        });
    }
    Ok(())
}

fn check_propose_gate(fiche: &Fiche, gate: TransferGate<'_>) -> Result<(), CustodyError> {
    match fiche.current_owner.role {
        Role::ExaminateurInitial => {
            if fiche.market_release_approved != Some(true) {
                return Err(CustodyError::MissingPrecondition {
                    numero: fiche.numero.clone(),
                    field: "market_release_approved",
                });
            }
        }
        Role::PremierDetenteur => {
            if !gate.dispatch_checked {
                return Err(CustodyError::MissingPrecondition {
                    numero: fiche.numero.clone(),
                    field: "dispatch_plan",
                });
            }
        }
        Role::Ccg | Role::CollecteurPro | Role::Etg | Role::Svi => {
            let finished = gate.episode.is_some_and(|e| e.check_finished_at.is_some());
            if !finished {
                return Err(CustodyError::MissingPrecondition {
                    numero: fiche.numero.clone(),
                    field: "check_finished_at",
                });
            }
        }
    }
    Ok(())
}

/// Proposes a next custodian.
///
/// Legal only for the current custodian, only while no other proposal is
/// pending, and only once the role-specific completeness gate passes.
///
/// # Errors
///
/// Permission errors for a non-custodian or deactivated account; validation
/// errors for a closed fiche, a pending transfer, an incomplete owner
/// reference, or a failed gate (naming the missing field).
pub fn propose_transfer(
    fiche: &mut Fiche,
    principal: &Principal,
    next: OwnerRef,
    gate: TransferGate<'_>,
    now: DateTime<Utc>,
) -> Result<(), CustodyError> {
    ensure_open(fiche)?;
    ensure_activated(principal)?;
    ensure_custodian(fiche, principal)?;
    if fiche.transfer_pending() {
        return Err(CustodyError::TransferAlreadyPending {
            numero: fiche.numero.clone(),
        });
    }
    if !next.is_fully_populated() {
        return Err(CustodyError::IncompleteOwnerRef {
            numero: fiche.numero.clone(),
        });
    }
    check_propose_gate(fiche, gate)?;

    fiche.next_owner = Some(next);
    fiche.row_version += 1;
    fiche.updated_at = now;
    debug_assert!(fiche.custody_invariant_holds());
    Ok(())
}

/// Confirms a pending transfer: the proposed recipient takes charge.
///
/// `prev_owner` receives the old `current_owner`, `current_owner` receives
/// `next_owner`, and the pending pointer is cleared. When the new role
/// records per-carcass decisions, a [`HandoffEpisode`] is opened atomically
/// with the confirmation and returned.
///
/// # Errors
///
/// Permission error when the principal is not the proposed recipient;
/// validation errors for a closed fiche or no pending transfer.
pub fn confirm_transfer(
    fiche: &mut Fiche,
    principal: &Principal,
    now: DateTime<Utc>,
) -> Result<Option<HandoffEpisode>, CustodyError> {
    ensure_open(fiche)?;
    ensure_activated(principal)?;
    let Some(next) = fiche.next_owner.clone() else {
        return Err(CustodyError::NoPendingTransfer {
            numero: fiche.numero.clone(),
        });
    };
    if !principal.acts_for(&next) {
        return Err(CustodyError::NotProposedRecipient {
            numero: fiche.numero.clone(),
            user_id: principal.user_id.clone(),
        });
    }

    fiche.prev_owner = Some(fiche.current_owner.clone());
    fiche.current_owner = next;
    fiche.next_owner = None;
    fiche.current_owner_wants_to_transfer = false;
    fiche.row_version += 1;
    fiche.updated_at = now;
    debug_assert!(fiche.custody_invariant_holds());

    let episode = fiche.current_owner.role.opens_episode().then(|| {
        HandoffEpisode::open(
            fiche.numero.clone(),
            fiche.current_owner.role,
            principal.user_id.clone(),
            fiche.current_owner.entity_id.clone(),
            now,
        )
    });
    Ok(episode)
}

/// Rejects a pending transfer: custody bounces back to the proposer.
///
/// # Errors
///
/// Permission error when the principal is not the proposed recipient;
/// validation errors for a closed fiche or no pending transfer.
pub fn reject_transfer(
    fiche: &mut Fiche,
    principal: &Principal,
    now: DateTime<Utc>,
) -> Result<(), CustodyError> {
    ensure_open(fiche)?;
    ensure_activated(principal)?;
    let Some(next) = fiche.next_owner.as_ref() else {
        return Err(CustodyError::NoPendingTransfer {
            numero: fiche.numero.clone(),
        });
    };
    if !principal.acts_for(next) {
        return Err(CustodyError::NotProposedRecipient {
            numero: fiche.numero.clone(),
            user_id: principal.user_id.clone(),
        });
    }
    fiche.next_owner = None;
    fiche.row_version += 1;
    fiche.updated_at = now;
    Ok(())
}

/// Re-proposes to a different custodian without changing current custody.
///
/// Marks `current_owner_wants_to_transfer` and replaces the pending
/// pointer. Unlike [`propose_transfer`], an existing proposal is allowed:
/// it is being superseded, not duplicated. The same completeness gate
/// applies.
///
/// # Errors
///
/// Same taxonomy as [`propose_transfer`].
pub fn repropose_to_third_party(
    fiche: &mut Fiche,
    principal: &Principal,
    next: OwnerRef,
    gate: TransferGate<'_>,
    now: DateTime<Utc>,
) -> Result<(), CustodyError> {
    ensure_open(fiche)?;
    ensure_activated(principal)?;
    ensure_custodian(fiche, principal)?;
    if !next.is_fully_populated() {
        return Err(CustodyError::IncompleteOwnerRef {
            numero: fiche.numero.clone(),
        });
    }
    check_propose_gate(fiche, gate)?;

    fiche.current_owner_wants_to_transfer = true;
    fiche.next_owner = Some(next);
    fiche.row_version += 1;
    fiche.updated_at = now;
    debug_assert!(fiche.custody_invariant_holds());
    Ok(())
}

/// Veterinary sign-off: the terminal transition.
///
/// Only the current custodian under the SVI role may close, and only when
/// every visible carcass resolves to a terminal status. After the closing
/// timestamp is set no further owner transition is legal.
///
/// # Errors
///
/// [`CustodyError::CloseRequiresSvi`] for any other role;
/// [`CustodyError::UnresolvedCarcasses`] naming every carcass still
/// pending or under review.
pub fn close_fiche(
    fiche: &mut Fiche,
    principal: &Principal,
    carcass_statuses: &[(String, CarcassStatus)],
    now: DateTime<Utc>,
) -> Result<(), CustodyError> {
    ensure_open(fiche)?;
    ensure_activated(principal)?;
    ensure_custodian(fiche, principal)?;
    if fiche.current_owner.role != Role::Svi {
        return Err(CustodyError::CloseRequiresSvi {
            numero: fiche.numero.clone(),
            role: fiche.current_owner.role,
        });
    }
    let mut unresolved: Vec<String> = carcass_statuses
        .iter()
        .filter(|(_, status)| !status.is_terminal())
        .map(|(bracelet, _)| bracelet.clone())
        .collect();
    if !unresolved.is_empty() {
        unresolved.sort();
        return Err(CustodyError::UnresolvedCarcasses {
            numero: fiche.numero.clone(),
            bracelets: unresolved,
        });
    }

    fiche.svi_closed_at = Some(now);
    fiche.next_owner = None;
    fiche.current_owner_wants_to_transfer = false;
    fiche.row_version += 1;
    fiche.updated_at = now;
    Ok(())
}
