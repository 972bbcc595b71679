//! Carcass state: the many-field document each role writes a slice of.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::error::CarcassError;

/// The kind of recipient a dispatch group routes to.
///
/// Only the first four continue the custody chain; a final consumer, retail
/// outlet or charity meal takes the carcasses out of it, which is why those
/// recipients need no transport metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecipientKind {
    /// Cold-storage depot.
    Ccg,
    /// Professional collector.
    CollecteurPro,
    /// Processing establishment.
    Etg,
    /// Veterinary inspection service.
    Svi,
    /// Final consumer; leaves the chain.
    FinalConsumer,
    /// Retail outlet; leaves the chain.
    Retail,
    /// Hunt or charity meal; leaves the chain.
    CharityMeal,
}

impl RecipientKind {
    /// Whether routing to this recipient requires a transport mode.
    #[must_use]
    pub const fn requires_transport(self) -> bool {
        !matches!(self, Self::FinalConsumer | Self::Retail | Self::CharityMeal)
    }

    /// Whether routing to this recipient requires a deposit location.
    #[must_use]
    pub const fn requires_deposit(self) -> bool {
        matches!(self, Self::Ccg)
    }

    /// The custody role a recipient of this kind takes, if it stays in the
    /// chain.
    #[must_use]
    pub const fn custody_role(self) -> Option<crate::identity::Role> {
        match self {
            Self::Ccg => Some(crate::identity::Role::Ccg),
            Self::CollecteurPro => Some(crate::identity::Role::CollecteurPro),
            Self::Etg => Some(crate::identity::Role::Etg),
            Self::Svi => Some(crate::identity::Role::Svi),
            Self::FinalConsumer | Self::Retail | Self::CharityMeal => None,
        }
    }
}

/// Where carcasses are deposited while awaiting pickup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DepotKind {
    /// Deposited at a cold-storage depot.
    Ccg,
    /// Delivered directly to the recipient's premises.
    RecipientPremises,
}

/// Who moves the carcasses to the recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransportMode {
    /// The holder transports the carcasses themselves.
    HolderSelf,
    /// The recipient picks the carcasses up.
    Recipient,
    /// A third-party carrier.
    Carrier,
}

/// One animal or homogeneous small-game lot.
///
/// The bracelet number is the immutable business key, assigned before any
/// biological data exists. Each actor mutates only the fields its role owns;
/// the per-role merge allow-lists in [`crate::merge`] are the authoritative
/// statement of that ownership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Carcass {
    /// Immutable bracelet/tag number.
    pub bracelet: String,
    /// Owning fiche number.
    pub fiche_numero: String,
    /// Species label (e.g. "Daim", "Pigeons").
    pub species: String,
    /// Head-count when this row is a small-game lot.
    pub lot_size: Option<u32>,

    // Examiner findings. The two lists and the flag are mutually exclusive.
    /// Abnormalities observed on the carcass.
    pub carcass_abnormalities: Vec<String>,
    /// Abnormalities observed on the viscera.
    pub viscera_abnormalities: Vec<String>,
    /// Explicit "no abnormality" sign-off.
    pub no_abnormality: bool,
    /// Examination sign-off timestamp.
    pub examined_at: Option<DateTime<Utc>>,

    // First-holder routing caches, stamped at dispatch submission.
    /// Kind of the next recipient.
    pub next_recipient_kind: Option<RecipientKind>,
    /// Entity id of the next recipient.
    pub next_recipient_entity_id: Option<String>,
    /// Display name of the next recipient.
    pub next_recipient_name: Option<String>,
    /// Deposit location kind.
    pub depot_kind: Option<DepotKind>,
    /// Deposit entity.
    pub depot_entity_id: Option<String>,
    /// Deposit date (required for CCG deposits under the first holder).
    pub deposited_on: Option<NaiveDate>,
    /// Transport mode to the recipient.
    pub transport_mode: Option<TransportMode>,
    /// Transport date (required for self-transport to a CCG deposit).
    pub transport_date: Option<NaiveDate>,

    // Mirror of the authoritative inspection ledger; rebuilt on every
    // decision write, never independently editable.
    /// Refusal reason mirrored from the refusing intermediary's record.
    pub refusal_reason: Option<String>,
    /// Episode id of the refusing intermediary.
    pub refused_by_episode: Option<String>,
    /// Whether any intermediary reported the carcass missing.
    pub reported_missing: bool,
    /// Timestamp of the mirrored decision.
    pub decision_signed_at: Option<DateTime<Utc>>,

    // Veterinary seizure. Flag and non-empty reason list are co-required.
    /// Seizure flag set by the SVI.
    pub svi_seized: bool,
    /// Ordered seizure reasons; non-empty whenever the flag is set.
    pub svi_seizure_reasons: Vec<String>,
    /// Free-text seizure comment.
    pub svi_seizure_comment: Option<String>,

    /// Soft-delete timestamp; rows are never hard-deleted once a downstream
    /// actor has touched them.
    pub deleted_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Carcass {
    /// Creates a carcass with only its bracelet and species known.
    #[must_use]
    pub fn new(
        bracelet: impl Into<String>,
        fiche_numero: impl Into<String>,
        species: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            bracelet: bracelet.into(),
            fiche_numero: fiche_numero.into(),
            species: species.into(),
            lot_size: None,
            carcass_abnormalities: Vec::new(),
            viscera_abnormalities: Vec::new(),
            no_abnormality: false,
            examined_at: None,
            next_recipient_kind: None,
            next_recipient_entity_id: None,
            next_recipient_name: None,
            depot_kind: None,
            depot_entity_id: None,
            deposited_on: None,
            transport_mode: None,
            transport_date: None,
            refusal_reason: None,
            refused_by_episode: None,
            reported_missing: false,
            decision_signed_at: None,
            svi_seized: false,
            svi_seizure_reasons: Vec::new(),
            svi_seizure_comment: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Creates a small-game lot with a head count.
    ///
    /// # Errors
    ///
    /// Returns [`CarcassError::EmptyLot`] for a zero head count.
    pub fn new_lot(
        bracelet: impl Into<String>,
        fiche_numero: impl Into<String>,
        species: impl Into<String>,
        head_count: u32,
        now: DateTime<Utc>,
    ) -> Result<Self, CarcassError> {
        let mut carcass = Self::new(bracelet, fiche_numero, species, now);
        if head_count == 0 {
            return Err(CarcassError::EmptyLot {
                bracelet: carcass.bracelet,
            });
        }
        carcass.lot_size = Some(head_count);
        Ok(carcass)
    }

    /// Records the examiner's findings and signs the examination off.
    ///
    /// # Errors
    ///
    /// Returns [`CarcassError::FindingsConflict`] when abnormality lists and
    /// the no-abnormality flag are both set, and [`CarcassError::Deleted`]
    /// on a soft-deleted row.
    pub fn record_findings(
        &mut self,
        carcass_abnormalities: Vec<String>,
        viscera_abnormalities: Vec<String>,
        no_abnormality: bool,
        now: DateTime<Utc>,
    ) -> Result<(), CarcassError> {
        self.ensure_live()?;
        let has_findings = !carcass_abnormalities.is_empty() || !viscera_abnormalities.is_empty();
        if has_findings && no_abnormality {
            return Err(CarcassError::FindingsConflict {
                bracelet: self.bracelet.clone(),
            });
        }
        self.carcass_abnormalities = carcass_abnormalities;
        self.viscera_abnormalities = viscera_abnormalities;
        self.no_abnormality = no_abnormality;
        self.examined_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Records a veterinary seizure.
    ///
    /// # Errors
    ///
    /// Returns [`CarcassError::SeizureWithoutReason`] on an empty reason
    /// list and [`CarcassError::Deleted`] on a soft-deleted row.
    pub fn seize(
        &mut self,
        reasons: Vec<String>,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), CarcassError> {
        self.ensure_live()?;
        if reasons.is_empty() {
            return Err(CarcassError::SeizureWithoutReason {
                bracelet: self.bracelet.clone(),
            });
        }
        self.svi_seized = true;
        self.svi_seizure_reasons = reasons;
        self.svi_seizure_comment = comment;
        self.updated_at = now;
        Ok(())
    }

    /// Soft-deletes the carcass.
    pub fn soft_delete(&mut self, now: DateTime<Utc>) {
        if self.deleted_at.is_none() {
            self.deleted_at = Some(now);
            self.updated_at = now;
        }
    }

    /// Whether the carcass accepts writes.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether the examiner has signed the examination off.
    #[must_use]
    pub const fn is_examined(&self) -> bool {
        self.examined_at.is_some()
    }

    fn ensure_live(&self) -> Result<(), CarcassError> {
        if self.is_deleted() {
            return Err(CarcassError::Deleted {
                bracelet: self.bracelet.clone(),
            });
        }
        Ok(())
    }
}
