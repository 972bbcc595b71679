//! Inspection records, decisions, and the mirror projection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::LedgerError;
use crate::carcass::Carcass;
use crate::keys::EntityKey;

/// One intermediary's decision about one carcass.
///
/// The enum makes "at most one of accepted/refused/missing" hold by
/// construction; there is no flag combination to validate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    /// Materialized but not yet decided.
    Pending,
    /// Taken in charge.
    Accepted,
    /// Refused, with a reason from the controlled catalog.
    Refused {
        /// Catalog reason text.
        reason: String,
    },
    /// Reported missing on arrival.
    Missing,
}

impl Decision {
    /// Whether the record still awaits a decision.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Whether this is an acceptance.
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    /// Whether this is a refusal.
    #[must_use]
    pub const fn is_refused(&self) -> bool {
        matches!(self, Self::Refused { .. })
    }

    /// Whether this reports the carcass missing.
    #[must_use]
    pub const fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    /// Short label for events and logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Accepted => "ACCEPTED",
            Self::Refused { .. } => "REFUSED",
            Self::Missing => "MISSING",
        }
    }
}

/// One decision by one intermediary about one carcass.
///
/// Composite key: (fiche, bracelet, episode). Records are created in the
/// `Pending` state, updated repeatedly until the episode closes out, and
/// never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectionRecord {
    /// Owning fiche number.
    pub fiche_numero: String,
    /// Bracelet of the inspected carcass.
    pub bracelet: String,
    /// Handoff episode this decision belongs to.
    pub episode_id: String,
    /// The current decision.
    pub decision: Decision,
    /// Free-text comment alongside the decision.
    pub comment: Option<String>,
    /// User who recorded the latest decision.
    pub recorded_by: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last decision-write timestamp; orders "touches" in the resolver.
    pub updated_at: DateTime<Utc>,
}

impl InspectionRecord {
    /// Materializes a pending record for a carcass entering an episode's
    /// visible set.
    #[must_use]
    pub fn pending(
        fiche_numero: impl Into<String>,
        bracelet: impl Into<String>,
        episode_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            fiche_numero: fiche_numero.into(),
            bracelet: bracelet.into(),
            episode_id: episode_id.into(),
            decision: Decision::Pending,
            comment: None,
            recorded_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Records a decision, fully replacing the previous decision fields.
    ///
    /// A change from refused to accepted leaves no residual refusal reason
    /// behind: the whole [`Decision`] value is swapped.
    pub fn record(
        &mut self,
        decision: Decision,
        comment: Option<String>,
        recorded_by: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        self.decision = decision;
        self.comment = comment;
        self.recorded_by = Some(recorded_by.into());
        self.updated_at = now;
    }

    /// The record's immutable business key.
    #[must_use]
    pub fn key(&self) -> EntityKey {
        EntityKey::inspection(
            self.fiche_numero.clone(),
            self.bracelet.clone(),
            self.episode_id.clone(),
        )
    }
}

/// The denormalized decision fields mirrored onto a carcass.
///
/// Computed from the authoritative record by [`CarcassMirror::from_record`]
/// and applied by [`CarcassMirror::apply`]; same inputs, same result, safe
/// to repeat.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CarcassMirror {
    /// Refusal reason, when the record refuses.
    pub refusal_reason: Option<String>,
    /// Refusing episode id, when the record refuses.
    pub refused_by_episode: Option<String>,
    /// Whether the record reports the carcass missing.
    pub reported_missing: bool,
    /// Decision timestamp, absent while pending.
    pub decision_signed_at: Option<DateTime<Utc>>,
}

impl CarcassMirror {
    /// Projects a record onto its mirror fields.
    #[must_use]
    pub fn from_record(record: &InspectionRecord) -> Self {
        match &record.decision {
            Decision::Pending => Self::default(),
            Decision::Accepted => Self {
                decision_signed_at: Some(record.updated_at),
                ..Self::default()
            },
            Decision::Refused { reason } => Self {
                refusal_reason: Some(reason.clone()),
                refused_by_episode: Some(record.episode_id.clone()),
                reported_missing: false,
                decision_signed_at: Some(record.updated_at),
            },
            Decision::Missing => Self {
                refusal_reason: None,
                refused_by_episode: None,
                reported_missing: true,
                decision_signed_at: Some(record.updated_at),
            },
        }
    }

    /// Writes the mirror onto the carcass. Idempotent.
    pub fn apply(&self, carcass: &mut Carcass, now: DateTime<Utc>) {
        carcass.refusal_reason = self.refusal_reason.clone();
        carcass.refused_by_episode = self.refused_by_episode.clone();
        carcass.reported_missing = self.reported_missing;
        carcass.decision_signed_at = self.decision_signed_at;
        carcass.updated_at = now;
    }
}

/// Close-out gate: every visible carcass must carry a decision other than
/// `Pending`.
///
/// `visible_bracelets` is the intermediary's dispatch group; a visible
/// carcass with no record at all counts as undecided too.
///
/// # Errors
///
/// Returns [`LedgerError::UndecidedCarcasses`] naming every undecided
/// bracelet, in stable order.
pub fn check_close_out(
    visible_bracelets: &[String],
    records: &[InspectionRecord],
) -> Result<(), LedgerError> {
    let mut undecided: Vec<String> = visible_bracelets
        .iter()
        .filter(|bracelet| {
            !records
                .iter()
                .any(|r| &r.bracelet == *bracelet && !r.decision.is_pending())
        })
        .cloned()
        .collect();
    if undecided.is_empty() {
        Ok(())
    } else {
        undecided.sort();
        Err(LedgerError::UndecidedCarcasses {
            bracelets: undecided,
        })
    }
}
