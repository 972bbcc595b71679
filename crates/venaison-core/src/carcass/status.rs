//! The pure carcass status resolver.

use serde::{Deserialize, Serialize};

use super::state::Carcass;
use crate::ledger::InspectionRecord;

/// Effective state of a carcass, derived from accumulated facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CarcassStatus {
    /// No examiner sign-off yet, or no downstream fact to report.
    PendingExamination,
    /// An intermediary holds a pending record with no decision.
    UnderReview,
    /// The most recent intermediary touch is an acceptance.
    Accepted,
    /// An intermediary refused the carcass.
    Refused,
    /// An intermediary reported the carcass missing.
    Missing,
    /// The veterinary authority seized the carcass.
    Seized,
    /// The carcass was soft-deleted.
    Deleted,
}

impl CarcassStatus {
    /// Whether this status is terminal for the SVI close-out gate.
    ///
    /// A fiche can only be closed when every visible carcass is terminal;
    /// `PendingExamination` and `UnderReview` block the close.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Accepted | Self::Refused | Self::Missing | Self::Seized | Self::Deleted
        )
    }

    /// Canonical string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PendingExamination => "PENDING_EXAMINATION",
            Self::UnderReview => "UNDER_REVIEW",
            Self::Accepted => "ACCEPTED",
            Self::Refused => "REFUSED",
            Self::Missing => "MISSING",
            Self::Seized => "SEIZED",
            Self::Deleted => "DELETED",
        }
    }
}

impl std::fmt::Display for CarcassStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derives the effective status of a carcass from its own fields and the
/// inspection records written about it.
///
/// Referentially transparent and total: facts can coexist (a seized carcass
/// may also carry a refusal), and the priority order below decides which one
/// wins. The result is never persisted as truth; the carcass's denormalized
/// fields are caches rebuilt from the same inputs.
///
/// Priority, highest first:
///
/// 1. `Deleted` — soft-delete timestamp set;
/// 2. `Seized` — seizure flag with a non-empty reason list;
/// 3. `Missing` — any record (or the carcass's own mirror) reports it
///    missing;
/// 4. `Refused` — any record refuses it;
/// 5. `Accepted` — the most recent intermediary touch is an acceptance;
/// 6. `UnderReview` — a pending record exists with no decision;
/// 7. `PendingExamination` — otherwise.
#[must_use]
pub fn resolve_status(carcass: &Carcass, records: &[InspectionRecord]) -> CarcassStatus {
    if carcass.deleted_at.is_some() {
        return CarcassStatus::Deleted;
    }
    if carcass.svi_seized && !carcass.svi_seizure_reasons.is_empty() {
        return CarcassStatus::Seized;
    }
    if carcass.reported_missing || records.iter().any(|r| r.decision.is_missing()) {
        return CarcassStatus::Missing;
    }
    if carcass.refusal_reason.is_some() || records.iter().any(|r| r.decision.is_refused()) {
        return CarcassStatus::Refused;
    }
    // Touches are ordered by last modification, so a review re-opened after
    // an acceptance demotes the carcass back to UnderReview.
    let latest = records.iter().max_by(|a, b| {
        (a.updated_at, &a.episode_id).cmp(&(b.updated_at, &b.episode_id))
    });
    match latest {
        Some(record) if record.decision.is_accepted() => CarcassStatus::Accepted,
        Some(_) => CarcassStatus::UnderReview,
        None => CarcassStatus::PendingExamination,
    }
}
