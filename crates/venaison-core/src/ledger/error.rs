//! Inspection ledger error types.

use thiserror::Error;

/// Errors from inspection-ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum LedgerError {
    /// Close-out requested while carcasses are still under review.
    ///
    /// User-facing validation error; it names every undecided bracelet so
    /// the intermediary knows exactly what is left to decide.
    #[error("cannot finish check: carcasses still under review: {}", bracelets.join(", "))]
    UndecidedCarcasses {
        /// Bracelets without a decision, in stable order.
        bracelets: Vec<String>,
    },

    /// A decision was written for a carcass outside the intermediary's
    /// dispatch group.
    #[error("carcass {bracelet} is not visible to episode {episode_id}")]
    CarcassNotVisible {
        /// The bracelet the decision targeted.
        bracelet: String,
        /// The episode that attempted the write.
        episode_id: String,
    },

    /// The episode already finished its check and is immutable history.
    #[error("episode {episode_id} has already finished its check")]
    EpisodeFinished {
        /// The closed episode.
        episode_id: String,
    },

    /// Refusal reason not present in the controlled catalog.
    #[error("refusal reason not in catalog: {reason}")]
    UnknownRefusalReason {
        /// The rejected reason text.
        reason: String,
    },
}
