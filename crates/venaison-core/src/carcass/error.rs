//! Carcass module error types.

use thiserror::Error;

/// Errors from carcass-level writes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CarcassError {
    /// Abnormality findings and the no-abnormality flag are mutually
    /// exclusive.
    #[error("carcass {bracelet}: abnormality findings conflict with the no-abnormality flag")]
    FindingsConflict {
        /// The offending bracelet number.
        bracelet: String,
    },

    /// A seizure requires at least one reason.
    #[error("carcass {bracelet}: seizure requires a non-empty reason list")]
    SeizureWithoutReason {
        /// The offending bracelet number.
        bracelet: String,
    },

    /// The carcass was soft-deleted and no longer accepts writes.
    #[error("carcass {bracelet} is deleted")]
    Deleted {
        /// The offending bracelet number.
        bracelet: String,
    },

    /// Lot head-count must be positive for small-game lots.
    #[error("carcass {bracelet}: lot head-count must be at least 1")]
    EmptyLot {
        /// The offending bracelet number.
        bracelet: String,
    },
}
