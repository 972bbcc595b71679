//! Dispatch engine error types.

use thiserror::Error;

/// Errors from dispatch-plan validation and submission.
///
/// Every incomplete-group failure names the specific missing field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum DispatchError {
    /// Submission with zero groups.
    #[error("cannot submit a dispatch with no groups")]
    NoGroups,

    /// Assignment targeted a group index that does not exist.
    #[error("dispatch group {index} does not exist")]
    NoSuchGroup {
        /// The out-of-range index.
        index: usize,
    },

    /// Carcasses not assigned to any group block submission.
    #[error("carcasses not assigned to any group: {}", bracelets.join(", "))]
    UnassignedCarcasses {
        /// The unassigned bracelets, in stable order.
        bracelets: Vec<String>,
    },

    /// A group is missing a required field.
    #[error("dispatch group {group} is missing {field}")]
    IncompleteGroup {
        /// Index of the incomplete group.
        group: usize,
        /// The missing field.
        field: &'static str,
    },
}
