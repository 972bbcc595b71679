//! Custody state machine error types.

use thiserror::Error;

use crate::identity::Role;

/// Errors from custody transitions.
///
/// Validation and permission failures are kept distinct from conflicts so
/// clients can branch on recovery: validation is user-correctable,
/// permission is not retryable, and a conflict calls for refetch-and-review
/// rather than a blind retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CustodyError {
    /// The fiche is closed and read-only.
    #[error("fiche {numero} is closed and read-only")]
    FicheClosed {
        /// The fiche number.
        numero: String,
    },

    /// The acting principal is not the current custodian.
    #[error("user {user_id} is not the current custodian of fiche {numero}")]
    NotCustodian {
        /// The fiche number.
        numero: String,
        /// The acting user.
        user_id: String,
    },

    /// The acting principal is not the proposed next custodian.
    #[error("user {user_id} is not the proposed recipient of fiche {numero}")]
    NotProposedRecipient {
        /// The fiche number.
        numero: String,
        /// The acting user.
        user_id: String,
    },

    /// The acting account is deactivated.
    #[error("account {user_id} is not activated")]
    NotActivated {
        /// The acting user.
        user_id: String,
    },

    /// A proposal already awaits confirmation.
    #[error("fiche {numero} already has a pending transfer")]
    TransferAlreadyPending {
        /// The fiche number.
        numero: String,
    },

    /// Confirm or reject called with no pending proposal.
    #[error("fiche {numero} has no pending transfer")]
    NoPendingTransfer {
        /// The fiche number.
        numero: String,
    },

    /// The proposed owner reference does not name a concrete custodian.
    #[error("proposed next owner for fiche {numero} is not fully populated")]
    IncompleteOwnerRef {
        /// The fiche number.
        numero: String,
    },

    /// A role-specific completeness gate failed.
    ///
    /// Surfaced with the specific missing field, never as a generic
    /// failure.
    #[error("fiche {numero}: cannot propose transfer, missing {field}")]
    MissingPrecondition {
        /// The fiche number.
        numero: String,
        /// The field the gate found missing.
        field: &'static str,
    },

    /// Close attempted by a non-SVI custodian.
    #[error("fiche {numero}: only the SVI may close, current role is {role}")]
    CloseRequiresSvi {
        /// The fiche number.
        numero: String,
        /// The role that attempted the close.
        role: Role,
    },

    /// Close attempted while carcasses lack a terminal status.
    #[error("fiche {numero}: cannot close, carcasses not yet decided: {}", bracelets.join(", "))]
    UnresolvedCarcasses {
        /// The fiche number.
        numero: String,
        /// Bracelets still pending or under review.
        bracelets: Vec<String>,
    },

    /// The handoff episode already finished its check.
    #[error("episode {episode_id} is already finished")]
    EpisodeFinished {
        /// The episode id.
        episode_id: String,
    },

    /// Optimistic custody check failed: the fiche changed since it was
    /// fetched.
    #[error("fiche {numero} changed concurrently (expected version {expected}, found {actual})")]
    VersionConflict {
        /// The fiche number.
        numero: String,
        /// Version the caller based its transition on.
        expected: u64,
        /// Version actually stored.
        actual: u64,
    },
}
