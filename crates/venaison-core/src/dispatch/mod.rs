//! Dispatch/split engine.
//!
//! The current holder partitions its carcasses into disjoint groups, each
//! routed to a different simultaneous next custodian with its own depot and
//! transport metadata. Exclusivity is enforced by the assignment operation
//! itself — moving a carcass into a group removes it from any other — not
//! by a separate validation pass.
//!
//! The legacy single-recipient path is the degenerate one-group case: at
//! submission only group 0's recipient is mirrored onto the fiche's own
//! `next_owner` pointer, while every group stamps its routing onto its own
//! carcasses. The stamps, not the mirrored pointer, are what downstream
//! visibility is derived from.

mod error;
mod plan;


pub use error::DispatchError;
pub use plan::{
    CarcassRouting, DepotSpec, DispatchGroup, DispatchPlan, GroupSubmission, RecipientRef,
    SubmissionPlan, TransportSpec,
};
