//! Carcass model and the pure status resolver.
//!
//! A carcass (or homogeneous small-game lot) is created by the initial
//! examiner with nothing but a bracelet number, then accumulates facts
//! written by different roles at different times: examiner findings,
//! first-holder routing, intermediary decisions mirrored from the
//! inspection ledger, veterinary seizure, soft deletion.
//!
//! The effective state of a carcass is never stored; it is derived by
//! [`resolve_status`] from those accumulated facts. The denormalized mirror
//! fields on the carcass exist for read performance only and are rebuilt
//! from the authoritative ledger on every decision write.
//!
//! # Status priority
//!
//! ```text
//! Deleted > Seized > Missing > Refused > Accepted > UnderReview > PendingExamination
//! ```
//!
//! Facts can coexist (a seized carcass may also carry a refusal); the total
//! order above decides which one wins.

mod error;
mod state;
mod status;

#[cfg(test)]
mod tests;

pub use error::CarcassError;
pub use state::{Carcass, DepotKind, RecipientKind, TransportMode};
pub use status::{CarcassStatus, resolve_status};
