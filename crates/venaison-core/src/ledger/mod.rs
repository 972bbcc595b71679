//! Intermediary inspection ledger.
//!
//! Each handling party records its own accept/refuse/missing decision about
//! each carcass it can see. Records are keyed by (fiche, bracelet, handoff
//! episode), so two intermediaries deciding about the same carcass never
//! overwrite each other.
//!
//! # Key Concepts
//!
//! - **Record materialization**: a record is created in the `Pending` state
//!   for every visible carcass when the intermediary confirms custody — an
//!   explicit ensure-record step, never a lazy client-side side effect.
//! - **Full replacement**: changing a decision replaces the decision fields
//!   in one update; a refusal reason never survives a change to accepted.
//! - **Mirror projection**: every decision write also rebuilds the
//!   carcass's denormalized refusal/missing fields from the record. The
//!   record stays authoritative; the mirror is a read-optimized cache and
//!   the write is idempotent.
//! - **Close-out gate**: an episode can only finish when no visible carcass
//!   is still under review.

mod error;
mod record;

#[cfg(test)]
mod tests;

pub use error::LedgerError;
pub use record::{CarcassMirror, Decision, InspectionRecord, check_close_out};
