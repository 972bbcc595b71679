//! Offline merge engine.
//!
//! Clients accumulate edits while disconnected and reconcile on reconnect.
//! The reconciliation is field-level, last-writer-wins per field: every
//! field present in the local patch overwrites the server value, every
//! field absent is taken verbatim from the server copy. The patch is built
//! from an explicit per-role allow-list — unknown or disallowed fields are
//! dropped silently, so stale client code cannot corrupt fields it does not
//! understand.
//!
//! The merged entity is sent as a single idempotent upsert keyed by the
//! entity's immutable business key. Applying the same patch twice produces
//! the same stored state: there are no counters and no appends without
//! dedup on this path. Custody transitions do NOT go through here — they
//! are non-commutative and use the server's check-then-set instead.

mod allow_list;
mod error;
mod patch;

#[cfg(test)]
mod tests;

pub use allow_list::{allowed_carcass_fields, allowed_fiche_fields, allowed_inspection_fields};
pub use error::MergeError;
pub use patch::{FieldPatch, merge, merge_value};
