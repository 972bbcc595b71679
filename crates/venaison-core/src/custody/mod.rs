//! The fiche-level custody state machine and handoff episodes.
//!
//! Exactly one `(role, user|entity)` pair holds custody of a fiche at any
//! time. Transfers are two-phase: the current custodian proposes a next
//! custodian, who then confirms (taking charge) or rejects (bouncing the
//! fiche back). Confirmation under a decision-recording role atomically
//! opens a [`HandoffEpisode`].
//!
//! # Transitions
//!
//! ```text
//! propose ----> (transfer pending) ----> confirm: prev <- current <- next
//!    ^                 |
//!    |                 +--> reject: next cleared, custody unchanged
//!    +-- re-propose (wants-to-transfer), custody unchanged
//!
//! close (SVI, all carcasses terminal) ----> fiche read-only
//! ```
//!
//! Every transition is guarded: only the current custodian proposes, only
//! the proposed recipient confirms or rejects, and role-specific
//! completeness gates must pass before a proposal is legal. Gate failures
//! name the exact missing precondition.
//!
//! The machine itself is pure; the server applies `confirm` with a single
//! check-then-set on the fiche row version and surfaces a conflict instead
//! of merging when the custody pointer moved underneath the caller.

mod episode;
mod error;
mod machine;


pub use episode::HandoffEpisode;
pub use error::CustodyError;
pub use machine::{
    TransferGate, close_fiche, confirm_transfer, propose_transfer, reject_transfer,
    repropose_to_third_party,
};
