//! The movement document ("fiche") for one hunting event.
//!
//! A fiche carries the kill metadata and the three owner pointers the
//! custody state machine mutates: `current_owner` (always fully populated),
//! `next_owner` (populated only while a transfer is pending) and
//! `prev_owner`. Once the SVI closing timestamp is set the fiche is
//! terminal and read-only.
//!
//! Owner pointers are only ever mutated through [`crate::custody`]; the
//! `row_version` field is the optimistic-concurrency token the server
//! checks before applying any custody transition.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::OwnerRef;

/// The movement document for one hunting event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fiche {
    /// Unique fiche number.
    pub numero: String,
    /// Date of the kill.
    pub kill_date: NaiveDate,
    /// Municipality of the kill.
    pub kill_commune: String,
    /// Time of kill of the first carcass.
    pub first_kill_time: Option<NaiveTime>,
    /// Time of evisceration of the last carcass.
    pub last_evisceration_time: Option<NaiveTime>,

    /// The single current custodian. Always fully populated.
    pub current_owner: OwnerRef,
    /// Proposed next custodian; `Some` only while a transfer is pending.
    pub next_owner: Option<OwnerRef>,
    /// Previous custodian, kept for the audit trail.
    pub prev_owner: Option<OwnerRef>,
    /// Set when the current custodian wants to hand off to a third party
    /// instead of keeping custody.
    pub current_owner_wants_to_transfer: bool,

    /// Initial examiner's market-release approval.
    pub market_release_approved: Option<bool>,
    /// Approval signature timestamp.
    pub market_release_signed_at: Option<DateTime<Utc>>,

    /// Veterinary closing signature; terminal once set.
    pub svi_closed_at: Option<DateTime<Utc>>,

    /// Optimistic-concurrency token, bumped on every custody mutation.
    pub row_version: u64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Fiche {
    /// Creates a fiche under the initial examiner's custody.
    #[must_use]
    pub fn new(
        numero: impl Into<String>,
        kill_date: NaiveDate,
        kill_commune: impl Into<String>,
        examiner: OwnerRef,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            numero: numero.into(),
            kill_date,
            kill_commune: kill_commune.into(),
            first_kill_time: None,
            last_evisceration_time: None,
            current_owner: examiner,
            next_owner: None,
            prev_owner: None,
            current_owner_wants_to_transfer: false,
            market_release_approved: None,
            market_release_signed_at: None,
            svi_closed_at: None,
            row_version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the veterinary sign-off made the fiche read-only.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.svi_closed_at.is_some()
    }

    /// Whether a transfer proposal is pending confirmation.
    #[must_use]
    pub const fn transfer_pending(&self) -> bool {
        self.next_owner.is_some()
    }

    /// Records the examiner's market-release approval.
    pub fn approve_market_release(&mut self, now: DateTime<Utc>) {
        self.market_release_approved = Some(true);
        self.market_release_signed_at = Some(now);
        self.updated_at = now;
    }

    /// Single-custodian invariant: the current owner names a role and at
    /// least one concrete id, and the pending pointer is either absent or
    /// itself fully populated — never partial.
    #[must_use]
    pub fn custody_invariant_holds(&self) -> bool {
        self.current_owner.is_fully_populated()
            && self
                .next_owner
                .as_ref()
                .is_none_or(OwnerRef::is_fully_populated)
    }
}
