//! Tests for the carcass model and status resolver.

use chrono::{DateTime, TimeZone, Utc};

use super::error::CarcassError;
use super::state::Carcass;
use super::status::{CarcassStatus, resolve_status};
use crate::ledger::{Decision, InspectionRecord};

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn carcass() -> Carcass {
    Carcass::new("B-1", "F-1", "Daim", ts(0))
}

fn record(episode: &str, decision: Decision, at: i64) -> InspectionRecord {
    let mut r = InspectionRecord::pending("F-1", "B-1", episode, ts(at));
    if !decision.is_pending() {
        r.record(decision, None, "user", ts(at));
    }
    r
}

// =============================================================================
// Model invariants
// =============================================================================

#[test]
fn findings_conflict_with_no_abnormality_flag() {
    let mut c = carcass();
    let err = c
        .record_findings(vec!["abcès".to_string()], Vec::new(), true, ts(10))
        .unwrap_err();
    assert!(matches!(err, CarcassError::FindingsConflict { .. }));
    // Either side alone is fine.
    c.record_findings(vec!["abcès".to_string()], Vec::new(), false, ts(10))
        .unwrap();
    assert!(c.is_examined());
    c.record_findings(Vec::new(), Vec::new(), true, ts(11)).unwrap();
    assert!(c.no_abnormality);
}

#[test]
fn seizure_requires_reasons() {
    let mut c = carcass();
    let err = c.seize(Vec::new(), None, ts(10)).unwrap_err();
    assert!(matches!(err, CarcassError::SeizureWithoutReason { .. }));
    c.seize(vec!["tuberculose".to_string()], Some("ganglions".to_string()), ts(10))
        .unwrap();
    assert!(c.svi_seized);
}

#[test]
fn deleted_carcass_rejects_writes() {
    let mut c = carcass();
    c.soft_delete(ts(10));
    let err = c
        .record_findings(Vec::new(), Vec::new(), true, ts(11))
        .unwrap_err();
    assert!(matches!(err, CarcassError::Deleted { .. }));
}

#[test]
fn zero_head_lot_is_rejected() {
    let err = Carcass::new_lot("B-2", "F-1", "Pigeons", 0, ts(0)).unwrap_err();
    assert!(matches!(err, CarcassError::EmptyLot { .. }));
    let lot = Carcass::new_lot("B-2", "F-1", "Pigeons", 10, ts(0)).unwrap();
    assert_eq!(lot.lot_size, Some(10));
}

// =============================================================================
// Resolver priority order
// =============================================================================

#[test]
fn deleted_wins_over_everything() {
    let mut c = carcass();
    c.seize(vec!["r".to_string()], None, ts(5)).unwrap();
    c.soft_delete(ts(10));
    let records = vec![record("ep-1", Decision::Missing, 20)];
    assert_eq!(resolve_status(&c, &records), CarcassStatus::Deleted);
}

#[test]
fn seized_wins_over_decisions() {
    let mut c = carcass();
    c.seize(vec!["r".to_string()], None, ts(5)).unwrap();
    let records = vec![record("ep-1", Decision::Accepted, 20)];
    assert_eq!(resolve_status(&c, &records), CarcassStatus::Seized);
}

#[test]
fn seizure_flag_without_reasons_does_not_seize() {
    let mut c = carcass();
    c.svi_seized = true; // corrupt cache shape: flag set, no reasons
    assert_eq!(resolve_status(&c, &[]), CarcassStatus::PendingExamination);
}

#[test]
fn missing_wins_over_refusal() {
    let c = carcass();
    let records = vec![
        record(
            "ep-1",
            Decision::Refused {
                reason: "Présence de souillures".to_string(),
            },
            20,
        ),
        record("ep-2", Decision::Missing, 30),
    ];
    assert_eq!(resolve_status(&c, &records), CarcassStatus::Missing);
}

#[test]
fn mirrored_missing_field_counts() {
    let mut c = carcass();
    c.reported_missing = true;
    assert_eq!(resolve_status(&c, &[]), CarcassStatus::Missing);
}

#[test]
fn refused_wins_over_acceptance() {
    let c = carcass();
    let records = vec![
        record("ep-1", Decision::Accepted, 30),
        record(
            "ep-2",
            Decision::Refused {
                reason: "Odeur anormale".to_string(),
            },
            20,
        ),
    ];
    assert_eq!(resolve_status(&c, &records), CarcassStatus::Refused);
}

#[test]
fn latest_touch_decides_between_accepted_and_under_review() {
    let c = carcass();
    // Accepted by the first intermediary, pending at the next one.
    let records = vec![
        record("ep-1", Decision::Accepted, 20),
        record("ep-2", Decision::Pending, 30),
    ];
    assert_eq!(resolve_status(&c, &records), CarcassStatus::UnderReview);

    // Acceptance is the most recent touch.
    let records = vec![
        record("ep-1", Decision::Pending, 10),
        record("ep-1", Decision::Accepted, 40),
    ];
    assert_eq!(resolve_status(&c, &records), CarcassStatus::Accepted);
}

#[test]
fn no_records_resolves_pending_examination() {
    assert_eq!(resolve_status(&carcass(), &[]), CarcassStatus::PendingExamination);
}

// =============================================================================
// Proptest status laws
// =============================================================================

mod proptests {
    use proptest::prelude::*;

    use super::*;

    fn arb_decision() -> impl Strategy<Value = Decision> {
        prop_oneof![
            Just(Decision::Pending),
            Just(Decision::Accepted),
            Just(Decision::Refused {
                reason: "Présence de souillures".to_string()
            }),
            Just(Decision::Missing),
        ]
    }

    fn arb_records() -> impl Strategy<Value = Vec<InspectionRecord>> {
        prop::collection::vec((arb_decision(), 0i64..1000), 0..6).prop_map(|entries| {
            entries
                .into_iter()
                .enumerate()
                .map(|(i, (decision, at))| record(&format!("ep-{i}"), decision, at))
                .collect()
        })
    }

    fn arb_carcass() -> impl Strategy<Value = Carcass> {
        (
            any::<bool>(),
            any::<bool>(),
            any::<bool>(),
            any::<bool>(),
        )
            .prop_map(|(deleted, seized, missing_mirror, refusal_mirror)| {
                let mut c = carcass();
                if deleted {
                    c.soft_delete(ts(1));
                }
                if seized {
                    c.svi_seized = true;
                    c.svi_seizure_reasons = vec!["r".to_string()];
                }
                c.reported_missing = missing_mirror;
                if refusal_mirror {
                    c.refusal_reason = Some("Odeur anormale".to_string());
                }
                c
            })
    }

    proptest! {
        // Total over all reachable fact combinations: resolution never
        // panics and always lands on one of the seven statuses.
        #[test]
        fn resolver_is_total(c in arb_carcass(), records in arb_records()) {
            let status = resolve_status(&c, &records);
            prop_assert!(matches!(
                status,
                CarcassStatus::PendingExamination
                    | CarcassStatus::UnderReview
                    | CarcassStatus::Accepted
                    | CarcassStatus::Refused
                    | CarcassStatus::Missing
                    | CarcassStatus::Seized
                    | CarcassStatus::Deleted
            ));
        }

        // Deterministic given the same facts.
        #[test]
        fn resolver_is_deterministic(c in arb_carcass(), records in arb_records()) {
            prop_assert_eq!(resolve_status(&c, &records), resolve_status(&c, &records));
        }

        // Once seized or deleted, no further decision can move the carcass
        // back to Accepted.
        #[test]
        fn seized_and_deleted_are_sticky(
            c in arb_carcass(),
            records in arb_records(),
            late in arb_decision(),
        ) {
            let before = resolve_status(&c, &records);
            prop_assume!(before == CarcassStatus::Seized || before == CarcassStatus::Deleted);
            let mut later = records;
            later.push(record("ep-late", late, 10_000));
            let after = resolve_status(&c, &later);
            prop_assert_ne!(after, CarcassStatus::Accepted);
            prop_assert_eq!(after, before);
        }
    }
}
