//! Tests for the inspection ledger.

use chrono::{TimeZone, Utc};

use super::record::{CarcassMirror, Decision, InspectionRecord, check_close_out};
use super::LedgerError;
use crate::carcass::Carcass;

fn ts(secs: i64) -> chrono::DateTime<chrono::Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

#[test]
fn materialized_record_is_pending() {
    let record = InspectionRecord::pending("F-1", "B-1", "ep-1", ts(10));
    assert!(record.decision.is_pending());
    assert!(record.recorded_by.is_none());
    assert_eq!(record.key().to_string(), "inspection/F-1/B-1/ep-1");
}

#[test]
fn decision_change_leaves_no_residual_reason() {
    let mut record = InspectionRecord::pending("F-1", "B-1", "ep-1", ts(10));
    record.record(
        Decision::Refused {
            reason: "Présence de souillures".to_string(),
        },
        Some("souillé".to_string()),
        "u-etg",
        ts(20),
    );
    assert!(record.decision.is_refused());

    record.record(Decision::Accepted, None, "u-etg", ts(30));
    assert!(record.decision.is_accepted());
    // The whole decision value was swapped; no refusal reason survives.
    assert!(!matches!(record.decision, Decision::Refused { .. }));
    assert!(record.comment.is_none());
    assert_eq!(record.updated_at, ts(30));
}

#[test]
fn mirror_projection_per_decision() {
    let mut record = InspectionRecord::pending("F-1", "B-1", "ep-1", ts(10));
    assert_eq!(CarcassMirror::from_record(&record), CarcassMirror::default());

    record.record(
        Decision::Refused {
            reason: "Présence de souillures".to_string(),
        },
        None,
        "u-etg",
        ts(20),
    );
    let mirror = CarcassMirror::from_record(&record);
    assert_eq!(
        mirror.refusal_reason.as_deref(),
        Some("Présence de souillures")
    );
    assert_eq!(mirror.refused_by_episode.as_deref(), Some("ep-1"));
    assert!(!mirror.reported_missing);
    assert_eq!(mirror.decision_signed_at, Some(ts(20)));

    record.record(Decision::Missing, None, "u-etg", ts(30));
    let mirror = CarcassMirror::from_record(&record);
    assert!(mirror.refusal_reason.is_none());
    assert!(mirror.reported_missing);
}

#[test]
fn mirror_apply_is_idempotent() {
    let mut record = InspectionRecord::pending("F-1", "B-1", "ep-1", ts(10));
    record.record(
        Decision::Refused {
            reason: "Odeur anormale".to_string(),
        },
        None,
        "u-etg",
        ts(20),
    );
    let mirror = CarcassMirror::from_record(&record);

    let mut carcass = Carcass::new("B-1", "F-1", "Daim", ts(5));
    mirror.apply(&mut carcass, ts(21));
    let first = carcass.clone();
    mirror.apply(&mut carcass, ts(22));
    // Same inputs, same result (modulo the bookkeeping timestamp).
    let mut second = carcass.clone();
    second.updated_at = first.updated_at;
    assert_eq!(second, first);
}

#[test]
fn two_intermediaries_never_interfere() {
    let mut first = InspectionRecord::pending("F-1", "B-1", "ep-ccg", ts(10));
    let mut second = InspectionRecord::pending("F-1", "B-1", "ep-etg", ts(40));

    first.record(Decision::Accepted, None, "u-ccg", ts(20));
    second.record(
        Decision::Refused {
            reason: "Présence de souillures".to_string(),
        },
        None,
        "u-etg",
        ts(50),
    );

    // Keys differ by episode; both decisions stand.
    assert_ne!(first.key(), second.key());
    assert!(first.decision.is_accepted());
    assert!(second.decision.is_refused());
}

#[test]
fn close_out_rejected_while_undecided() {
    let visible = vec!["B-1".to_string(), "B-2".to_string(), "B-3".to_string()];
    let mut r1 = InspectionRecord::pending("F-1", "B-1", "ep-1", ts(10));
    r1.record(Decision::Accepted, None, "u", ts(20));
    let r2 = InspectionRecord::pending("F-1", "B-2", "ep-1", ts(10));
    // B-3 has no record at all; it counts as undecided too.

    let err = check_close_out(&visible, &[r1.clone(), r2.clone()]).unwrap_err();
    match err {
        LedgerError::UndecidedCarcasses { bracelets } => {
            assert_eq!(bracelets, vec!["B-2".to_string(), "B-3".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn close_out_passes_once_all_decided() {
    let visible = vec!["B-1".to_string(), "B-2".to_string()];
    let mut r1 = InspectionRecord::pending("F-1", "B-1", "ep-1", ts(10));
    r1.record(Decision::Accepted, None, "u", ts(20));
    let mut r2 = InspectionRecord::pending("F-1", "B-2", "ep-1", ts(10));
    r2.record(Decision::Missing, None, "u", ts(25));

    assert!(check_close_out(&visible, &[r1, r2]).is_ok());
}

#[test]
fn close_out_only_counts_own_records() {
    // A decision by another episode does not decide for this one.
    let visible = vec!["B-1".to_string()];
    let mut other = InspectionRecord::pending("F-1", "B-1", "ep-other", ts(10));
    other.record(Decision::Accepted, None, "u", ts(20));

    // The caller passes only the records of the episode being closed, so an
    // empty slice means B-1 is undecided for it.
    let err = check_close_out(&visible, &[]).unwrap_err();
    assert!(matches!(err, LedgerError::UndecidedCarcasses { .. }));
    drop(other);
}
