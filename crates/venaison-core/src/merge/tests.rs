//! Tests for the offline merge engine.

use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::{Value, json};

use super::allow_list::{allowed_carcass_fields, allowed_fiche_fields};
use super::patch::{FieldPatch, merge, merge_value};
use crate::carcass::Carcass;
use crate::fiche::Fiche;
use crate::identity::{OwnerRef, Role};

fn server_fiche() -> Fiche {
    Fiche::new(
        "F-1",
        NaiveDate::from_ymd_opt(2025, 11, 2).unwrap(),
        "Mailly-le-Camp",
        OwnerRef::for_user(Role::ExaminateurInitial, "u-exam"),
        Utc.timestamp_opt(1000, 0).unwrap(),
    )
}

// =============================================================================
// Field-level semantics
// =============================================================================

#[test]
fn patched_fields_overwrite_absent_fields_survive() {
    let server = server_fiche();
    let patch = FieldPatch::new().with("kill_commune", json!("Vendeuvre"));
    let merged = merge(&server, &patch).unwrap();
    assert_eq!(merged.kill_commune, "Vendeuvre");
    // Everything else is carried verbatim from the server copy.
    assert_eq!(merged.numero, server.numero);
    assert_eq!(merged.current_owner, server.current_owner);
    assert_eq!(merged.created_at, server.created_at);
}

#[test]
fn merge_against_advanced_server_keeps_server_progress() {
    // Another actor closed the fiche while this client was offline; the
    // client's patch touches an unrelated field and must not clobber the
    // closing timestamp.
    let mut server = server_fiche();
    server.svi_closed_at = Some(Utc.timestamp_opt(5000, 0).unwrap());
    server.row_version = 7;

    let patch = FieldPatch::new().with("first_kill_time", json!("08:45:00"));
    let merged = merge(&server, &patch).unwrap();
    assert_eq!(merged.svi_closed_at, server.svi_closed_at);
    assert_eq!(merged.row_version, 7);
    assert!(merged.first_kill_time.is_some());
}

#[test]
fn allow_list_drops_unknown_and_disallowed_fields() {
    let mut patch = FieldPatch::new()
        .with("kill_commune", json!("Vendeuvre"))
        .with("svi_closed_at", json!("2025-11-05T10:00:00Z"))
        .with("no_such_field", json!(42));
    patch.retain_allowed(allowed_fiche_fields(Role::ExaminateurInitial));
    assert_eq!(patch.len(), 1);
    assert!(patch.get("kill_commune").is_some());
    // Closing timestamp is machine-owned, never patchable.
    assert!(patch.get("svi_closed_at").is_none());
    assert!(patch.get("no_such_field").is_none());
}

#[test]
fn intermediaries_cannot_patch_carcass_mirrors() {
    let mut patch = FieldPatch::new()
        .with("refusal_reason", json!("forged"))
        .with("reported_missing", json!(true));
    patch.retain_allowed(allowed_carcass_fields(Role::Etg));
    assert!(patch.is_empty());
}

#[test]
fn malformed_patched_value_is_rejected() {
    let server = server_fiche();
    let patch = FieldPatch::new().with("kill_date", json!("not-a-date"));
    assert!(merge(&server, &patch).is_err());
}

#[test]
fn coalesce_keeps_latest_local_value() {
    let mut queued = FieldPatch::new()
        .with("kill_commune", json!("Mailly"))
        .with("first_kill_time", json!("08:00:00"));
    let newer = FieldPatch::new().with("kill_commune", json!("Vendeuvre"));
    queued.coalesce(newer);
    assert_eq!(queued.get("kill_commune"), Some(&json!("Vendeuvre")));
    // Untouched queued fields survive the coalesce.
    assert_eq!(queued.get("first_kill_time"), Some(&json!("08:00:00")));
}

#[test]
fn typed_merge_round_trips_a_carcass() {
    let server = Carcass::new("B-1", "F-1", "Daim", Utc.timestamp_opt(1000, 0).unwrap());
    let patch = FieldPatch::new()
        .with("carcass_abnormalities", json!(["abcès"]))
        .with("examined_at", json!("2025-11-02T09:00:00Z"));
    let merged = merge(&server, &patch).unwrap();
    assert_eq!(merged.carcass_abnormalities, vec!["abcès".to_string()]);
    assert!(merged.examined_at.is_some());
    assert_eq!(merged.bracelet, "B-1");
}

// =============================================================================
// Proptest merge laws
// =============================================================================

mod proptests {
    use proptest::prelude::*;

    use super::*;

    fn arb_json_leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[a-z]{0,8}".prop_map(Value::from),
        ]
    }

    fn arb_object() -> impl Strategy<Value = Value> {
        prop::collection::btree_map("[a-z]{1,6}", arb_json_leaf(), 0..8)
            .prop_map(|m| Value::Object(m.into_iter().collect()))
    }

    fn arb_patch() -> impl Strategy<Value = FieldPatch> {
        prop::collection::btree_map("[a-z]{1,6}", arb_json_leaf(), 0..8)
            .prop_map(|m| m.into_iter().collect())
    }

    proptest! {
        // merge(merge(server, patch), patch) == merge(server, patch)
        #[test]
        fn merge_is_idempotent(server in arb_object(), patch in arb_patch()) {
            let once = merge_value(&server, &patch).unwrap();
            let twice = merge_value(&once, &patch).unwrap();
            prop_assert_eq!(once, twice);
        }

        // merge(server, patch) differs from server only in patched fields.
        #[test]
        fn merge_isolates_fields(server in arb_object(), patch in arb_patch()) {
            let merged = merge_value(&server, &patch).unwrap();
            let Value::Object(server_map) = &server else { unreachable!() };
            let Value::Object(merged_map) = &merged else { unreachable!() };

            for (field, value) in merged_map {
                match patch.get(field) {
                    // Patched field: the local value won.
                    Some(patched) => prop_assert_eq!(value, patched),
                    // Untouched field: bit-identical to the server.
                    None => prop_assert_eq!(value, &server_map[field]),
                }
            }
            // No server field disappears.
            for field in server_map.keys() {
                prop_assert!(merged_map.contains_key(field));
            }
        }

        // Last local write wins before transmission.
        #[test]
        fn coalesce_prefers_newer(older in arb_patch(), newer in arb_patch()) {
            let mut queued = older.clone();
            queued.coalesce(newer.clone());
            for (field, value) in newer.iter() {
                prop_assert_eq!(queued.get(field), Some(value));
            }
            for (field, value) in older.iter() {
                if newer.get(field).is_none() {
                    prop_assert_eq!(queued.get(field), Some(value));
                }
            }
        }
    }
}
