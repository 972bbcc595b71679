//! Tests for the record store.

use chrono::{NaiveDate, TimeZone, Utc};
use venaison_core::carcass::Carcass;
use venaison_core::custody::HandoffEpisode;
use venaison_core::dispatch::CarcassRouting;
use venaison_core::fiche::Fiche;
use venaison_core::identity::{OwnerRef, Role};
use venaison_core::ledger::{Decision, InspectionRecord};

use super::{Page, SqliteStore, StoreError};

fn ts(secs: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn fiche(numero: &str) -> Fiche {
    Fiche::new(
        numero,
        NaiveDate::from_ymd_opt(2025, 11, 2).unwrap(),
        "Mailly-le-Camp",
        OwnerRef::for_user(Role::ExaminateurInitial, "u-exam"),
        ts(0),
    )
}

fn routed(bracelet: &str, entity: &str, at: i64) -> Carcass {
    let mut c = Carcass::new(bracelet, "F-1", "Daim", ts(at));
    let routing = CarcassRouting {
        recipient_kind: venaison_core::carcass::RecipientKind::Etg,
        recipient_entity_id: entity.to_string(),
        recipient_name: format!("ETG {entity}"),
        depot_kind: None,
        depot_entity_id: None,
        deposited_on: None,
        transport_mode: None,
        transport_date: None,
    };
    routing.apply(&mut c, ts(at));
    c
}

#[test]
fn fiche_upsert_is_idempotent() {
    let store = SqliteStore::in_memory().unwrap();
    let f = fiche("F-1");
    store.put_fiche(&f).unwrap();
    store.put_fiche(&f).unwrap();
    let back = store.get_fiche("F-1").unwrap().unwrap();
    assert_eq!(back, f);
    assert!(store.get_fiche("F-404").unwrap().is_none());
}

#[test]
fn cas_put_detects_concurrent_movement() {
    let store = SqliteStore::in_memory().unwrap();
    let mut f = fiche("F-1");
    store.put_fiche(&f).unwrap();

    // Winner advances the row from version 0.
    f.row_version = 1;
    f.updated_at = ts(10);
    store.cas_put_fiche(&f, 0).unwrap();

    // Loser based its transition on the stale version 0.
    let mut stale = fiche("F-1");
    stale.row_version = 1;
    stale.updated_at = ts(11);
    let err = store.cas_put_fiche(&stale, 0).unwrap_err();
    match err {
        StoreError::VersionConflict {
            expected, actual, ..
        } => {
            assert_eq!(expected, 0);
            assert_eq!(actual, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn cas_put_on_missing_fiche_is_not_found() {
    let store = SqliteStore::in_memory().unwrap();
    let f = fiche("F-404");
    let err = store.cas_put_fiche(&f, 0).unwrap_err();
    assert!(matches!(err, StoreError::FicheNotFound { .. }));
}

#[test]
fn visible_set_follows_dispatch_stamps() {
    let store = SqliteStore::in_memory().unwrap();
    store.put_fiche(&fiche("F-1")).unwrap();
    store.put_carcass(&routed("B-1", "etg-1", 10)).unwrap();
    store.put_carcass(&routed("B-2", "etg-1", 10)).unwrap();
    store.put_carcass(&routed("B-3", "etg-2", 10)).unwrap();
    store.put_carcass(&routed("B-4", "etg-2", 10)).unwrap();

    let ep1 = HandoffEpisode::open("F-1", Role::Etg, "u-1", Some("etg-1".to_string()), ts(20));
    let visible: Vec<String> = store
        .list_visible_carcasses(&ep1)
        .unwrap()
        .into_iter()
        .map(|c| c.bracelet)
        .collect();
    assert_eq!(visible, vec!["B-1".to_string(), "B-2".to_string()]);

    // The SVI sees everything.
    let svi = HandoffEpisode::open("F-1", Role::Svi, "u-svi", Some("svi-1".to_string()), ts(30));
    assert_eq!(store.list_visible_carcasses(&svi).unwrap().len(), 4);
}

#[test]
fn deleted_carcasses_are_filtered_unless_requested() {
    let store = SqliteStore::in_memory().unwrap();
    let mut c = routed("B-1", "etg-1", 10);
    c.soft_delete(ts(20));
    store.put_carcass(&c).unwrap();
    store.put_carcass(&routed("B-2", "etg-1", 10)).unwrap();

    assert_eq!(store.list_carcasses("F-1", false).unwrap().len(), 1);
    assert_eq!(store.list_carcasses("F-1", true).unwrap().len(), 2);
}

#[test]
fn registry_listing_filters_by_modification_date() {
    let store = SqliteStore::in_memory().unwrap();
    store.put_carcass(&routed("B-1", "etg-1", 100)).unwrap();
    store.put_carcass(&routed("B-2", "etg-1", 200)).unwrap();
    store.put_carcass(&routed("B-3", "etg-2", 300)).unwrap();

    let recent = store
        .list_carcasses_for_authority("etg-1", Some(ts(150)), false, Page::default())
        .unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].bracelet, "B-2");

    let all = store
        .list_carcasses_for_authority("etg-1", None, false, Page::default())
        .unwrap();
    assert_eq!(all.len(), 2);

    let paged = store
        .list_carcasses_for_authority("etg-1", None, false, Page { limit: 1, offset: 1 })
        .unwrap();
    assert_eq!(paged.len(), 1);
}

#[test]
fn decision_write_is_transactional_with_mirror() {
    let store = SqliteStore::in_memory().unwrap();
    let mut carcass = routed("B-1", "etg-1", 10);
    store.put_carcass(&carcass).unwrap();

    let mut record = InspectionRecord::pending("F-1", "B-1", "ep-1", ts(20));
    record.record(
        Decision::Refused {
            reason: "Présence de souillures".to_string(),
        },
        None,
        "u-etg",
        ts(21),
    );
    let mirror = venaison_core::ledger::CarcassMirror::from_record(&record);
    mirror.apply(&mut carcass, ts(21));

    store.put_decision(&record, &carcass).unwrap();

    let stored_record = store.get_inspection("F-1", "B-1", "ep-1").unwrap().unwrap();
    assert!(stored_record.decision.is_refused());
    let stored_carcass = store.get_carcass("F-1", "B-1").unwrap().unwrap();
    assert_eq!(
        stored_carcass.refusal_reason.as_deref(),
        Some("Présence de souillures")
    );
}

#[test]
fn episodes_list_most_recent_first() {
    let store = SqliteStore::in_memory().unwrap();
    let e1 = HandoffEpisode::open("F-1", Role::Ccg, "u-1", Some("ccg-1".to_string()), ts(10));
    let e2 = HandoffEpisode::open("F-1", Role::Etg, "u-2", Some("etg-1".to_string()), ts(20));
    store.put_episode(&e1).unwrap();
    store.put_episode(&e2).unwrap();

    let trail = store.list_episodes("F-1").unwrap();
    assert_eq!(trail.len(), 2);
    assert_eq!(trail[0].id, e2.id);
    assert_eq!(trail[1].id, e1.id);
}

#[test]
fn store_survives_reopen_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("venaison.db");
    {
        let store = SqliteStore::open(&path).unwrap();
        store.put_fiche(&fiche("F-1")).unwrap();
    }
    let store = SqliteStore::open(&path).unwrap();
    assert!(store.get_fiche("F-1").unwrap().is_some());
}
