//! The replay loop.
//!
//! On reconnect the client walks its outbox in queue order and, per entry:
//! fetches the authoritative copy, merges the queued patch field-wise onto
//! it, and pushes the merged entity as an idempotent upsert. Outcomes:
//!
//! - **applied** — entry removed, cache refreshed;
//! - **conflict** — the server copy moved mid-replay: refetch, re-merge,
//!   retry once; a second conflict defers the entry to the next pass;
//! - **not found** — the entity is gone: the queued edit is discarded
//!   after surfacing, never retried forever;
//! - **transport failure** — the entry stays queued for the next pass.

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use venaison_core::keys::EntityKey;
use venaison_core::merge::merge_value;

use crate::cache::ReadModelCache;
use crate::outbox::{Outbox, OutboxEntry, OutboxError};

/// The server acknowledged or rejected one push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The merged entity was stored.
    Applied,
    /// The entity changed since the fetch; refetch and re-merge.
    Conflict,
    /// The entity no longer exists.
    NotFound,
}

/// The round trip itself failed (no connectivity, daemon down).
#[derive(Debug, Clone, Error)]
#[error("transport unavailable: {0}")]
pub struct TransportError(pub String);

/// The client/server boundary the sync loop replays through.
///
/// Every call crosses the network and must tolerate arbitrary delay or
/// total failure; the outbox retains the patch whenever a call fails.
pub trait Transport {
    /// Fetches the authoritative copy of an entity.
    fn fetch(&mut self, key: &EntityKey) -> Result<Option<Value>, TransportError>;

    /// Pushes a merged entity as an idempotent upsert.
    fn push(&mut self, entry: &OutboxEntry, merged: &Value)
    -> Result<PushOutcome, TransportError>;
}

/// What one sync pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Entries applied and removed.
    pub applied: u32,
    /// Entries that hit a conflict and were re-merged successfully.
    pub conflicts_resolved: u32,
    /// Entities whose queued edit was discarded because the server copy is
    /// gone. Surfaced so the user learns their edit did not land.
    pub discarded: Vec<EntityKey>,
    /// Entries left queued for the next pass (transport failure or
    /// repeated conflict).
    pub deferred: u32,
}

/// The offline sync engine: outbox + read-model cache + replay.
pub struct SyncEngine {
    outbox: Outbox,
    cache: ReadModelCache,
}

impl SyncEngine {
    /// Builds an engine over an outbox.
    #[must_use]
    pub fn new(outbox: Outbox) -> Self {
        Self {
            outbox,
            cache: ReadModelCache::new(),
        }
    }

    /// The outbox.
    #[must_use]
    pub const fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// The read-model cache.
    #[must_use]
    pub const fn cache(&self) -> &ReadModelCache {
        &self.cache
    }

    /// Replays every pending entry once.
    pub fn sync_once(&mut self, transport: &mut dyn Transport) -> Result<SyncReport, OutboxError> {
        let mut report = SyncReport::default();
        for entry in self.outbox.pending()? {
            self.replay_entry(transport, &entry, &mut report)?;
        }
        info!(
            applied = report.applied,
            deferred = report.deferred,
            discarded = report.discarded.len(),
            "sync pass finished"
        );
        Ok(report)
    }

    fn replay_entry(
        &mut self,
        transport: &mut dyn Transport,
        entry: &OutboxEntry,
        report: &mut SyncReport,
    ) -> Result<(), OutboxError> {
        // One refetch after a conflict, then defer: blind retries against a
        // hot entity would starve the rest of the queue.
        for attempt in 0..2 {
            let server = match transport.fetch(&entry.key) {
                Ok(server) => server,
                Err(err) => {
                    debug!(key = %entry.key, error = %err, "fetch failed, entry retained");
                    report.deferred += 1;
                    return Ok(());
                }
            };
            let Some(server) = server else {
                warn!(key = %entry.key, "server copy is gone, discarding queued edit");
                self.outbox.remove(entry.op_id)?;
                self.cache.remove(&entry.key);
                report.discarded.push(entry.key.clone());
                return Ok(());
            };

            let merged = match merge_value(&server, &entry.patch) {
                Ok(merged) => merged,
                Err(err) => {
                    // A non-object server copy is a server bug; keep the
                    // entry so the problem stays visible.
                    warn!(key = %entry.key, error = %err, "merge failed, entry retained");
                    report.deferred += 1;
                    return Ok(());
                }
            };

            match transport.push(entry, &merged) {
                Ok(PushOutcome::Applied) => {
                    self.outbox.remove(entry.op_id)?;
                    self.cache.apply(entry.key.clone(), merged);
                    report.applied += 1;
                    if attempt > 0 {
                        report.conflicts_resolved += 1;
                    }
                    return Ok(());
                }
                Ok(PushOutcome::Conflict) => {
                    debug!(key = %entry.key, attempt, "push conflicted, refetching");
                    self.outbox.bump_attempts(entry.op_id)?;
                    // Loop: refetch and re-merge against the newer copy.
                }
                Ok(PushOutcome::NotFound) => {
                    warn!(key = %entry.key, "entity vanished during push, discarding");
                    self.outbox.remove(entry.op_id)?;
                    self.cache.remove(&entry.key);
                    report.discarded.push(entry.key.clone());
                    return Ok(());
                }
                Err(err) => {
                    debug!(key = %entry.key, error = %err, "push failed, entry retained");
                    report.deferred += 1;
                    return Ok(());
                }
            }
        }
        report.deferred += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use venaison_core::identity::Role;
    use venaison_core::merge::FieldPatch;

    use super::*;

    /// Fake server: entity map plus scripted failure behavior.
    #[derive(Default)]
    struct FakeServer {
        entities: HashMap<EntityKey, Value>,
        push_log: Vec<EntityKey>,
        conflicts_remaining: u32,
        offline: bool,
    }

    impl Transport for FakeServer {
        fn fetch(&mut self, key: &EntityKey) -> Result<Option<Value>, TransportError> {
            if self.offline {
                return Err(TransportError("offline".to_string()));
            }
            Ok(self.entities.get(key).cloned())
        }

        fn push(
            &mut self,
            entry: &OutboxEntry,
            merged: &Value,
        ) -> Result<PushOutcome, TransportError> {
            if self.offline {
                return Err(TransportError("offline".to_string()));
            }
            if !self.entities.contains_key(&entry.key) {
                return Ok(PushOutcome::NotFound);
            }
            if self.conflicts_remaining > 0 {
                self.conflicts_remaining -= 1;
                // Another actor advanced the entity under the client.
                if let Some(Value::Object(map)) = self.entities.get_mut(&entry.key) {
                    map.insert("row_version".to_string(), json!(99));
                }
                return Ok(PushOutcome::Conflict);
            }
            self.entities.insert(entry.key.clone(), merged.clone());
            self.push_log.push(entry.key.clone());
            Ok(PushOutcome::Applied)
        }
    }

    fn ts(secs: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn engine_with(entries: &[(&EntityKey, Role, FieldPatch, i64)]) -> SyncEngine {
        let outbox = Outbox::in_memory().unwrap();
        for (key, role, patch, at) in entries {
            outbox.queue(key, *role, patch.clone(), ts(*at)).unwrap();
        }
        SyncEngine::new(outbox)
    }

    #[test]
    fn replay_applies_in_queue_order_and_refreshes_cache() {
        let fiche_key = EntityKey::fiche("F-1");
        let carcass_key = EntityKey::carcass("F-1", "B-1");
        let mut engine = engine_with(&[
            (
                &fiche_key,
                Role::ExaminateurInitial,
                FieldPatch::new().with("kill_commune", json!("Vendeuvre")),
                10,
            ),
            (
                &carcass_key,
                Role::ExaminateurInitial,
                FieldPatch::new().with("species", json!("Chevreuil")),
                20,
            ),
        ]);
        let mut server = FakeServer::default();
        server.entities.insert(
            fiche_key.clone(),
            json!({"numero": "F-1", "kill_commune": "Mailly", "row_version": 4}),
        );
        server.entities.insert(
            carcass_key.clone(),
            json!({"bracelet": "B-1", "species": "Daim"}),
        );

        let report = engine.sync_once(&mut server).unwrap();
        assert_eq!(report.applied, 2);
        assert_eq!(report.deferred, 0);
        assert_eq!(server.push_log, vec![fiche_key.clone(), carcass_key.clone()]);
        // Server progress the patch did not touch survived the merge.
        assert_eq!(server.entities[&fiche_key]["row_version"], 4);
        assert_eq!(server.entities[&fiche_key]["kill_commune"], "Vendeuvre");
        assert_eq!(
            engine.cache().get(&fiche_key).unwrap()["kill_commune"],
            "Vendeuvre"
        );
        assert!(engine.outbox().is_empty().unwrap());
    }

    #[test]
    fn conflict_triggers_refetch_and_retry() {
        let key = EntityKey::fiche("F-1");
        let mut engine = engine_with(&[(
            &key,
            Role::ExaminateurInitial,
            FieldPatch::new().with("kill_commune", json!("Vendeuvre")),
            10,
        )]);
        let mut server = FakeServer::default();
        server
            .entities
            .insert(key.clone(), json!({"numero": "F-1", "row_version": 1}));
        server.conflicts_remaining = 1;

        let report = engine.sync_once(&mut server).unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(report.conflicts_resolved, 1);
        // The re-merge was based on the advanced server copy.
        assert_eq!(server.entities[&key]["row_version"], 99);
        assert_eq!(server.entities[&key]["kill_commune"], "Vendeuvre");
    }

    #[test]
    fn repeated_conflict_defers_the_entry() {
        let key = EntityKey::fiche("F-1");
        let mut engine = engine_with(&[(
            &key,
            Role::ExaminateurInitial,
            FieldPatch::new().with("kill_commune", json!("Vendeuvre")),
            10,
        )]);
        let mut server = FakeServer::default();
        server
            .entities
            .insert(key.clone(), json!({"numero": "F-1"}));
        server.conflicts_remaining = 5;

        let report = engine.sync_once(&mut server).unwrap();
        assert_eq!(report.applied, 0);
        assert_eq!(report.deferred, 1);
        // Still queued for the next pass.
        assert_eq!(engine.outbox().len().unwrap(), 1);
        assert!(engine.outbox().pending().unwrap()[0].attempts >= 2);
    }

    #[test]
    fn not_found_discards_and_surfaces() {
        let key = EntityKey::fiche("F-GONE");
        let mut engine = engine_with(&[(
            &key,
            Role::ExaminateurInitial,
            FieldPatch::new().with("kill_commune", json!("Vendeuvre")),
            10,
        )]);
        let mut server = FakeServer::default();

        let report = engine.sync_once(&mut server).unwrap();
        assert_eq!(report.applied, 0);
        assert_eq!(report.discarded, vec![key]);
        // Discarded, not retried forever.
        assert!(engine.outbox().is_empty().unwrap());
    }

    #[test]
    fn transport_failure_retains_the_queue() {
        let key = EntityKey::fiche("F-1");
        let mut engine = engine_with(&[(
            &key,
            Role::ExaminateurInitial,
            FieldPatch::new().with("kill_commune", json!("Vendeuvre")),
            10,
        )]);
        let mut server = FakeServer {
            offline: true,
            ..FakeServer::default()
        };

        let report = engine.sync_once(&mut server).unwrap();
        assert_eq!(report.applied, 0);
        assert_eq!(report.deferred, 1);
        assert_eq!(engine.outbox().len().unwrap(), 1);

        // Connectivity returns; the retained entry lands.
        server.offline = false;
        server
            .entities
            .insert(key.clone(), json!({"numero": "F-1"}));
        let report = engine.sync_once(&mut server).unwrap();
        assert_eq!(report.applied, 1);
        assert!(engine.outbox().is_empty().unwrap());
    }
}
