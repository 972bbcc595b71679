//! Durable outbox of pending field patches.
//!
//! One row per (entity, acting role): a later local edit to the same entity
//! coalesces field-wise into the queued patch before anything is sent, so
//! only the latest local value of each field ever crosses the wire. Rows
//! replay in queue order per entity key; there is no ordering guarantee
//! across entities.
//!
//! Patches are sanitized against the acting role's allow-list at queue
//! time: a field the role may not touch never even enters the outbox.

#![allow(clippy::missing_panics_doc)]

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;
use venaison_core::identity::Role;
use venaison_core::keys::EntityKey;
use venaison_core::merge::{
    FieldPatch, allowed_carcass_fields, allowed_fiche_fields, allowed_inspection_fields,
};

/// Outbox schema embedded at compile time.
const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS outbox (
    op_id       TEXT PRIMARY KEY,
    entity_key  TEXT NOT NULL,
    acting_role TEXT NOT NULL,
    patch       TEXT NOT NULL,
    queued_at   TEXT NOT NULL,
    attempts    INTEGER NOT NULL DEFAULT 0,
    UNIQUE (entity_key, acting_role)
);
";

/// Errors from outbox operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OutboxError {
    /// Database error from `SQLite`.
    #[error("outbox database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Row (de)serialization error.
    #[error("outbox document error: {0}")]
    Document(#[from] serde_json::Error),

    /// A stored row no longer parses; the local database was tampered with
    /// or written by an incompatible version.
    #[error("outbox row corrupt: {detail}")]
    Corrupt {
        /// What failed to parse.
        detail: String,
    },
}

/// One queued patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEntry {
    /// Client-generated operation id.
    pub op_id: Uuid,
    /// Target entity.
    pub key: EntityKey,
    /// Role under which the patch was built.
    pub acting_role: Role,
    /// The coalesced field patch.
    pub patch: FieldPatch,
    /// When the first edit for this entity was queued.
    pub queued_at: DateTime<Utc>,
    /// Failed replay attempts so far.
    pub attempts: u32,
}

/// The allow-list matching an entity kind and acting role.
fn allowed_fields(key: &EntityKey, role: Role) -> &'static [&'static str] {
    match key {
        EntityKey::Fiche { .. } => allowed_fiche_fields(role),
        EntityKey::Carcass { .. } => allowed_carcass_fields(role),
        EntityKey::Inspection { .. } => allowed_inspection_fields(role),
    }
}

/// Durable queue of pending patches, backed by `SQLite`.
pub struct Outbox {
    conn: Mutex<Connection>,
}

impl Outbox {
    /// Opens or creates an outbox at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, OutboxError> {
        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory outbox, for tests.
    pub fn in_memory() -> Result<Self, OutboxError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("outbox lock poisoned")
    }

    /// Queues a patch for an entity.
    ///
    /// The patch is first sanitized against the acting role's allow-list.
    /// If a patch for the same (entity, role) is already queued, the new
    /// fields coalesce into it — last local write wins per field — and the
    /// original queue position is kept. A patch with no permitted field
    /// queues nothing and returns `None`.
    pub fn queue(
        &self,
        key: &EntityKey,
        acting_role: Role,
        mut patch: FieldPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>, OutboxError> {
        patch.retain_allowed(allowed_fields(key, acting_role));
        if patch.is_empty() {
            debug!(key = %key, "patch had no permitted field, nothing queued");
            return Ok(None);
        }
        let key_json = serde_json::to_string(key)?;
        let conn = self.lock();
        let existing: Option<(String, String)> = conn
            .query_row(
                "SELECT op_id, patch FROM outbox WHERE entity_key = ?1 AND acting_role = ?2",
                params![key_json, acting_role.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        if let Some((op_id, queued_patch)) = existing {
            let mut queued: FieldPatch = serde_json::from_str(&queued_patch)?;
            queued.coalesce(patch);
            conn.execute(
                "UPDATE outbox SET patch = ?2 WHERE op_id = ?1",
                params![op_id, serde_json::to_string(&queued)?],
            )?;
            let op_id = op_id.parse().map_err(|_| OutboxError::Corrupt {
                detail: format!("op_id {op_id}"),
            })?;
            debug!(key = %key, %op_id, "patch coalesced into queued entry");
            return Ok(Some(op_id));
        }

        let op_id = Uuid::new_v4();
        conn.execute(
            "INSERT INTO outbox (op_id, entity_key, acting_role, patch, queued_at, attempts)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
            params![
                op_id.to_string(),
                key_json,
                acting_role.as_str(),
                serde_json::to_string(&patch)?,
                now.to_rfc3339(),
            ],
        )?;
        debug!(key = %key, %op_id, "patch queued");
        Ok(Some(op_id))
    }

    /// The pending entries, in queue order.
    pub fn pending(&self) -> Result<Vec<OutboxEntry>, OutboxError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT op_id, entity_key, acting_role, patch, queued_at, attempts
             FROM outbox ORDER BY rowid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;
        let mut entries = Vec::new();
        for row in rows {
            let (op_id, key, role, patch, queued_at, attempts) = row?;
            entries.push(OutboxEntry {
                op_id: op_id.parse().map_err(|_| OutboxError::Corrupt {
                    detail: format!("op_id {op_id}"),
                })?,
                key: serde_json::from_str(&key)?,
                acting_role: role.parse().map_err(|_| OutboxError::Corrupt {
                    detail: format!("acting_role {role}"),
                })?,
                patch: serde_json::from_str(&patch)?,
                queued_at: queued_at.parse::<DateTime<Utc>>().map_err(|_| {
                    OutboxError::Corrupt {
                        detail: format!("queued_at {queued_at}"),
                    }
                })?,
                attempts: u32::try_from(attempts).unwrap_or(0),
            });
        }
        Ok(entries)
    }

    /// Removes a replayed (or discarded) entry.
    pub fn remove(&self, op_id: Uuid) -> Result<(), OutboxError> {
        self.lock().execute(
            "DELETE FROM outbox WHERE op_id = ?1",
            params![op_id.to_string()],
        )?;
        Ok(())
    }

    /// Counts a failed replay attempt.
    pub fn bump_attempts(&self, op_id: Uuid) -> Result<(), OutboxError> {
        self.lock().execute(
            "UPDATE outbox SET attempts = attempts + 1 WHERE op_id = ?1",
            params![op_id.to_string()],
        )?;
        Ok(())
    }

    /// Number of pending entries.
    pub fn len(&self) -> Result<usize, OutboxError> {
        let count: i64 = self
            .lock()
            .query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Whether the outbox is empty.
    pub fn is_empty(&self) -> Result<bool, OutboxError> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn queue_and_replay_in_order() {
        let outbox = Outbox::in_memory().unwrap();
        outbox
            .queue(
                &EntityKey::fiche("F-1"),
                Role::ExaminateurInitial,
                FieldPatch::new().with("kill_commune", json!("Mailly")),
                ts(10),
            )
            .unwrap()
            .unwrap();
        outbox
            .queue(
                &EntityKey::carcass("F-1", "B-1"),
                Role::ExaminateurInitial,
                FieldPatch::new().with("species", json!("Daim")),
                ts(20),
            )
            .unwrap()
            .unwrap();

        let pending = outbox.pending().unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].key, EntityKey::fiche("F-1"));
        assert_eq!(pending[1].key, EntityKey::carcass("F-1", "B-1"));
    }

    #[test]
    fn later_edit_coalesces_field_wise() {
        let outbox = Outbox::in_memory().unwrap();
        let key = EntityKey::fiche("F-1");
        let first = outbox
            .queue(
                &key,
                Role::ExaminateurInitial,
                FieldPatch::new()
                    .with("kill_commune", json!("Mailly"))
                    .with("first_kill_time", json!("08:00:00")),
                ts(10),
            )
            .unwrap()
            .unwrap();
        let second = outbox
            .queue(
                &key,
                Role::ExaminateurInitial,
                FieldPatch::new().with("kill_commune", json!("Vendeuvre")),
                ts(20),
            )
            .unwrap()
            .unwrap();
        // Same queued entry, newest field value, untouched field kept.
        assert_eq!(first, second);
        let pending = outbox.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(
            pending[0].patch.get("kill_commune"),
            Some(&json!("Vendeuvre"))
        );
        assert_eq!(
            pending[0].patch.get("first_kill_time"),
            Some(&json!("08:00:00"))
        );
    }

    #[test]
    fn disallowed_fields_never_enter_the_outbox() {
        let outbox = Outbox::in_memory().unwrap();
        let queued = outbox
            .queue(
                &EntityKey::fiche("F-1"),
                Role::ExaminateurInitial,
                FieldPatch::new().with("svi_closed_at", json!("2025-11-05T10:00:00Z")),
                ts(10),
            )
            .unwrap();
        assert!(queued.is_none());
        assert!(outbox.is_empty().unwrap());
    }

    #[test]
    fn outbox_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outbox.db");
        {
            let outbox = Outbox::open(&path).unwrap();
            outbox
                .queue(
                    &EntityKey::fiche("F-1"),
                    Role::ExaminateurInitial,
                    FieldPatch::new().with("kill_commune", json!("Mailly")),
                    ts(10),
                )
                .unwrap();
        }
        let outbox = Outbox::open(&path).unwrap();
        assert_eq!(outbox.len().unwrap(), 1);
    }

    #[test]
    fn remove_and_attempts() {
        let outbox = Outbox::in_memory().unwrap();
        let op_id = outbox
            .queue(
                &EntityKey::fiche("F-1"),
                Role::ExaminateurInitial,
                FieldPatch::new().with("kill_commune", json!("Mailly")),
                ts(10),
            )
            .unwrap()
            .unwrap();
        outbox.bump_attempts(op_id).unwrap();
        assert_eq!(outbox.pending().unwrap()[0].attempts, 1);
        outbox.remove(op_id).unwrap();
        assert!(outbox.is_empty().unwrap());
    }
}
