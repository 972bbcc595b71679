//! `SQLite`-backed record store.
//!
//! This module uses `SQLite` with WAL mode for the underlying storage.
//! Every entity is stored as a JSON document addressed by its immutable
//! business key, plus the columns registry queries filter on. Upserts are
//! idempotent by construction; the fiche row additionally carries a
//! `row_version` column used as the optimistic-concurrency token for
//! custody transitions.

// SQLite stores integers as i64; row versions stay far below the wrap point.
// Mutex poisoning indicates a panic in another thread, which is unrecoverable.
#![allow(
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::missing_panics_doc
)]

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use thiserror::Error;
use venaison_core::carcass::Carcass;
use venaison_core::custody::HandoffEpisode;
use venaison_core::fiche::Fiche;
use venaison_core::identity::Role;
use venaison_core::ledger::InspectionRecord;

#[cfg(test)]
mod tests;

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Database error from `SQLite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Document (de)serialization error.
    #[error("document error: {0}")]
    Document(#[from] serde_json::Error),

    /// Referenced fiche does not exist.
    #[error("fiche not found: {numero}")]
    FicheNotFound {
        /// The missing fiche number.
        numero: String,
    },

    /// Optimistic custody check failed: the fiche row moved.
    #[error("fiche {numero} changed concurrently (expected version {expected}, found {actual})")]
    VersionConflict {
        /// The fiche number.
        numero: String,
        /// Version the write was based on.
        expected: u64,
        /// Version actually stored.
        actual: u64,
    },
}

/// Paged parameters for registry listings.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    /// Maximum rows to return.
    pub limit: u32,
    /// Rows to skip.
    pub offset: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

/// The record store backed by `SQLite`.
///
/// WAL mode allows concurrent reads while a write is in progress. The
/// connection is behind a mutex: the daemon serializes writes per process,
/// which is exactly the "fiche row as serialization point" model.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens or creates a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Self::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory store, for tests.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize(conn: &Connection) -> Result<(), StoreError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("store lock poisoned")
    }

    // =========================================================================
    // Fiches
    // =========================================================================

    /// Idempotent upsert of a fiche.
    pub fn put_fiche(&self, fiche: &Fiche) -> Result<(), StoreError> {
        let doc = serde_json::to_string(fiche)?;
        self.lock().execute(
            "INSERT INTO fiches (numero, doc, row_version, closed, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (numero) DO UPDATE SET
                 doc = excluded.doc,
                 row_version = excluded.row_version,
                 closed = excluded.closed,
                 updated_at = excluded.updated_at",
            params![
                fiche.numero,
                doc,
                fiche.row_version as i64,
                i64::from(fiche.is_closed()),
                fiche.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Check-then-set write of a fiche: succeeds only when the stored row
    /// version still equals `expected`.
    ///
    /// This is the serialization point for custody transitions. A stale
    /// write surfaces as [`StoreError::VersionConflict`], never as a merge.
    pub fn cas_put_fiche(&self, fiche: &Fiche, expected: u64) -> Result<(), StoreError> {
        let doc = serde_json::to_string(fiche)?;
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE fiches SET
                 doc = ?2,
                 row_version = ?3,
                 closed = ?4,
                 updated_at = ?5
             WHERE numero = ?1 AND row_version = ?6",
            params![
                fiche.numero,
                doc,
                fiche.row_version as i64,
                i64::from(fiche.is_closed()),
                fiche.updated_at.to_rfc3339(),
                expected as i64,
            ],
        )?;
        if changed == 1 {
            return Ok(());
        }
        let actual: Option<i64> = conn
            .query_row(
                "SELECT row_version FROM fiches WHERE numero = ?1",
                params![fiche.numero],
                |row| row.get(0),
            )
            .optional()?;
        match actual {
            Some(actual) => Err(StoreError::VersionConflict {
                numero: fiche.numero.clone(),
                expected,
                actual: actual as u64,
            }),
            None => Err(StoreError::FicheNotFound {
                numero: fiche.numero.clone(),
            }),
        }
    }

    /// Fetches a fiche by number.
    pub fn get_fiche(&self, numero: &str) -> Result<Option<Fiche>, StoreError> {
        let doc: Option<String> = self
            .lock()
            .query_row(
                "SELECT doc FROM fiches WHERE numero = ?1",
                params![numero],
                |row| row.get(0),
            )
            .optional()?;
        doc.map(|d| serde_json::from_str(&d).map_err(StoreError::from))
            .transpose()
    }

    // =========================================================================
    // Carcasses
    // =========================================================================

    /// Idempotent upsert of a carcass.
    pub fn put_carcass(&self, carcass: &Carcass) -> Result<(), StoreError> {
        let conn = self.lock();
        Self::put_carcass_on(&conn, carcass)
    }

    fn put_carcass_on(conn: &Connection, carcass: &Carcass) -> Result<(), StoreError> {
        let doc = serde_json::to_string(carcass)?;
        conn.execute(
            "INSERT INTO carcasses
                 (fiche_numero, bracelet, doc, recipient_entity_id, deleted, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (fiche_numero, bracelet) DO UPDATE SET
                 doc = excluded.doc,
                 recipient_entity_id = excluded.recipient_entity_id,
                 deleted = excluded.deleted,
                 updated_at = excluded.updated_at",
            params![
                carcass.fiche_numero,
                carcass.bracelet,
                doc,
                carcass.next_recipient_entity_id,
                i64::from(carcass.is_deleted()),
                carcass.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetches one carcass.
    pub fn get_carcass(
        &self,
        fiche_numero: &str,
        bracelet: &str,
    ) -> Result<Option<Carcass>, StoreError> {
        let doc: Option<String> = self
            .lock()
            .query_row(
                "SELECT doc FROM carcasses WHERE fiche_numero = ?1 AND bracelet = ?2",
                params![fiche_numero, bracelet],
                |row| row.get(0),
            )
            .optional()?;
        doc.map(|d| serde_json::from_str(&d).map_err(StoreError::from))
            .transpose()
    }

    /// All carcasses of a fiche, bracelet order.
    pub fn list_carcasses(
        &self,
        fiche_numero: &str,
        include_deleted: bool,
    ) -> Result<Vec<Carcass>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT doc FROM carcasses
             WHERE fiche_numero = ?1 AND (deleted = 0 OR ?2)
             ORDER BY bracelet",
        )?;
        let rows = stmt.query_map(params![fiche_numero, include_deleted], |row| {
            row.get::<_, String>(0)
        })?;
        let mut carcasses = Vec::new();
        for doc in rows {
            carcasses.push(serde_json::from_str(&doc?)?);
        }
        Ok(carcasses)
    }

    /// The carcasses visible to a handoff episode.
    ///
    /// Visibility is derived from the dispatch stamps on the carcasses, not
    /// from the fiche's legacy single-recipient pointer: an intermediary
    /// sees exactly the carcasses routed to its entity. The SVI sees every
    /// live carcass of the fiche.
    pub fn list_visible_carcasses(
        &self,
        episode: &HandoffEpisode,
    ) -> Result<Vec<Carcass>, StoreError> {
        if episode.role == Role::Svi {
            return self.list_carcasses(&episode.fiche_numero, false);
        }
        let Some(entity_id) = episode.entity_id.as_deref() else {
            return Ok(Vec::new());
        };
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT doc FROM carcasses
             WHERE fiche_numero = ?1 AND recipient_entity_id = ?2 AND deleted = 0
             ORDER BY bracelet",
        )?;
        let rows = stmt.query_map(params![episode.fiche_numero, entity_id], |row| {
            row.get::<_, String>(0)
        })?;
        let mut carcasses = Vec::new();
        for doc in rows {
            carcasses.push(serde_json::from_str(&doc?)?);
        }
        Ok(carcasses)
    }

    /// Registry listing: carcasses routed to a handling authority,
    /// filterable by modification date, paginated, optionally including
    /// soft-deleted rows.
    pub fn list_carcasses_for_authority(
        &self,
        entity_id: &str,
        modified_since: Option<DateTime<Utc>>,
        include_deleted: bool,
        page: Page,
    ) -> Result<Vec<Carcass>, StoreError> {
        let since = modified_since.map_or_else(String::new, |t| t.to_rfc3339());
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT doc FROM carcasses
             WHERE recipient_entity_id = ?1
               AND (deleted = 0 OR ?2)
               AND updated_at >= ?3
             ORDER BY updated_at DESC, bracelet
             LIMIT ?4 OFFSET ?5",
        )?;
        let rows = stmt.query_map(
            params![entity_id, include_deleted, since, page.limit, page.offset],
            |row| row.get::<_, String>(0),
        )?;
        let mut carcasses = Vec::new();
        for doc in rows {
            carcasses.push(serde_json::from_str(&doc?)?);
        }
        Ok(carcasses)
    }

    // =========================================================================
    // Inspection records
    // =========================================================================

    /// Idempotent upsert of an inspection record.
    pub fn put_inspection(&self, record: &InspectionRecord) -> Result<(), StoreError> {
        let conn = self.lock();
        Self::put_inspection_on(&conn, record)
    }

    fn put_inspection_on(conn: &Connection, record: &InspectionRecord) -> Result<(), StoreError> {
        let doc = serde_json::to_string(record)?;
        conn.execute(
            "INSERT INTO inspection_records
                 (fiche_numero, bracelet, episode_id, doc, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (fiche_numero, bracelet, episode_id) DO UPDATE SET
                 doc = excluded.doc,
                 updated_at = excluded.updated_at",
            params![
                record.fiche_numero,
                record.bracelet,
                record.episode_id,
                doc,
                record.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Writes a decision record and the carcass carrying its mirror in one
    /// transaction, so the projection can never drift from the record.
    pub fn put_decision(
        &self,
        record: &InspectionRecord,
        carcass: &Carcass,
    ) -> Result<(), StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        Self::put_inspection_on(&tx, record)?;
        Self::put_carcass_on(&tx, carcass)?;
        tx.commit()?;
        Ok(())
    }

    /// Fetches one inspection record.
    pub fn get_inspection(
        &self,
        fiche_numero: &str,
        bracelet: &str,
        episode_id: &str,
    ) -> Result<Option<InspectionRecord>, StoreError> {
        let doc: Option<String> = self
            .lock()
            .query_row(
                "SELECT doc FROM inspection_records
                 WHERE fiche_numero = ?1 AND bracelet = ?2 AND episode_id = ?3",
                params![fiche_numero, bracelet, episode_id],
                |row| row.get(0),
            )
            .optional()?;
        doc.map(|d| serde_json::from_str(&d).map_err(StoreError::from))
            .transpose()
    }

    /// All records written by one episode.
    pub fn list_inspections_for_episode(
        &self,
        episode_id: &str,
    ) -> Result<Vec<InspectionRecord>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT doc FROM inspection_records WHERE episode_id = ?1 ORDER BY bracelet",
        )?;
        let rows = stmt.query_map(params![episode_id], |row| row.get::<_, String>(0))?;
        let mut records = Vec::new();
        for doc in rows {
            records.push(serde_json::from_str(&doc?)?);
        }
        Ok(records)
    }

    /// All records about one carcass, across every episode.
    pub fn list_inspections_for_carcass(
        &self,
        fiche_numero: &str,
        bracelet: &str,
    ) -> Result<Vec<InspectionRecord>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT doc FROM inspection_records
             WHERE fiche_numero = ?1 AND bracelet = ?2
             ORDER BY episode_id",
        )?;
        let rows = stmt.query_map(params![fiche_numero, bracelet], |row| {
            row.get::<_, String>(0)
        })?;
        let mut records = Vec::new();
        for doc in rows {
            records.push(serde_json::from_str(&doc?)?);
        }
        Ok(records)
    }

    // =========================================================================
    // Handoff episodes
    // =========================================================================

    /// Idempotent upsert of a handoff episode.
    pub fn put_episode(&self, episode: &HandoffEpisode) -> Result<(), StoreError> {
        let doc = serde_json::to_string(episode)?;
        self.lock().execute(
            "INSERT INTO handoff_episodes (id, fiche_numero, doc, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (id) DO UPDATE SET doc = excluded.doc",
            params![
                episode.id,
                episode.fiche_numero,
                doc,
                episode.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetches one episode.
    pub fn get_episode(&self, id: &str) -> Result<Option<HandoffEpisode>, StoreError> {
        let doc: Option<String> = self
            .lock()
            .query_row(
                "SELECT doc FROM handoff_episodes WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        doc.map(|d| serde_json::from_str(&d).map_err(StoreError::from))
            .transpose()
    }

    /// The chain-of-custody trail of a fiche, most recent episode first.
    pub fn list_episodes(&self, fiche_numero: &str) -> Result<Vec<HandoffEpisode>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT doc FROM handoff_episodes
             WHERE fiche_numero = ?1
             ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![fiche_numero], |row| row.get::<_, String>(0))?;
        let mut episodes = Vec::new();
        for doc in rows {
            episodes.push(serde_json::from_str(&doc?)?);
        }
        Ok(episodes)
    }
}
