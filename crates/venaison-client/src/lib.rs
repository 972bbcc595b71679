//! venaison-client - Offline client support
//!
//! Hunters in the field and inspectors without signal keep working: every
//! edit lands in a durable local outbox and replays against the server on
//! reconnect. The replay is field-level merge (see
//! [`venaison_core::merge`]), so disconnected edits are never silently
//! lost and never silently overwrite another actor's progress.
//!
//! # Modules
//!
//! - [`outbox`]: Durable `SQLite` queue of field patches, per-entity FIFO
//! - [`cache`]: Read-model cache keyed by entity id
//! - [`sync`]: The replay loop and its transport boundary

pub mod cache;
pub mod outbox;
pub mod sync;
