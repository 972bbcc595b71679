//! venaison-daemon - Authoritative custody server library
//!
//! The single server-side source of truth for fiches, carcasses,
//! inspection records and handoff episodes. Clients are
//! occasionally-connected actors, not peers: they queue edits locally and
//! reconcile here, while custody transitions are applied with a single
//! authoritative check-then-set per fiche.
//!
//! # Modules
//!
//! - [`store`]: `SQLite`-backed record store addressed by business keys
//! - [`service`]: The operations of the custody core, with permission
//!   checks and optimistic concurrency
//! - [`protocol`]: Line-delimited JSON request/response messages
//! - [`server`]: Unix-domain-socket accept loop

pub mod protocol;
pub mod server;
pub mod service;
pub mod store;
