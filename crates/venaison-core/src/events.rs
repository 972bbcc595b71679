//! Domain events emitted at custody and decision boundaries.
//!
//! The core emits; delivery (email, push) is an external collaborator that
//! consumes these at-least-once. Emission happens after the owning write
//! has committed, and a sink failure never fails the commit path — events
//! are lossy hints, the stored entities remain the truth.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{OwnerRef, Role};

/// A fact worth notifying someone about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// Custody of a fiche moved to a new owner.
    CustodyChanged {
        /// The fiche.
        fiche_numero: String,
        /// Role that held custody before the change.
        previous_role: Option<Role>,
        /// The new custodian.
        new_owner: OwnerRef,
        /// When the confirmation landed.
        at: DateTime<Utc>,
    },
    /// An intermediary recorded a decision about a carcass.
    DecisionRecorded {
        /// The fiche.
        fiche_numero: String,
        /// The inspected carcass.
        bracelet: String,
        /// The deciding episode.
        episode_id: String,
        /// Decision label (`ACCEPTED`, `REFUSED`, `MISSING`).
        decision: String,
        /// When the decision landed.
        at: DateTime<Utc>,
    },
    /// The SVI signed the fiche off; it is now immutable.
    FicheClosed {
        /// The fiche.
        fiche_numero: String,
        /// Closing timestamp.
        at: DateTime<Utc>,
    },
}

/// Consumer boundary for domain events.
pub trait EventSink: Send + Sync {
    /// Accepts one event. Must not panic; failures stay inside the sink.
    fn emit(&self, event: DomainEvent);
}

/// Sink that drops everything. Useful when no notifier is wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: DomainEvent) {}
}

/// Sink that records events in memory, for tests.
#[derive(Debug, Default)]
pub struct InMemorySink {
    events: Mutex<Vec<DomainEvent>>,
}

impl InMemorySink {
    /// An empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of everything emitted so far.
    ///
    /// # Panics
    ///
    /// Panics if a previous holder of the lock panicked.
    #[must_use]
    pub fn drain(&self) -> Vec<DomainEvent> {
        let mut events = self.events.lock().expect("sink lock poisoned");
        std::mem::take(&mut *events)
    }
}

impl EventSink for InMemorySink {
    fn emit(&self, event: DomainEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn in_memory_sink_records_in_order() {
        let sink = InMemorySink::new();
        let at = Utc.timestamp_opt(1000, 0).unwrap();
        sink.emit(DomainEvent::FicheClosed {
            fiche_numero: "F-1".to_string(),
            at,
        });
        sink.emit(DomainEvent::DecisionRecorded {
            fiche_numero: "F-1".to_string(),
            bracelet: "B-1".to_string(),
            episode_id: "ep-1".to_string(),
            decision: "ACCEPTED".to_string(),
            at,
        });
        let events = sink.drain();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], DomainEvent::FicheClosed { .. }));
        assert!(sink.drain().is_empty());
    }

    #[test]
    fn event_serde_is_tagged() {
        let at = Utc.timestamp_opt(1000, 0).unwrap();
        let event = DomainEvent::CustodyChanged {
            fiche_numero: "F-1".to_string(),
            previous_role: Some(Role::PremierDetenteur),
            new_owner: OwnerRef::for_entity(Role::Etg, "etg-1"),
            at,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "custody_changed");
        let back: DomainEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
