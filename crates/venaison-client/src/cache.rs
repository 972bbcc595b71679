//! Read-model cache.
//!
//! The client's local view of server entities, keyed by business key.
//! Explicit apply/get, no ambient mutable state: the sync loop is the only
//! writer, screens read through it.

use std::collections::HashMap;

use serde_json::Value;
use venaison_core::keys::EntityKey;

/// Entity cache keyed by business key.
#[derive(Debug, Default)]
pub struct ReadModelCache {
    entries: HashMap<EntityKey, Value>,
}

impl ReadModelCache {
    /// An empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the latest known server copy of an entity.
    pub fn apply(&mut self, key: EntityKey, entity: Value) {
        self.entries.insert(key, entity);
    }

    /// The cached copy, if any.
    #[must_use]
    pub fn get(&self, key: &EntityKey) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Drops an entity (server reported it gone).
    pub fn remove(&mut self, key: &EntityKey) -> Option<Value> {
        self.entries.remove(key)
    }

    /// Number of cached entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
