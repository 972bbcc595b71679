//! Field patches and the merge operation.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::MergeError;

/// A set of field-level edits to one entity.
///
/// Field names are the entity's serde names; values are the new field
/// values. A patch carries only what the client actually edited — absence
/// means "keep the server's value".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldPatch(BTreeMap<String, Value>);

impl FieldPatch {
    /// An empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a field edit, replacing any previous value for that field.
    pub fn set(&mut self, field: impl Into<String>, value: Value) -> &mut Self {
        self.0.insert(field.into(), value);
        self
    }

    /// Builder-style [`FieldPatch::set`].
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: Value) -> Self {
        self.0.insert(field.into(), value);
        self
    }

    /// The edited field names, in stable order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// The value for one field, if present.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Whether the patch edits nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of edited fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Drops every field not in the allow-list. Silent by design: stale
    /// client code loses edits it was never permitted to make, instead of
    /// erroring or corrupting.
    pub fn retain_allowed(&mut self, allowed: &[&str]) {
        self.0.retain(|field, _| allowed.contains(&field.as_str()));
    }

    /// Overlays a newer patch onto this one, field-wise.
    ///
    /// Used by the client outbox before transmission: a queued patch for an
    /// entity absorbs later local edits, and for each field only the latest
    /// local value is kept.
    pub fn coalesce(&mut self, newer: Self) {
        self.0.extend(newer.0);
    }

    /// Iterates over `(field, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, Value)> for FieldPatch {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Merges a patch into a JSON object: patched fields overwrite, all other
/// fields are carried verbatim from `server`.
///
/// # Errors
///
/// Returns [`MergeError::NotAnObject`] when `server` is not a JSON object.
pub fn merge_value(server: &Value, patch: &FieldPatch) -> Result<Value, MergeError> {
    let Value::Object(server_map) = server else {
        return Err(MergeError::NotAnObject);
    };
    let mut merged = server_map.clone();
    for (field, value) in patch.iter() {
        merged.insert(field.to_string(), value.clone());
    }
    Ok(Value::Object(merged))
}

/// Typed merge: serializes the server entity, overlays the patch, and
/// deserializes back.
///
/// Untouched fields round-trip through their own serialization, so the
/// merged entity differs from `server` only in the fields the patch names.
///
/// # Errors
///
/// [`MergeError::Serialize`] / [`MergeError::NotAnObject`] on a
/// non-object entity, [`MergeError::Malformed`] when a patched value has
/// the wrong shape for its field.
pub fn merge<T>(server: &T, patch: &FieldPatch) -> Result<T, MergeError>
where
    T: Serialize + DeserializeOwned,
{
    let server_value = serde_json::to_value(server).map_err(MergeError::Serialize)?;
    let merged = merge_value(&server_value, patch)?;
    serde_json::from_value(merged).map_err(MergeError::Malformed)
}
