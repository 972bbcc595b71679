//! Merge engine error types.

use thiserror::Error;

/// Errors from field-level merge.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MergeError {
    /// The server entity did not serialize to a JSON object.
    #[error("entity does not serialize to a JSON object")]
    NotAnObject,

    /// The merged value no longer deserializes into the entity type.
    ///
    /// A patch passed the allow-list but carried a value of the wrong
    /// shape for its field.
    #[error("merged entity is malformed: {0}")]
    Malformed(#[source] serde_json::Error),

    /// Serialization of the server entity failed.
    #[error("entity serialization failed: {0}")]
    Serialize(#[source] serde_json::Error),
}
