// View events as queued, persisted and delivered.
//
// Serialized field names are camelCase. Snapshots written by older
// browser clients used userId/productId/timestamp, which are accepted as aliases.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single "viewer looked at subject" signal.
///
/// Events carry no identifier of their own; their identity is their position
/// in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewEvent {
    #[serde(alias = "userId")]
    pub viewer_id: String,
    #[serde(alias = "productId")]
    pub subject_id: String,
    #[serde(alias = "timestamp")]
    pub occurred_at_millis: i64,
}

impl ViewEvent {
    pub fn new(
        viewer_id: impl Into<String>,
        subject_id: impl Into<String>,
        occurred_at_millis: i64,
    ) -> Self {
        Self {
            viewer_id: viewer_id.into(),
            subject_id: subject_id.into(),
            occurred_at_millis,
        }
    }

    /// Validate both ids for use in document paths.
    pub fn validate(&self) -> Result<(), InvalidId> {
        validate_id("viewer_id", &self.viewer_id)?;
        validate_id("subject_id", &self.subject_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {reason}")]
pub struct InvalidId {
    pub field: &'static str,
    pub reason: &'static str,
}

/// Ids become document path segments, so they must be non-empty and free of `/`.
pub fn validate_id(field: &'static str, id: &str) -> Result<(), InvalidId> {
    if id.trim().is_empty() {
        return Err(InvalidId {
            field,
            reason: "must not be empty",
        });
    }
    if id.contains('/') {
        return Err(InvalidId {
            field,
            reason: "must not contain '/'",
        });
    }
    Ok(())
}
