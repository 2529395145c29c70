//! Persistence for events, their task contexts and classification history.
//!
//! Events are stored as raw JSON so audit records that are not pipeline events
//! (`document_archived` and friends) live in the same table as the events that drive runs.

mod classification;
mod fs;
mod memory;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

pub use classification::{ClassificationRecord, ClassificationStore, InMemoryClassificationStore};
pub use fs::FsEventStore;
pub use memory::InMemoryEventStore;

/// Errors raised by event and classification stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No event with the given identifier exists.
    #[error("Event {0} not found")]
    NotFound(Uuid),
    /// Filesystem access failed.
    #[error("Event store I/O error at '{}': {source}", path.display())]
    Io {
        /// Path being read or written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// A stored record could not be encoded or decoded.
    #[error("Failed to serialize stored event: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One persisted event row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Event identifier.
    pub id: Uuid,
    /// Raw event payload.
    pub data: Value,
    /// Result of the last successful run, if any.
    #[serde(default)]
    pub task_context: Option<Value>,
    /// Insertion time (RFC 3339, UTC).
    pub created_at: String,
}

impl StoredEvent {
    /// Wrap `data` as a new event stamped with the current time.
    pub fn new(data: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            data,
            task_context: None,
            created_at: now_rfc3339(),
        }
    }

    /// `data.event_type`, if present.
    pub fn event_type(&self) -> Option<&str> {
        self.data.get("event_type").and_then(Value::as_str)
    }

    /// `task_context.metadata.document.id`, if a run recorded one.
    pub fn document_id(&self) -> Option<&str> {
        self.task_context
            .as_ref()?
            .pointer("/metadata/document/id")
            .and_then(Value::as_str)
    }

    pub(crate) fn created_at_time(&self) -> Option<OffsetDateTime> {
        OffsetDateTime::parse(&self.created_at, &Rfc3339).ok()
    }
}

/// Event persistence used by the dispatcher and the lifecycle operations.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist a new event and return its identifier.
    async fn insert(&self, data: Value) -> Result<Uuid, StoreError>;

    /// Load an event by identifier.
    async fn load(&self, id: Uuid) -> Result<Option<StoredEvent>, StoreError>;

    /// Replace the stored task context of an event.
    async fn save_task_context(&self, id: Uuid, task_context: Value) -> Result<(), StoreError>;

    /// Replace the raw payload of an event.
    async fn update_data(&self, id: Uuid, data: Value) -> Result<(), StoreError>;

    /// All events, oldest first.
    async fn list(&self) -> Result<Vec<StoredEvent>, StoreError>;
}

/// Current UTC time as RFC 3339.
pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string())
}

/// First `document_summary` event targeting `document_id`.
pub async fn find_summary_event(
    store: &dyn EventStore,
    document_id: &str,
) -> Result<Option<StoredEvent>, StoreError> {
    Ok(store.list().await?.into_iter().find(|event| {
        event.event_type() == Some("document_summary")
            && event.data.get("document_id").and_then(Value::as_str) == Some(document_id)
    }))
}

/// Most recent `document_upload` event whose run produced `document_id`.
///
/// Falls back to the event whose own identifier equals `document_id`.
pub async fn find_upload_event(
    store: &dyn EventStore,
    document_id: &str,
) -> Result<Option<StoredEvent>, StoreError> {
    let found = store.list().await?.into_iter().rev().find(|event| {
        event.event_type() == Some("document_upload") && event.document_id() == Some(document_id)
    });
    if found.is_some() {
        return Ok(found);
    }

    match Uuid::parse_str(document_id) {
        Ok(id) => store.load(id).await,
        Err(_) => Ok(None),
    }
}
