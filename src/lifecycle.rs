//! Archive, delete and restore ingested documents.
//!
//! Lifecycle changes are soft: the originating upload event is re-stamped so listings see the
//! new status, and an audit event records the change. Only deletion touches the vector store,
//! and only on a best-effort basis.

use serde::Serialize;
use serde_json::{Map, Value, json};
use thiserror::Error;
use uuid::Uuid;

use crate::store::{EventStore, StoreError, StoredEvent, find_upload_event, now_rfc3339};
use crate::vector_store::VectorStore;

/// Failures raised by lifecycle operations.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// No upload event could be linked to the document.
    #[error("Document '{0}' not found")]
    DocumentNotFound(String),
    /// Event persistence failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Lifecycle transition applied to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    /// Hide the document without removing data.
    Archive,
    /// Mark the document deleted.
    Delete,
    /// Return an archived document to active processing.
    Restore,
}

impl LifecycleAction {
    /// Status stamped onto the document.
    pub fn status(self) -> &'static str {
        match self {
            Self::Archive => "archived",
            Self::Delete => "deleted",
            Self::Restore => "processing",
        }
    }

    /// Event type of the audit record.
    pub fn audit_event_type(self) -> &'static str {
        match self {
            Self::Archive => "document_archived",
            Self::Delete => "document_deleted",
            Self::Restore => "document_restored",
        }
    }

    fn timestamp_key(self) -> &'static str {
        match self {
            Self::Archive => "archived_at",
            Self::Delete => "deleted_at",
            Self::Restore => "restored_at",
        }
    }

    fn flags(self, timestamp: &str) -> Map<String, Value> {
        let mut flags = Map::new();
        match self {
            Self::Archive => {
                flags.insert("archived".into(), Value::Bool(true));
            }
            Self::Delete => {
                flags.insert("deleted".into(), Value::Bool(true));
            }
            Self::Restore => {
                flags.insert("restored_at".into(), Value::String(timestamp.to_string()));
            }
        }
        flags
    }

    fn cleared_keys(self) -> &'static [&'static str] {
        match self {
            Self::Restore => &["archived", "archived_at"],
            Self::Archive | Self::Delete => &[],
        }
    }
}

/// Summary of an applied lifecycle change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LifecycleOutcome {
    /// Affected document.
    pub document_id: String,
    /// New status.
    pub status: &'static str,
    /// When the change was applied (RFC 3339).
    pub changed_at: String,
    /// Upload event that was re-stamped.
    pub upload_event_id: Uuid,
    /// Audit event recording the change.
    pub audit_event_id: Uuid,
}

/// Soft-archive a document without removing its data.
pub async fn archive_document(
    store: &dyn EventStore,
    document_id: &str,
    reason: Option<&str>,
) -> Result<LifecycleOutcome, LifecycleError> {
    apply(store, document_id, LifecycleAction::Archive, reason).await
}

/// Soft-delete a document, optionally purging its vectors.
///
/// A failed purge is logged; the deletion itself still stands.
pub async fn delete_document(
    store: &dyn EventStore,
    vector_store: &dyn VectorStore,
    document_id: &str,
    reason: Option<&str>,
    purge_vectors: bool,
) -> Result<LifecycleOutcome, LifecycleError> {
    let outcome = apply(store, document_id, LifecycleAction::Delete, reason).await?;

    if purge_vectors {
        let mut filter = Map::new();
        filter.insert("document_id".into(), Value::String(document_id.to_string()));
        if let Err(error) = vector_store.delete(&filter).await {
            tracing::warn!(document_id, error = %error, "Vector purge failed");
        } else {
            tracing::info!(document_id, "Purged document vectors");
        }
    }
    Ok(outcome)
}

/// Restore a previously archived document to active processing.
pub async fn restore_document(
    store: &dyn EventStore,
    document_id: &str,
    reason: Option<&str>,
) -> Result<LifecycleOutcome, LifecycleError> {
    apply(store, document_id, LifecycleAction::Restore, reason).await
}

async fn apply(
    store: &dyn EventStore,
    document_id: &str,
    action: LifecycleAction,
    reason: Option<&str>,
) -> Result<LifecycleOutcome, LifecycleError> {
    let mut upload = find_upload_event(store, document_id)
        .await?
        .ok_or_else(|| LifecycleError::DocumentNotFound(document_id.to_string()))?;

    let timestamp = now_rfc3339();
    stamp_upload_event(&mut upload, action, &timestamp);

    if let Some(task_context) = upload.task_context.take() {
        store.save_task_context(upload.id, task_context).await?;
    }
    store.update_data(upload.id, upload.data).await?;

    let mut audit = Map::new();
    audit.insert("event_type".into(), json!(action.audit_event_type()));
    audit.insert("document_id".into(), json!(document_id));
    audit.insert(action.timestamp_key().into(), json!(timestamp));
    audit.insert("reason".into(), json!(reason));
    let audit_event_id = store.insert(Value::Object(audit)).await?;

    tracing::info!(
        document_id,
        status = action.status(),
        upload_event_id = %upload.id,
        audit_event_id = %audit_event_id,
        "Applied document lifecycle change"
    );
    Ok(LifecycleOutcome {
        document_id: document_id.to_string(),
        status: action.status(),
        changed_at: timestamp,
        upload_event_id: upload.id,
        audit_event_id,
    })
}

/// Object under `key`, replacing anything that is not an object.
fn object_at<'a>(map: &'a mut Map<String, Value>, key: &str) -> &'a mut Map<String, Value> {
    as_object_mut(map.entry(key.to_string()).or_insert(Value::Null))
}

fn as_object_mut(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value normalized to an object"),
    }
}

fn stamp(target: &mut Map<String, Value>, status_fields: &Map<String, Value>, cleared: &[&str]) {
    for key in cleared {
        target.remove(*key);
    }
    target.extend(status_fields.clone());
}

fn stamp_upload_event(event: &mut StoredEvent, action: LifecycleAction, timestamp: &str) {
    let status = action.status();
    let cleared = action.cleared_keys();

    let mut status_fields = Map::new();
    status_fields.insert("status".into(), Value::String(status.to_string()));
    status_fields.insert(format!("{status}_at"), Value::String(timestamp.to_string()));
    let mut flagged = status_fields.clone();
    flagged.extend(action.flags(timestamp));

    let task_context = as_object_mut(event.task_context.get_or_insert_with(|| json!({})));
    let metadata = object_at(task_context, "metadata");
    {
        let document = object_at(metadata, "document");
        stamp(object_at(document, "metadata"), &flagged, cleared);
        stamp(document, &flagged, cleared);
    }
    stamp(metadata, &status_fields, cleared);

    let data_metadata = object_at(as_object_mut(&mut event.data), "metadata");
    stamp(data_metadata, &flagged, cleared);
}
