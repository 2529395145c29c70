use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{EventStore, StoreError, StoredEvent};

/// Event store keeping one JSON file per event under a directory.
///
/// Writes go to a temporary file that is renamed into place.
#[derive(Debug)]
pub struct FsEventStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl FsEventStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(io_error(&root))?;
        tracing::debug!(root = %root.display(), "Opened filesystem event store");
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Directory holding the event files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    async fn read(&self, path: &Path) -> Result<StoredEvent, StoreError> {
        let bytes = tokio::fs::read(path).await.map_err(io_error(path))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn write(&self, event: &StoredEvent) -> Result<(), StoreError> {
        let path = self.path_for(event.id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(event)?;
        tokio::fs::write(&tmp, bytes).await.map_err(io_error(&tmp))?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_error(&path))
    }

    async fn modify<F>(&self, id: Uuid, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut StoredEvent) + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut event = self.load(id).await?.ok_or(StoreError::NotFound(id))?;
        apply(&mut event);
        self.write(&event).await
    }
}

#[async_trait]
impl EventStore for FsEventStore {
    async fn insert(&self, data: Value) -> Result<Uuid, StoreError> {
        let event = StoredEvent::new(data);
        let _guard = self.write_lock.lock().await;
        self.write(&event).await?;
        tracing::debug!(event_id = %event.id, "Stored event");
        Ok(event.id)
    }

    async fn load(&self, id: Uuid) -> Result<Option<StoredEvent>, StoreError> {
        let path = self.path_for(id);
        if !tokio::fs::try_exists(&path).await.map_err(io_error(&path))? {
            return Ok(None);
        }
        self.read(&path).await.map(Some)
    }

    async fn save_task_context(&self, id: Uuid, task_context: Value) -> Result<(), StoreError> {
        self.modify(id, |event| event.task_context = Some(task_context))
            .await
    }

    async fn update_data(&self, id: Uuid, data: Value) -> Result<(), StoreError> {
        self.modify(id, |event| event.data = data).await
    }

    async fn list(&self) -> Result<Vec<StoredEvent>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(io_error(&self.root))?;
        let mut events = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_error(&self.root))? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match self.read(&path).await {
                Ok(event) => events.push(event),
                Err(error) => {
                    tracing::warn!(path = %path.display(), error = %error, "Skipping unreadable event file");
                }
            }
        }
        events.sort_by_key(|event| (event.created_at_time(), event.id));
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn events_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let id = {
            let store = FsEventStore::open(dir.path()).await.expect("open");
            let id = store
                .insert(json!({ "event_type": "search_query", "query": "refund" }))
                .await
                .expect("insert");
            store
                .save_task_context(id, json!({ "nodes": {} }))
                .await
                .expect("save");
            id
        };

        let reopened = FsEventStore::open(dir.path()).await.expect("reopen");
        let event = reopened.load(id).await.expect("load").expect("present");
        assert_eq!(event.data["query"], json!("refund"));
        assert_eq!(event.task_context, Some(json!({ "nodes": {} })));
        assert_eq!(reopened.list().await.expect("list").len(), 1);
        assert!(reopened.load(Uuid::new_v4()).await.expect("load").is_none());
    }

    #[tokio::test]
    async fn list_orders_by_creation_time() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsEventStore::open(dir.path()).await.expect("open");
        let first = store.insert(json!({ "n": 1 })).await.expect("insert");
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = store.insert(json!({ "n": 2 })).await.expect("insert");

        let ids: Vec<Uuid> = store.list().await.expect("list").iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![first, second]);
    }
}
