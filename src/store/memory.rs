use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{EventStore, StoreError, StoredEvent};

/// Process-local event store.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    events: RwLock<Vec<StoredEvent>>,
}

impl InMemoryEventStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn insert(&self, data: Value) -> Result<Uuid, StoreError> {
        let event = StoredEvent::new(data);
        let id = event.id;
        self.events.write().await.push(event);
        Ok(id)
    }

    async fn load(&self, id: Uuid) -> Result<Option<StoredEvent>, StoreError> {
        Ok(self
            .events
            .read()
            .await
            .iter()
            .find(|event| event.id == id)
            .cloned())
    }

    async fn save_task_context(&self, id: Uuid, task_context: Value) -> Result<(), StoreError> {
        let mut events = self.events.write().await;
        let event = events
            .iter_mut()
            .find(|event| event.id == id)
            .ok_or(StoreError::NotFound(id))?;
        event.task_context = Some(task_context);
        Ok(())
    }

    async fn update_data(&self, id: Uuid, data: Value) -> Result<(), StoreError> {
        let mut events = self.events.write().await;
        let event = events
            .iter_mut()
            .find(|event| event.id == id)
            .ok_or(StoreError::NotFound(id))?;
        event.data = data;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<StoredEvent>, StoreError> {
        Ok(self.events.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn updates_require_existing_event() {
        let store = InMemoryEventStore::new();
        let missing = Uuid::new_v4();
        let error = store
            .save_task_context(missing, json!({}))
            .await
            .expect_err("missing");
        assert!(matches!(error, StoreError::NotFound(id) if id == missing));

        let id = store.insert(json!({ "event_type": "qa_query" })).await.expect("insert");
        store
            .update_data(id, json!({ "event_type": "qa_query", "query": "q" }))
            .await
            .expect("update");
        let event = store.load(id).await.expect("load").expect("present");
        assert_eq!(event.data["query"], json!("q"));
        assert!(event.task_context.is_none());
    }
}
