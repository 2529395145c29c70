use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use super::StoreError;

/// One classification decision recorded for a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRecord {
    /// Classified document.
    pub document_id: String,
    /// Chosen label.
    pub label: String,
    /// Classifier confidence.
    pub confidence: f64,
    /// Who produced the label (`ai` for automatic runs).
    pub source: String,
    /// Classifier identifier, e.g. `openai:gpt-4.1-mini`.
    pub classifier_version: Option<String>,
    /// Classifier explanation.
    pub reasoning: Option<String>,
    /// Extra facts about the decision.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// When the decision was recorded.
    pub created_at: String,
}

/// Candidate labels and classification history.
#[async_trait]
pub trait ClassificationStore: Send + Sync {
    /// Labels the classifier may choose from.
    async fn candidate_labels(&self) -> Result<Vec<String>, StoreError>;

    /// Whether any classification exists for `document_id`.
    async fn has_classification(&self, document_id: &str) -> Result<bool, StoreError>;

    /// Append a classification decision.
    async fn record_classification(&self, record: ClassificationRecord) -> Result<(), StoreError>;
}

/// Process-local classification store seeded with a fixed label set.
#[derive(Debug, Default)]
pub struct InMemoryClassificationStore {
    labels: Vec<String>,
    history: RwLock<Vec<ClassificationRecord>>,
}

impl InMemoryClassificationStore {
    /// Create a store offering `labels` as candidates.
    pub fn new(labels: Vec<String>) -> Self {
        Self {
            labels,
            history: RwLock::new(Vec::new()),
        }
    }

    /// Recorded decisions, oldest first.
    pub async fn history(&self) -> Vec<ClassificationRecord> {
        self.history.read().await.clone()
    }
}

#[async_trait]
impl ClassificationStore for InMemoryClassificationStore {
    async fn candidate_labels(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.labels.clone())
    }

    async fn has_classification(&self, document_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .history
            .read()
            .await
            .iter()
            .any(|record| record.document_id == document_id))
    }

    async fn record_classification(&self, record: ClassificationRecord) -> Result<(), StoreError> {
        tracing::debug!(
            document_id = %record.document_id,
            label = %record.label,
            source = %record.source,
            "Recorded classification"
        );
        self.history.write().await.push(record);
        Ok(())
    }
}
