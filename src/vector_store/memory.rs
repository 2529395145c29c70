use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    ChunkRecord, VectorRecord, VectorStore, VectorStoreError, matches_normalized,
    normalize_filters, sort_by_chunk_index,
};
use crate::embedding::EmbeddingClient;

struct StoredPoint {
    id: String,
    vector: Vec<f32>,
    metadata: Map<String, Value>,
    contents: String,
}

impl StoredPoint {
    fn to_record(&self, distance: Option<f32>) -> ChunkRecord {
        ChunkRecord {
            id: self.id.clone(),
            metadata: self.metadata.clone(),
            contents: self.contents.clone(),
            distance,
        }
    }
}

/// Process-local vector store using brute-force cosine similarity.
pub struct InMemoryVectorStore {
    embedder: Arc<dyn EmbeddingClient>,
    model: String,
    points: RwLock<Vec<StoredPoint>>,
}

impl InMemoryVectorStore {
    /// Create an empty store that embeds queries with `embedder`.
    pub fn new(embedder: Arc<dyn EmbeddingClient>, model: impl Into<String>) -> Self {
        Self {
            embedder,
            model: model.into(),
            points: RwLock::new(Vec::new()),
        }
    }

    /// Number of stored chunks.
    pub async fn len(&self) -> usize {
        self.points.read().await.len()
    }

    /// Whether the store holds no chunks.
    pub async fn is_empty(&self) -> bool {
        self.points.read().await.is_empty()
    }
}

fn field<'a>(metadata: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    metadata.get(key).and_then(Value::as_str)
}

fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let dot: f32 = left.iter().zip(right).map(|(a, b)| a * b).sum();
    let left_norm = left.iter().map(|v| v * v).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|v| v * v).sum::<f32>().sqrt();
    if left_norm == 0.0 || right_norm == 0.0 {
        0.0
    } else {
        dot / (left_norm * right_norm)
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<Vec<String>, VectorStoreError> {
        let mut points = self.points.write().await;
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            let id = Uuid::new_v4().to_string();
            points.push(StoredPoint {
                id: id.clone(),
                vector: record.vector,
                metadata: record.metadata,
                contents: record.contents,
            });
            ids.push(id);
        }
        tracing::debug!(inserted = ids.len(), total = points.len(), "Stored chunks in memory");
        Ok(ids)
    }

    async fn semantic_search(
        &self,
        query: &str,
        limit: usize,
        filters: Option<&Map<String, Value>>,
    ) -> Result<Vec<ChunkRecord>, VectorStoreError> {
        let query_vector = self
            .embedder
            .generate_embeddings(vec![query.to_string()], &self.model)
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();

        let filters = filters.map(normalize_filters);
        let points = self.points.read().await;
        let mut scored: Vec<(f32, &StoredPoint)> = points
            .iter()
            .filter(|point| {
                filters
                    .as_ref()
                    .is_none_or(|filters| matches_normalized(&point.metadata, filters))
            })
            .map(|point| {
                if point.vector.len() != query_vector.len() {
                    return Err(VectorStoreError::DimensionMismatch {
                        expected: point.vector.len(),
                        actual: query_vector.len(),
                    });
                }
                Ok((cosine_similarity(&query_vector, &point.vector), point))
            })
            .collect::<Result<_, _>>()?;

        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(similarity, point)| point.to_record(Some(1.0 - similarity)))
            .collect())
    }

    async fn fetch_document_chunks(
        &self,
        document_id: Option<&str>,
        filename: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ChunkRecord>, VectorStoreError> {
        fn non_blank(value: &str) -> Option<&str> {
            let value = value.trim();
            (!value.is_empty()).then_some(value)
        }
        let document_id = document_id.and_then(non_blank);
        let filename = filename.and_then(non_blank);

        let points = self.points.read().await;
        let mut chunks: Vec<ChunkRecord> = points
            .iter()
            .filter(|point| match (document_id, filename) {
                (Some(id), _) => field(&point.metadata, "document_id") == Some(id),
                (None, Some(name)) => {
                    field(&point.metadata, "filename") == Some(name)
                        || field(&point.metadata, "original_filename") == Some(name)
                }
                (None, None) => false,
            })
            .map(|point| point.to_record(None))
            .collect();
        sort_by_chunk_index(&mut chunks);
        chunks.truncate(limit);
        Ok(chunks)
    }

    async fn delete(&self, filters: &Map<String, Value>) -> Result<(), VectorStoreError> {
        let filters = normalize_filters(filters);
        if filters.is_empty() {
            return Err(VectorStoreError::EmptyFilter);
        }
        let mut points = self.points.write().await;
        let before = points.len();
        points.retain(|point| !matches_normalized(&point.metadata, &filters));
        tracing::debug!(removed = before - points.len(), "Deleted chunks from memory");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DeterministicEmbeddingClient;
    use serde_json::json;

    async fn seeded_store() -> InMemoryVectorStore {
        let embedder = Arc::new(DeterministicEmbeddingClient::new(16));
        let store = InMemoryVectorStore::new(embedder.clone(), "hash");
        let texts = ["invoice total due", "contract renewal", "invoice line items"];
        let vectors = embedder
            .generate_embeddings(texts.iter().map(|t| t.to_string()).collect(), "hash")
            .await
            .expect("vectors");
        let records = texts
            .iter()
            .zip(vectors)
            .enumerate()
            .map(|(index, (text, vector))| {
                let document_id = if index == 1 { "doc-b" } else { "doc-a" };
                let chunk_index = if index == 2 { 0 } else { index + 1 };
                VectorRecord {
                    contents: text.to_string(),
                    vector,
                    metadata: json!({
                        "document_id": document_id,
                        "chunk_index": chunk_index,
                        "filename": "a.txt"
                    })
                    .as_object()
                    .cloned()
                    .expect("object"),
                }
            })
            .collect();
        store.upsert(records).await.expect("upsert");
        store
    }

    #[tokio::test]
    async fn search_ranks_exact_match_first() {
        let store = seeded_store().await;
        let results = store
            .semantic_search("contract renewal", 2, None)
            .await
            .expect("search");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].contents, "contract renewal");
        assert!(results[0].distance.expect("distance").abs() < 1e-5);
    }

    #[tokio::test]
    async fn document_chunks_are_ordered_and_limited() {
        let store = seeded_store().await;
        let chunks = store
            .fetch_document_chunks(Some("doc-a"), None, 10)
            .await
            .expect("chunks");
        let order: Vec<&str> = chunks.iter().map(|c| c.contents.as_str()).collect();
        assert_eq!(order, vec!["invoice line items", "invoice total due"]);

        let limited = store
            .fetch_document_chunks(None, Some("a.txt"), 1)
            .await
            .expect("chunks");
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn delete_requires_filter_and_removes_matches() {
        let store = seeded_store().await;
        assert!(matches!(
            store.delete(&Map::new()).await,
            Err(VectorStoreError::EmptyFilter)
        ));

        let filter = json!({ "document_id": "doc-a" }).as_object().cloned().expect("object");
        store.delete(&filter).await.expect("delete");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn filters_are_normalized_like_the_qdrant_backend() {
        let store = seeded_store().await;
        let padded = json!({ "document_id": " doc-b ", "filename": "" })
            .as_object()
            .cloned()
            .expect("object");
        let results = store
            .semantic_search("invoice", 5, Some(&padded))
            .await
            .expect("search");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].contents, "contract renewal");
        assert!(crate::qdrant::build_metadata_filter(&padded).is_some());

        let blank = json!({ "document_id": "  " }).as_object().cloned().expect("object");
        assert!(crate::qdrant::build_metadata_filter(&blank).is_none());
        assert!(matches!(
            store.delete(&blank).await,
            Err(VectorStoreError::EmptyFilter)
        ));

        let chunks = store
            .fetch_document_chunks(Some(" doc-a "), None, 10)
            .await
            .expect("chunks");
        assert_eq!(chunks.len(), 2);
        assert!(
            store
                .fetch_document_chunks(Some(" "), None, 10)
                .await
                .expect("chunks")
                .is_empty()
        );
    }
}
