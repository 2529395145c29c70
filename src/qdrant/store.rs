//! [`VectorStore`] backed by a Qdrant collection.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use serde_json::{Map, Value};

use super::client::QdrantService;
use super::filters::{build_document_filter, build_metadata_filter};
use super::payload::{build_payload, chunk_from_payload, generate_point_id};
use super::scroller::{SCROLL_PAGE_SIZE, stream_chunks};
use super::types::PointInsert;
use crate::embedding::EmbeddingClient;
use crate::vector_store::{
    ChunkRecord, VectorRecord, VectorStore, VectorStoreError, sort_by_chunk_index,
};

/// Chunk storage in one Qdrant collection, queried with cosine similarity.
pub struct QdrantVectorStore {
    service: QdrantService,
    collection: String,
    embedder: Arc<dyn EmbeddingClient>,
    model: String,
    dimension: usize,
}

impl QdrantVectorStore {
    /// Wrap `service`, embedding queries with `embedder` and `model`.
    pub fn new(
        service: QdrantService,
        collection: impl Into<String>,
        embedder: Arc<dyn EmbeddingClient>,
        model: impl Into<String>,
        dimension: usize,
    ) -> Self {
        Self {
            service,
            collection: collection.into(),
            embedder,
            model: model.into(),
            dimension,
        }
    }

    /// Name of the backing collection.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Create the collection and its payload indexes when missing.
    pub async fn ensure_collection(&self) -> Result<(), VectorStoreError> {
        self.service
            .create_collection_if_not_exists(&self.collection, self.dimension as u64)
            .await?;
        self.service.ensure_payload_indexes(&self.collection).await?;
        Ok(())
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), VectorStoreError> {
        if vector.len() == self.dimension {
            Ok(())
        } else {
            Err(VectorStoreError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            })
        }
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<Vec<String>, VectorStoreError> {
        let mut ids = Vec::with_capacity(records.len());
        let mut points = Vec::with_capacity(records.len());
        for record in &records {
            self.check_dimension(&record.vector)?;
            let id = generate_point_id();
            points.push(PointInsert {
                id: id.clone(),
                vector: record.vector.clone(),
                payload: build_payload(record),
            });
            ids.push(id);
        }

        self.service.upsert_points(&self.collection, points).await?;
        tracing::info!(
            collection = %self.collection,
            points = ids.len(),
            "Stored chunk embeddings"
        );
        Ok(ids)
    }

    async fn semantic_search(
        &self,
        query: &str,
        limit: usize,
        filters: Option<&Map<String, Value>>,
    ) -> Result<Vec<ChunkRecord>, VectorStoreError> {
        let vector = self
            .embedder
            .generate_embeddings(vec![query.to_string()], &self.model)
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();
        self.check_dimension(&vector)?;

        let filter = filters.and_then(build_metadata_filter);
        let points = self
            .service
            .query_points(&self.collection, vector, filter, limit)
            .await?;

        Ok(points
            .into_iter()
            .map(|point| {
                chunk_from_payload(
                    point.id,
                    point.payload.unwrap_or_default(),
                    Some(1.0 - point.score),
                )
            })
            .collect())
    }

    async fn fetch_document_chunks(
        &self,
        document_id: Option<&str>,
        filename: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ChunkRecord>, VectorStoreError> {
        let Some(filter) = build_document_filter(document_id, filename) else {
            return Ok(Vec::new());
        };

        let mut chunks: Vec<ChunkRecord> =
            stream_chunks(&self.service, &self.collection, filter, SCROLL_PAGE_SIZE)
                .try_collect()
                .await?;
        sort_by_chunk_index(&mut chunks);
        chunks.truncate(limit);
        Ok(chunks)
    }

    async fn delete(&self, filters: &Map<String, Value>) -> Result<(), VectorStoreError> {
        let filter = build_metadata_filter(filters).ok_or(VectorStoreError::EmptyFilter)?;
        self.service.delete_points(&self.collection, filter).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DeterministicEmbeddingClient;
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;

    fn store(server: &MockServer, dimension: usize) -> QdrantVectorStore {
        let service = QdrantService::new(&server.base_url(), None).expect("service");
        QdrantVectorStore::new(
            service,
            "chunks",
            Arc::new(DeterministicEmbeddingClient::new(dimension)),
            "test-model",
            dimension,
        )
    }

    #[tokio::test]
    async fn search_converts_scores_to_distances() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/chunks/points/query")
                    .json_body_partial(
                        r#"{"limit":2,"filter":{"must":[{"key":"doc_type","match":{"value":"invoice"}}]}}"#,
                    );
                then.status(200).json_body(json!({
                    "result": {
                        "points": [
                            {
                                "id": "p-1",
                                "score": 0.75,
                                "payload": { "contents": "Net 30", "doc_type": "invoice" }
                            }
                        ]
                    }
                }));
            })
            .await;

        let filters = json!({ "doc_type": "invoice" }).as_object().cloned().expect("object");
        let results = store(&server, 8)
            .semantic_search("payment terms", 2, Some(&filters))
            .await
            .expect("search");

        mock.assert();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].contents, "Net 30");
        assert_eq!(results[0].distance, Some(0.25));
    }

    #[tokio::test]
    async fn fetch_document_chunks_sorts_scrolled_points() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/chunks/points/scroll")
                    .body_contains("document_id");
                then.status(200).json_body(json!({
                    "result": {
                        "points": [
                            { "id": "b", "payload": { "contents": "second", "chunk_index": 1, "document_id": "doc" } },
                            { "id": "a", "payload": { "contents": "first", "chunk_index": 0, "document_id": "doc" } },
                            { "id": "c", "payload": { "contents": "third", "chunk_index": 2, "document_id": "doc" } }
                        ],
                        "next_page_offset": null
                    }
                }));
            })
            .await;

        let chunks = store(&server, 8)
            .fetch_document_chunks(Some("doc"), None, 2)
            .await
            .expect("chunks");

        let texts: Vec<&str> = chunks.iter().map(|chunk| chunk.contents.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn upsert_rejects_wrong_dimension() {
        let server = MockServer::start_async().await;
        let error = store(&server, 4)
            .upsert(vec![VectorRecord {
                contents: "text".into(),
                vector: vec![0.1, 0.2],
                metadata: Map::new(),
            }])
            .await
            .expect_err("dimension mismatch");

        assert!(matches!(
            error,
            VectorStoreError::DimensionMismatch {
                expected: 4,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn delete_without_filter_is_rejected() {
        let server = MockServer::start_async().await;
        let error = store(&server, 4)
            .delete(&Map::new())
            .await
            .expect_err("empty filter");
        assert!(matches!(error, VectorStoreError::EmptyFilter));
    }
}
