//! Vector store abstraction shared by the ingestion and retrieval nodes.
//!
//! Chunk metadata is stored flat next to the chunk text, so metadata filters are plain
//! key/value equality checks. A filter value that is an array matches any of its elements.

mod memory;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::embedding::EmbeddingClientError;
use crate::qdrant::QdrantError;

pub use memory::InMemoryVectorStore;

/// Errors raised by vector store backends.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    /// Qdrant request failed.
    #[error(transparent)]
    Qdrant(#[from] QdrantError),
    /// Query embedding failed.
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
    /// Vector length disagrees with the collection.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension configured for the collection.
        expected: usize,
        /// Dimension produced by the embedder.
        actual: usize,
    },
    /// Delete was called without any filter.
    #[error("Refusing to delete without a filter")]
    EmptyFilter,
}

/// A chunk ready to be written to the store.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    /// Chunk text.
    pub contents: String,
    /// Embedding of `contents`.
    pub vector: Vec<f32>,
    /// Flat metadata stored alongside the chunk.
    pub metadata: Map<String, Value>,
}

/// A chunk read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkRecord {
    /// Backend identifier.
    pub id: String,
    /// Metadata stored with the chunk.
    pub metadata: Map<String, Value>,
    /// Chunk text.
    pub contents: String,
    /// Cosine distance to the query; absent for non-similarity reads.
    pub distance: Option<f32>,
}

impl ChunkRecord {
    /// `metadata.document_id` as a string, if present.
    pub fn document_id(&self) -> Option<&str> {
        self.metadata_str("document_id")
    }

    /// `metadata.filename` as a string, if present.
    pub fn filename(&self) -> Option<&str> {
        self.metadata_str("filename")
    }

    /// String metadata field, ignoring blanks.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(Value::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    /// `metadata.chunk_index` when it is an integer or a string of digits.
    pub fn chunk_index(&self) -> Option<u64> {
        match self.metadata.get("chunk_index")? {
            Value::Number(number) => number.as_u64(),
            Value::String(text) if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) => {
                text.parse().ok()
            }
            _ => None,
        }
    }
}

/// Storage and similarity search over embedded chunks.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Store `records`, returning one fresh identifier per record, in order.
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<Vec<String>, VectorStoreError>;

    /// Embed `query` and return up to `limit` nearest chunks that satisfy `filters`.
    async fn semantic_search(
        &self,
        query: &str,
        limit: usize,
        filters: Option<&Map<String, Value>>,
    ) -> Result<Vec<ChunkRecord>, VectorStoreError>;

    /// Return up to `limit` chunks of one document ordered by chunk index.
    ///
    /// Matches by `document_id` when given, otherwise by `filename` or `original_filename`.
    async fn fetch_document_chunks(
        &self,
        document_id: Option<&str>,
        filename: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ChunkRecord>, VectorStoreError>;

    /// Remove every chunk whose metadata satisfies `filters`.
    async fn delete(&self, filters: &Map<String, Value>) -> Result<(), VectorStoreError>;
}

/// Canonical form of exact-match filters, shared by every backend.
///
/// Strings are trimmed. `null`, blank strings and arrays left without a string or integer
/// member are dropped; other array members are discarded.
pub fn normalize_filters(filters: &Map<String, Value>) -> Map<String, Value> {
    filters
        .iter()
        .filter_map(|(key, value)| normalize_filter_value(value).map(|value| (key.clone(), value)))
        .collect()
}

fn normalize_filter_value(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(text) => trimmed(text),
        Value::Array(values) => {
            let kept: Vec<Value> = values
                .iter()
                .filter_map(|value| match value {
                    Value::String(text) => trimmed(text),
                    Value::Number(number) if number.is_i64() || number.is_u64() => {
                        Some(value.clone())
                    }
                    _ => None,
                })
                .collect();
            (!kept.is_empty()).then_some(Value::Array(kept))
        }
        other => Some(other.clone()),
    }
}

fn trimmed(text: &str) -> Option<Value> {
    let text = text.trim();
    (!text.is_empty()).then(|| Value::String(text.to_string()))
}

/// Whether `metadata` satisfies every key of `filters` after [`normalize_filters`].
pub fn matches_filters(metadata: &Map<String, Value>, filters: &Map<String, Value>) -> bool {
    matches_normalized(metadata, &normalize_filters(filters))
}

/// Like [`matches_filters`] for filters that are already normalized.
pub(crate) fn matches_normalized(metadata: &Map<String, Value>, filters: &Map<String, Value>) -> bool {
    filters.iter().all(|(key, expected)| {
        let Some(actual) = metadata.get(key) else {
            return false;
        };
        match (expected, actual) {
            (Value::Array(options), Value::Array(values)) => {
                values.iter().any(|value| options.contains(value))
            }
            (Value::Array(options), value) => options.contains(value),
            (value, Value::Array(values)) => values.contains(value),
            (value, actual) => value == actual,
        }
    })
}

/// Order chunks by `chunk_index`, unindexed chunks last.
pub(crate) fn sort_by_chunk_index(chunks: &mut [ChunkRecord]) {
    chunks.sort_by_key(|chunk| chunk.chunk_index().unwrap_or(u64::MAX));
}
