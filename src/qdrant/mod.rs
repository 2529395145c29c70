//! Qdrant vector store integration.

pub mod client;
pub mod filters;
pub mod payload;
/// Streaming helpers for Qdrant scroll pagination.
pub mod scroller;
pub mod store;
pub mod types;

pub use client::QdrantService;
pub use filters::{build_document_filter, build_metadata_filter};
pub use payload::compute_chunk_hash;
pub use store::QdrantVectorStore;
pub use types::{PointInsert, QdrantError, ScoredPoint};
