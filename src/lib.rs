#![deny(missing_docs)]

//! Core library for DocuLens: event-driven document pipelines.

/// Label classification for automatic post-summary tagging.
pub mod classifier;
/// Completion client abstraction, adapters and schema-validated responses.
pub mod completion;
/// Environment-driven configuration management.
pub mod config;
/// Event intake, retries, persistence and follow-up scheduling.
pub mod dispatch;
/// Document conversion and chunking.
pub mod documents;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Typed pipeline events.
pub mod event;
/// Archive, delete and restore of ingested documents.
pub mod lifecycle;
/// Structured logging and tracing setup.
pub mod logging;
/// Dispatcher counters.
pub mod metrics;
/// Concrete pipeline nodes.
pub mod nodes;
/// Pipeline engine: context, node contract, execution and registry.
pub mod pipeline;
/// Pipeline declarations and the default registry.
pub mod pipelines;
/// System prompts for the LLM-backed nodes.
pub mod prompts;
/// Qdrant vector store integration.
pub mod qdrant;
/// Event and classification persistence.
pub mod store;
/// Vector store abstraction and in-memory backend.
pub mod vector_store;
