//! Concrete pipeline nodes and the collaborators they share.

mod ingestion;
mod llm;
mod retrieval;
mod tasks;
#[cfg(test)]
pub(crate) mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::completion::{CompletionClient, get_completion_client};
use crate::config::{Config, PipelineSettings, VectorStoreKind};
use crate::documents::{
    ChunkingError, DocumentChunker, DocumentConverter, HybridChunker, LocalDocumentConverter,
};
use crate::embedding::{EmbeddingClient, get_embedding_client};
use crate::event::Event;
use crate::pipeline::NodeError;
use crate::qdrant::{QdrantError, QdrantService, QdrantVectorStore};
use crate::vector_store::{InMemoryVectorStore, VectorStore, VectorStoreError};

pub use ingestion::{ChunkingNode, EmbeddingNode, ExtractionNode};
pub use llm::{LlmNode, LlmTask};
pub use retrieval::SemanticSearchNode;
pub use tasks::{
    ClassificationResponse, ClassifyDocument, DocumentClassificationNode, DocumentRoutingNode,
    DocumentSummaryNode, ExtractFields, ExtractedField, InformationExtractionNode,
    InformationExtractionResponse, QaQueryNode, QaResponse, RetrievedChunk, RouteDocument,
    RoutingResponse, SummarizeDocument, SummaryResponse, AnswerQuestion,
};
pub(crate) use tasks::SUMMARY_FALLBACK_KEY;

/// Failures locating or fetching a document source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// No URL was supplied and the local path does not exist.
    #[error("Document '{}' not found and no file_url provided", path.display())]
    NotFound {
        /// Path that was checked.
        path: PathBuf,
    },
    /// Download failed or returned an error status.
    #[error("Failed to download '{url}': {message}")]
    Download {
        /// URL that was requested.
        url: String,
        /// Transport or status error.
        message: String,
    },
    /// Local file operation failed.
    #[error("I/O error at '{}': {source}", path.display())]
    Io {
        /// Path being read or written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Failures assembling [`PipelineServices`] from configuration.
#[derive(Debug, Error)]
pub enum ServicesError {
    /// Tokenizer for the embedding model could not be loaded.
    #[error(transparent)]
    Chunking(#[from] ChunkingError),
    /// Qdrant client could not be constructed.
    #[error(transparent)]
    Qdrant(#[from] QdrantError),
    /// Collection bootstrap failed.
    #[error(transparent)]
    VectorStore(#[from] VectorStoreError),
}

/// Collaborators and tunables shared by every node of every pipeline.
pub struct PipelineServices {
    /// Turns source files into structured documents.
    pub converter: Arc<dyn DocumentConverter>,
    /// Splits structured documents into chunks.
    pub chunker: Arc<dyn DocumentChunker>,
    /// Embeds chunk text.
    pub embedder: Arc<dyn EmbeddingClient>,
    /// Stores and searches embedded chunks.
    pub vector_store: Arc<dyn VectorStore>,
    /// Runs structured completions.
    pub completion: Arc<dyn CompletionClient>,
    /// HTTP client used for document downloads.
    pub http: reqwest::Client,
    /// Node tunables.
    pub settings: PipelineSettings,
}

impl PipelineServices {
    /// Build the production collaborators selected by `config`.
    ///
    /// For the Qdrant backend the collection and its payload indexes are created when missing.
    pub async fn from_config(config: &Config) -> Result<Self, ServicesError> {
        let settings = config.pipeline.clone();
        let embedder = get_embedding_client(config);
        let chunker = HybridChunker::for_model(config.embedding_provider, &settings.embedding_model)?;

        let vector_store: Arc<dyn VectorStore> = match config.vector_store {
            VectorStoreKind::Qdrant => {
                let service = QdrantService::new(&config.qdrant_url, config.qdrant_api_key.clone())?;
                let store = QdrantVectorStore::new(
                    service,
                    config.qdrant_collection_name.clone(),
                    embedder.clone(),
                    settings.embedding_model.clone(),
                    config.embedding_dimension,
                );
                store.ensure_collection().await?;
                Arc::new(store)
            }
            VectorStoreKind::Memory => Arc::new(InMemoryVectorStore::new(
                embedder.clone(),
                settings.embedding_model.clone(),
            )),
        };

        tracing::info!(
            vector_store = ?config.vector_store,
            embedding_provider = ?config.embedding_provider,
            llm_provider = ?config.llm_provider,
            "Pipeline services ready"
        );

        Ok(Self {
            converter: Arc::new(LocalDocumentConverter::new()),
            chunker: Arc::new(chunker),
            embedder,
            vector_store,
            completion: get_completion_client(config),
            http: reqwest::Client::builder()
                .user_agent("doculens/ingestion")
                .build()
                .unwrap_or_default(),
            settings,
        })
    }
}

pub(crate) fn wrong_event(node: &'static str, expected: &'static str, event: &Event) -> NodeError {
    NodeError::WrongEvent {
        node,
        expected,
        actual: event.event_type(),
    }
}
