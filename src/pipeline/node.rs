//! The unit of pipeline work and its error taxonomy.

use async_trait::async_trait;
use thiserror::Error;

use super::context::TaskContext;
use crate::completion::CompletionError;
use crate::documents::{ChunkingError, ConversionError};
use crate::embedding::EmbeddingClientError;
use crate::nodes::SourceError;
use crate::vector_store::VectorStoreError;

/// A named step that reads a [`TaskContext`] and returns it enriched.
///
/// A node writes exactly one entry into the context's node results, keyed by [`Node::name`].
#[async_trait]
pub trait Node: Send + Sync {
    /// Stable identifier, also the key of this node's result.
    fn name(&self) -> &'static str;

    /// Run the node.
    async fn process(&self, context: TaskContext) -> Result<TaskContext, NodeError>;
}

/// Coarse failure classes used for retry and reporting decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Pipeline assembled incorrectly or required upstream artifacts missing.
    Wiring,
    /// Prerequisite data does not exist yet.
    InputNotReady,
    /// A collaborator (converter, embedder, vector store, LLM) failed.
    ExternalService,
    /// Inbound event payload was malformed.
    Validation,
}

/// Failures raised by nodes.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Node was handed an event variant it does not handle.
    #[error("{node} cannot handle '{actual}' events (expected '{expected}')")]
    WrongEvent {
        /// Node that rejected the event.
        node: &'static str,
        /// Event type the node handles.
        expected: &'static str,
        /// Event type it received.
        actual: &'static str,
    },
    /// A required upstream artifact is missing from the working state.
    #[error("{node} requires {artifact} from an upstream node")]
    MissingArtifact {
        /// Node that needed the artifact.
        node: &'static str,
        /// Artifact that was missing.
        artifact: &'static str,
    },
    /// Data the node depends on does not exist yet.
    #[error("{0}")]
    InputNotReady(String),
    /// Document source could not be located or fetched.
    #[error(transparent)]
    Source(#[from] SourceError),
    /// Document conversion failed.
    #[error("Document conversion failed: {0}")]
    Conversion(#[from] ConversionError),
    /// Chunking failed.
    #[error("Failed to chunk document: {0}")]
    Chunking(#[from] ChunkingError),
    /// Embedding provider failed.
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
    /// Vector store request failed.
    #[error("Vector store request failed: {0}")]
    VectorStore(#[from] VectorStoreError),
    /// Completion provider failed or returned an unusable response.
    #[error("LLM completion failed: {0}")]
    Completion(#[from] CompletionError),
    /// A value could not be converted to or from JSON.
    #[error("Failed to serialize node data: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl NodeError {
    /// Classify this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::WrongEvent { .. } | Self::MissingArtifact { .. } | Self::Serialization(_) => {
                ErrorKind::Wiring
            }
            Self::InputNotReady(_) => ErrorKind::InputNotReady,
            Self::Source(SourceError::NotFound { .. })
            | Self::Conversion(ConversionError::Empty { .. })
            | Self::Conversion(ConversionError::Unsupported { .. }) => ErrorKind::InputNotReady,
            Self::Chunking(ChunkingError::InvalidChunkSize) => ErrorKind::Wiring,
            Self::Source(_)
            | Self::Conversion(_)
            | Self::Chunking(_)
            | Self::Embedding(_)
            | Self::VectorStore(_)
            | Self::Completion(_) => ErrorKind::ExternalService,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn errors_map_to_expected_kinds() {
        let wrong = NodeError::WrongEvent {
            node: "ChunkingNode",
            expected: "document_upload",
            actual: "qa_query",
        };
        assert_eq!(wrong.kind(), ErrorKind::Wiring);
        assert!(wrong.to_string().contains("qa_query"));

        let not_ready = NodeError::InputNotReady("No chunks".into());
        assert_eq!(not_ready.kind(), ErrorKind::InputNotReady);

        let missing = NodeError::Source(SourceError::NotFound {
            path: PathBuf::from("nowhere.pdf"),
        });
        assert_eq!(missing.kind(), ErrorKind::InputNotReady);

        let blank = NodeError::Conversion(ConversionError::Empty {
            path: PathBuf::from("blank.md"),
        });
        assert_eq!(blank.kind(), ErrorKind::InputNotReady);

        let binary = NodeError::Conversion(ConversionError::Unsupported {
            path: PathBuf::from("scan.bin"),
            reason: "not UTF-8".into(),
        });
        assert_eq!(binary.kind(), ErrorKind::InputNotReady);

        let unreadable = NodeError::Conversion(ConversionError::Unreadable {
            path: PathBuf::from("locked.md"),
            source: std::io::Error::other("permission denied"),
        });
        assert_eq!(unreadable.kind(), ErrorKind::ExternalService);

        let llm = NodeError::Completion(CompletionError::InvalidResponse("not json".into()));
        assert_eq!(llm.kind(), ErrorKind::ExternalService);
    }
}
