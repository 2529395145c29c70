//! Document conversion and chunking primitives used by the ingestion nodes.

pub mod chunking;
pub mod convert;

pub use chunking::{ChunkingError, DocumentChunker, HybridChunker, TextChunk};
pub use convert::{
    ConversionError, DocumentConverter, DocumentSection, LocalDocumentConverter,
    StructuredDocument,
};
