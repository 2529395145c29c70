//! The DocuLens pipeline declarations and the registry that maps events onto them.

use std::sync::Arc;

use crate::nodes::{
    ChunkingNode, DocumentClassificationNode, DocumentRoutingNode, DocumentSummaryNode,
    EmbeddingNode, ExtractionNode, InformationExtractionNode, PipelineServices, QaQueryNode,
    SemanticSearchNode,
};
use crate::pipeline::{Node, Pipeline, PipelineError, PipelineRegistry, PipelineSchema};

/// Registry key used when an event type has no pipeline of its own.
pub const DEFAULT_PIPELINE: &str = "default";

/// Extraction, chunking and embedding of an uploaded document.
pub fn ingestion_pipeline(services: &Arc<PipelineServices>) -> Result<Pipeline, PipelineError> {
    let nodes: Vec<Arc<dyn Node>> = vec![
        Arc::new(ExtractionNode::new(services.clone())),
        Arc::new(ChunkingNode::new(services.clone())),
        Arc::new(EmbeddingNode::new(services.clone())),
    ];
    Pipeline::new(
        "ingestion",
        PipelineSchema::chain("Extract, chunk and embed an uploaded document", nodes),
    )
}

fn single(
    name: &'static str,
    description: &'static str,
    node: Arc<dyn Node>,
) -> Result<Pipeline, PipelineError> {
    Pipeline::new(name, PipelineSchema::chain(description, vec![node]))
}

/// LLM classification of supplied document text.
pub fn classification_pipeline(
    services: &Arc<PipelineServices>,
) -> Result<Pipeline, PipelineError> {
    single(
        "classification",
        "Classify a document into a business label",
        Arc::new(DocumentClassificationNode::new(services.clone())),
    )
}

/// LLM extraction of requested fields.
pub fn extraction_pipeline(services: &Arc<PipelineServices>) -> Result<Pipeline, PipelineError> {
    single(
        "information_extraction",
        "Extract requested fields from document text",
        Arc::new(InformationExtractionNode::new(services.clone())),
    )
}

/// LLM department routing.
pub fn routing_pipeline(services: &Arc<PipelineServices>) -> Result<Pipeline, PipelineError> {
    single(
        "routing",
        "Route a document to a department",
        Arc::new(DocumentRoutingNode::new(services.clone())),
    )
}

/// Similarity search over stored chunks.
pub fn search_pipeline(services: &Arc<PipelineServices>) -> Result<Pipeline, PipelineError> {
    single(
        "search",
        "Semantic search over stored chunks",
        Arc::new(SemanticSearchNode::new(services.clone())),
    )
}

/// Summary of an ingested document.
pub fn summary_pipeline(services: &Arc<PipelineServices>) -> Result<Pipeline, PipelineError> {
    single(
        "summary",
        "Summarize an ingested document from its stored chunks",
        Arc::new(DocumentSummaryNode::new(services.clone())),
    )
}

/// Question answering over stored chunks.
pub fn qa_pipeline(services: &Arc<PipelineServices>) -> Result<Pipeline, PipelineError> {
    single(
        "qa",
        "Answer a question from the most relevant stored chunks",
        Arc::new(QaQueryNode::new(services.clone())),
    )
}

/// Registry with every DocuLens pipeline; unknown event types fall back to ingestion.
pub fn default_registry(services: Arc<PipelineServices>) -> PipelineRegistry {
    let mut registry = PipelineRegistry::new(services, DEFAULT_PIPELINE);
    registry
        .register(DEFAULT_PIPELINE, ingestion_pipeline)
        .register("document_upload", ingestion_pipeline)
        .register("document_classification", classification_pipeline)
        .register("information_extraction", extraction_pipeline)
        .register("document_routing", routing_pipeline)
        .register("search_query", search_pipeline)
        .register("document_summary", summary_pipeline)
        .register("qa_query", qa_pipeline);
    registry
}
