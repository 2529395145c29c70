//! The LLM-backed tasks: classification, field extraction, routing, summary and QA.

use std::collections::HashSet;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::llm::{LlmNode, LlmTask};
use super::{PipelineServices, wrong_event};
use crate::completion::{ValidateResponse, check_unit_interval};
use crate::event::Event;
use crate::pipeline::{NodeError, TaskContext};
use crate::prompts;
use crate::vector_store::ChunkRecord;

pub(crate) const SUMMARY_FALLBACK_KEY: &str = "latest";
const SUMMARY_SOURCE_PREVIEW: usize = 5;

/// Classifies a document into a business label.
pub type DocumentClassificationNode = LlmNode<ClassifyDocument>;
/// Extracts requested fields from a document.
pub type InformationExtractionNode = LlmNode<ExtractFields>;
/// Picks the department responsible for a document.
pub type DocumentRoutingNode = LlmNode<RouteDocument>;
/// Summarizes a stored document from its chunks.
pub type DocumentSummaryNode = LlmNode<SummarizeDocument>;
/// Answers a question from the most similar stored chunks.
pub type QaQueryNode = LlmNode<AnswerQuestion>;

fn to_value<T: Serialize>(value: &T) -> Result<Value, NodeError> {
    Ok(serde_json::to_value(value)?)
}

fn require_text(node: &'static str, text: &str) -> Result<(), NodeError> {
    if text.trim().is_empty() {
        Err(NodeError::InputNotReady(format!(
            "{node} received empty document text"
        )))
    } else {
        Ok(())
    }
}

// Classification

/// Classification task.
#[derive(Debug, Default)]
pub struct ClassifyDocument;

/// Model input for classification.
#[derive(Debug, Serialize)]
pub struct ClassificationInput {
    document_id: String,
    text: String,
    metadata: Map<String, Value>,
}

/// Model reply for document classification.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ClassificationResponse {
    /// Predicted document type label.
    pub document_type: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Why the label was chosen.
    pub reasoning: String,
    /// Free-form descriptive tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ValidateResponse for ClassificationResponse {
    fn validate(&self) -> Result<(), String> {
        check_unit_interval("confidence", self.confidence)
    }
}

#[async_trait]
impl LlmTask for ClassifyDocument {
    type Context = ClassificationInput;
    type Response = ClassificationResponse;
    type Retrieved = ();

    const NAME: &'static str = "DocumentClassificationNode";

    fn prompt(&self) -> &'static str {
        prompts::DOCUMENT_CLASSIFICATION
    }

    async fn prepare(
        &self,
        _services: &PipelineServices,
        context: &TaskContext,
    ) -> Result<(Self::Context, ()), NodeError> {
        let Event::DocumentClassification(event) = context.event() else {
            return Err(wrong_event(Self::NAME, "document_classification", context.event()));
        };
        require_text(Self::NAME, &event.text)?;
        Ok((
            ClassificationInput {
                document_id: event.document_id.clone(),
                text: event.text.clone(),
                metadata: event.metadata.clone(),
            },
            (),
        ))
    }

    fn finish(
        &self,
        context: &mut TaskContext,
        response: Self::Response,
        _retrieved: (),
    ) -> Result<(), NodeError> {
        let value = to_value(&response)?;
        context.metadata_mut().insert("classification".into(), value);
        Ok(())
    }
}

// Information extraction

/// Field extraction task.
#[derive(Debug, Default)]
pub struct ExtractFields;

/// Model input for field extraction.
#[derive(Debug, Serialize)]
pub struct ExtractionInput {
    document_id: String,
    doc_type: String,
    text: String,
    fields: Vec<String>,
}

/// One extracted field.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExtractedField {
    /// Requested field name.
    pub name: String,
    /// Value found in the text.
    pub value: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
}

/// Model reply for information extraction.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct InformationExtractionResponse {
    /// Extracted fields.
    #[serde(default)]
    pub fields: Vec<ExtractedField>,
    /// Notes on ambiguous values.
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl ValidateResponse for InformationExtractionResponse {
    fn validate(&self) -> Result<(), String> {
        self.fields.iter().try_for_each(|field| {
            check_unit_interval(&format!("{}.confidence", field.name), field.confidence)
        })
    }
}

#[async_trait]
impl LlmTask for ExtractFields {
    type Context = ExtractionInput;
    type Response = InformationExtractionResponse;
    type Retrieved = ();

    const NAME: &'static str = "InformationExtractionNode";

    fn prompt(&self) -> &'static str {
        prompts::INFORMATION_EXTRACTION
    }

    async fn prepare(
        &self,
        _services: &PipelineServices,
        context: &TaskContext,
    ) -> Result<(Self::Context, ()), NodeError> {
        let Event::InformationExtraction(event) = context.event() else {
            return Err(wrong_event(Self::NAME, "information_extraction", context.event()));
        };
        require_text(Self::NAME, &event.text)?;
        Ok((
            ExtractionInput {
                document_id: event.document_id.clone(),
                doc_type: event.doc_type.clone(),
                text: event.text.clone(),
                fields: event.fields.clone(),
            },
            (),
        ))
    }

    fn finish(
        &self,
        context: &mut TaskContext,
        response: Self::Response,
        _retrieved: (),
    ) -> Result<(), NodeError> {
        let value = to_value(&response)?;
        context.metadata_mut().insert("extraction".into(), value);
        Ok(())
    }
}

// Routing

/// Department routing task.
#[derive(Debug, Default)]
pub struct RouteDocument;

/// Model input for routing.
#[derive(Debug, Serialize)]
pub struct RoutingInput {
    document_id: String,
    candidate_department: String,
    reason: String,
    metadata: Option<Map<String, Value>>,
}

/// Model reply for document routing.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RoutingResponse {
    /// Department that should handle the document.
    pub assigned_department: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Why that department was chosen.
    pub reasoning: String,
    /// Whether a human should review the document urgently.
    #[serde(default)]
    pub escalate: bool,
}

impl ValidateResponse for RoutingResponse {
    fn validate(&self) -> Result<(), String> {
        check_unit_interval("confidence", self.confidence)
    }
}

#[async_trait]
impl LlmTask for RouteDocument {
    type Context = RoutingInput;
    type Response = RoutingResponse;
    type Retrieved = ();

    const NAME: &'static str = "DocumentRoutingNode";

    fn prompt(&self) -> &'static str {
        prompts::DOCUMENT_ROUTING
    }

    async fn prepare(
        &self,
        _services: &PipelineServices,
        context: &TaskContext,
    ) -> Result<(Self::Context, ()), NodeError> {
        let Event::DocumentRouting(event) = context.event() else {
            return Err(wrong_event(Self::NAME, "document_routing", context.event()));
        };
        Ok((
            RoutingInput {
                document_id: event.document_id.clone(),
                candidate_department: event.target_department.clone(),
                reason: event.reason.clone(),
                metadata: context.metadata_section("document").cloned(),
            },
            (),
        ))
    }

    fn finish(
        &self,
        context: &mut TaskContext,
        response: Self::Response,
        _retrieved: (),
    ) -> Result<(), NodeError> {
        let value = to_value(&response)?;
        context.metadata_mut().insert("routing".into(), value);
        Ok(())
    }
}

// Summary

/// Retrieval-augmented summary task.
#[derive(Debug, Default)]
pub struct SummarizeDocument;

/// Model input for summaries.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryInput {
    document_id: Option<String>,
    doc_type: Option<String>,
    filename: Option<String>,
    chunk_texts: Vec<String>,
}

/// Model reply for document summaries.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SummaryResponse {
    /// Prose summary.
    pub summary: String,
    /// Key points.
    #[serde(default)]
    pub bullet_points: Vec<String>,
    /// Follow-up actions implied by the document.
    #[serde(default)]
    pub next_steps: Option<Vec<String>>,
}

impl ValidateResponse for SummaryResponse {
    fn validate(&self) -> Result<(), String> {
        if self.summary.trim().is_empty() {
            Err("summary must not be empty".into())
        } else {
            Ok(())
        }
    }
}

/// Chunks and resolved identity carried from retrieval into `finish`.
pub struct SummarySources {
    chunks: Vec<ChunkRecord>,
    input: SummaryInput,
}

#[async_trait]
impl LlmTask for SummarizeDocument {
    type Context = SummaryInput;
    type Response = SummaryResponse;
    type Retrieved = SummarySources;

    const NAME: &'static str = "DocumentSummaryNode";

    fn prompt(&self) -> &'static str {
        prompts::DOCUMENT_SUMMARY
    }

    async fn prepare(
        &self,
        services: &PipelineServices,
        context: &TaskContext,
    ) -> Result<(Self::Context, SummarySources), NodeError> {
        let Event::DocumentSummary(event) = context.event() else {
            return Err(wrong_event(Self::NAME, "document_summary", context.event()));
        };

        let limit = event
            .chunks_limit()
            .unwrap_or(services.settings.summary_chunk_limit);
        let chunks = services
            .vector_store
            .fetch_document_chunks(event.document_id(), event.filename(), limit)
            .await?;
        let Some(first) = chunks.first() else {
            return Err(NodeError::InputNotReady(
                "No chunks found for requested document; run ingestion first.".into(),
            ));
        };

        let input = SummaryInput {
            document_id: event
                .document_id()
                .or_else(|| first.document_id())
                .map(str::to_string),
            doc_type: event
                .doc_type()
                .or_else(|| first.metadata_str("doc_type"))
                .map(str::to_string),
            filename: event
                .filename()
                .or_else(|| first.metadata_str("original_filename"))
                .or_else(|| first.filename())
                .map(str::to_string),
            chunk_texts: chunks.iter().map(|chunk| chunk.contents.clone()).collect(),
        };
        tracing::debug!(
            document_id = ?input.document_id,
            chunks = chunks.len(),
            "Summary sources retrieved"
        );

        Ok((input.clone(), SummarySources { chunks, input }))
    }

    fn finish(
        &self,
        context: &mut TaskContext,
        response: Self::Response,
        retrieved: SummarySources,
    ) -> Result<(), NodeError> {
        let SummarySources { chunks, input } = retrieved;

        let mut payload = match to_value(&response)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        payload.insert("source_chunk_count".into(), json!(chunks.len()));
        payload.entry("doc_type").or_insert_with(|| json!(input.doc_type));
        payload.entry("filename").or_insert_with(|| json!(input.filename));
        payload
            .entry("document_id")
            .or_insert_with(|| json!(input.document_id));

        let key = input
            .document_id
            .clone()
            .unwrap_or_else(|| SUMMARY_FALLBACK_KEY.to_string());
        context
            .metadata_section_mut("document_summaries")
            .insert(key, Value::Object(payload));

        let source_chunks: Vec<Value> = chunks
            .iter()
            .take(SUMMARY_SOURCE_PREVIEW)
            .map(|chunk| {
                json!({
                    "id": chunk.id,
                    "document_id": chunk.document_id(),
                    "chunk_index": chunk
                        .chunk_index()
                        .map(Value::from)
                        .or_else(|| chunk.metadata.get("chunk_index").cloned()),
                })
            })
            .collect();

        context.record_node(
            Self::NAME,
            json!({
                "summary": response.summary,
                "bullet_points": response.bullet_points,
                "next_steps": response.next_steps,
                "source_chunks": source_chunks,
            }),
        );
        Ok(())
    }
}

// QA

/// Retrieval-augmented question answering task.
#[derive(Debug, Default)]
pub struct AnswerQuestion;

/// A retrieved passage offered to the model as context.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    /// Citation handle shown to the model.
    pub reference: String,
    /// Vector store identifier of the chunk.
    pub chunk_id: String,
    /// Owning document.
    pub document_id: Option<String>,
    /// Source filename.
    pub filename: Option<String>,
    /// Position of the chunk in its document, or its rank when unknown.
    pub chunk_index: u64,
    /// Passage text.
    pub text: String,
}

impl RetrievedChunk {
    fn from_record(rank: usize, record: &ChunkRecord) -> Self {
        let chunk_index = record.chunk_index().unwrap_or(rank as u64);
        let reference = record
            .metadata_str("reference")
            .map(str::to_string)
            .unwrap_or_else(|| {
                format!(
                    "{}#chunk-{chunk_index}",
                    record.document_id().unwrap_or("doc")
                )
            });
        Self {
            reference,
            chunk_id: record.id.clone(),
            document_id: record.document_id().map(str::to_string),
            filename: record.filename().map(str::to_string),
            chunk_index,
            text: record.contents.clone(),
        }
    }
}

/// Model input for question answering.
#[derive(Debug, Serialize)]
pub struct QaInput {
    query: String,
    chunks: Vec<RetrievedChunk>,
}

/// Model reply for question answering.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QaResponse {
    /// Answer to the question.
    pub answer: String,
    /// How the answer follows from the passages.
    #[serde(default)]
    pub reasoning: Option<String>,
    /// Confidence in `[0, 1]`.
    #[serde(default)]
    pub confidence: Option<f64>,
    /// References of the supporting passages.
    #[serde(default)]
    pub citations: Vec<String>,
}

impl ValidateResponse for QaResponse {
    fn validate(&self) -> Result<(), String> {
        match self.confidence {
            Some(confidence) => check_unit_interval("confidence", confidence),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl LlmTask for AnswerQuestion {
    type Context = QaInput;
    type Response = QaResponse;
    type Retrieved = Vec<RetrievedChunk>;

    const NAME: &'static str = "QAQueryNode";

    fn prompt(&self) -> &'static str {
        prompts::QA_ANSWERING
    }

    async fn prepare(
        &self,
        services: &PipelineServices,
        context: &TaskContext,
    ) -> Result<(Self::Context, Vec<RetrievedChunk>), NodeError> {
        let Event::QaQuery(event) = context.event() else {
            return Err(wrong_event(Self::NAME, "qa_query", context.event()));
        };

        let top_k = event
            .top_k
            .map(|value| value.get())
            .unwrap_or(services.settings.qa_top_k);
        let results = services
            .vector_store
            .semantic_search(&event.query, top_k, event.filters.as_ref())
            .await?;
        if results.is_empty() {
            return Err(NodeError::InputNotReady(
                "No semantic matches found for the supplied question. Ensure embeddings exist."
                    .into(),
            ));
        }

        let chunks: Vec<RetrievedChunk> = results
            .iter()
            .take(top_k)
            .enumerate()
            .map(|(rank, record)| RetrievedChunk::from_record(rank, record))
            .collect();
        tracing::debug!(matches = chunks.len(), top_k, "QA passages retrieved");

        Ok((
            QaInput {
                query: event.query.clone(),
                chunks: chunks.clone(),
            },
            chunks,
        ))
    }

    fn user_message(&self, input: &QaInput) -> Result<String, NodeError> {
        let blocks: Vec<String> = input
            .chunks
            .iter()
            .enumerate()
            .map(|(index, chunk)| {
                let mut header = format!("[{}] ref={}", index + 1, chunk.reference);
                if let Some(document_id) = &chunk.document_id {
                    header.push_str(&format!(" | document_id={document_id}"));
                }
                if let Some(filename) = &chunk.filename {
                    header.push_str(&format!(" | filename={filename}"));
                }
                format!("{header}\n{}", chunk.text)
            })
            .collect();
        Ok(format!(
            "Question:\n{}\n\nContext passages:\n{}",
            input.query,
            blocks.join("\n\n")
        ))
    }

    fn finish(
        &self,
        context: &mut TaskContext,
        response: Self::Response,
        chunks: Vec<RetrievedChunk>,
    ) -> Result<(), NodeError> {
        let known: HashSet<&str> = chunks.iter().map(|chunk| chunk.reference.as_str()).collect();
        for citation in &response.citations {
            if !known.contains(citation.as_str()) {
                tracing::warn!(citation = %citation, "Answer cites a passage that was not retrieved");
            }
        }

        let mut qa = match to_value(&response)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        qa.insert(
            "used_chunks".into(),
            json!(chunks.iter().map(|chunk| &chunk.reference).collect::<Vec<_>>()),
        );
        context.metadata_mut().insert("qa".into(), Value::Object(qa));

        let references: Vec<Value> = chunks
            .iter()
            .map(|chunk| {
                json!({
                    "reference": chunk.reference,
                    "chunk_id": chunk.chunk_id,
                    "document_id": chunk.document_id,
                    "filename": chunk.filename,
                    "chunk_index": chunk.chunk_index,
                })
            })
            .collect();

        context.record_node(
            Self::NAME,
            json!({
                "answer": response.answer,
                "reasoning": response.reasoning,
                "citations": response.citations,
                "confidence": response.confidence,
                "chunk_references": references,
            }),
        );
        Ok(())
    }
}
