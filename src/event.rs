//! Typed pipeline events.
//!
//! Events arrive as JSON objects discriminated by `event_type`. Parsing is the validation step:
//! a payload that deserializes into [`Event`] is safe to hand to the registry.

use std::num::NonZeroUsize;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised while validating an inbound event payload.
#[derive(Debug, Error)]
pub enum EventError {
    /// Payload did not match any known event shape.
    #[error("Invalid event payload: {0}")]
    Invalid(#[from] serde_json::Error),
    /// A summary event named neither a document id nor a filename.
    #[error("Provide at least document_id or filename for document_summary events.")]
    MissingSummaryTarget,
}

/// Closed set of events the pipelines understand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum Event {
    /// A new document should be ingested.
    DocumentUpload(DocumentUploadEvent),
    /// Classify a block of document text.
    DocumentClassification(DocumentClassificationEvent),
    /// Pull named fields out of a block of document text.
    InformationExtraction(InformationExtractionEvent),
    /// Decide which department should own a document.
    DocumentRouting(DocumentRoutingEvent),
    /// Semantic search over ingested chunks.
    SearchQuery(SearchQueryEvent),
    /// Summarize an ingested document.
    DocumentSummary(DocumentSummaryEvent),
    /// Answer a question from retrieved passages.
    QaQuery(QaQueryEvent),
}

impl Event {
    /// Discriminator string carried in the serialized `event_type` field.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::DocumentUpload(_) => "document_upload",
            Self::DocumentClassification(_) => "document_classification",
            Self::InformationExtraction(_) => "information_extraction",
            Self::DocumentRouting(_) => "document_routing",
            Self::SearchQuery(_) => "search_query",
            Self::DocumentSummary(_) => "document_summary",
            Self::QaQuery(_) => "qa_query",
        }
    }

    /// Validate a raw JSON value as an event.
    pub fn from_value(value: Value) -> Result<Self, EventError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Validate a JSON document as an event.
    pub fn from_json_str(raw: &str) -> Result<Self, EventError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Upload of a document to ingest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentUploadEvent {
    /// Original filename; also used to locate the file when no URL is given.
    pub filename: String,
    /// Remote location of the document. Empty means "read from the local path".
    #[serde(default)]
    pub file_url: String,
    /// Caller-supplied document type hint.
    #[serde(default)]
    pub doc_type: Option<String>,
    /// Free-form metadata supplied by the caller.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Request to classify document text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentClassificationEvent {
    /// Identifier of the document the text belongs to.
    pub document_id: String,
    /// Text to classify.
    pub text: String,
    /// Free-form metadata forwarded to the model.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Request to extract named fields from document text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InformationExtractionEvent {
    /// Identifier of the document the text belongs to.
    pub document_id: String,
    /// Document type used to steer the extraction.
    pub doc_type: String,
    /// Text to extract from.
    pub text: String,
    /// Names of the fields to extract.
    pub fields: Vec<String>,
}

/// Request to route a document to a department.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRoutingEvent {
    /// Identifier of the document being routed.
    pub document_id: String,
    /// Department proposed by the caller.
    pub target_department: String,
    /// Why the caller proposed that department.
    pub reason: String,
}

/// Read an optional count where `0` means "use the configured default".
fn zero_as_unset<'de, D>(deserializer: D) -> Result<Option<NonZeroUsize>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<usize>::deserialize(deserializer)?.and_then(NonZeroUsize::new))
}

/// Semantic search request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQueryEvent {
    /// Free-text query.
    pub query: String,
    /// Exact-match metadata filters.
    #[serde(default)]
    pub filters: Option<Map<String, Value>>,
    /// Maximum number of results.
    #[serde(default, deserialize_with = "zero_as_unset")]
    pub limit: Option<NonZeroUsize>,
}

/// Question to answer from retrieved passages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaQueryEvent {
    /// Natural-language question.
    pub query: String,
    /// Number of passages to retrieve.
    #[serde(default, deserialize_with = "zero_as_unset")]
    pub top_k: Option<NonZeroUsize>,
    /// Exact-match metadata filters.
    #[serde(default)]
    pub filters: Option<Map<String, Value>>,
}

/// Request to summarize an already ingested document.
///
/// At least one of `document_id` or `filename` is always present; the constructor and the
/// deserializer both enforce it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSummaryEvent")]
pub struct DocumentSummaryEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    document_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    doc_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    chunks_limit: Option<NonZeroUsize>,
}

#[derive(Deserialize)]
struct RawSummaryEvent {
    #[serde(default)]
    document_id: Option<String>,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    doc_type: Option<String>,
    #[serde(default, deserialize_with = "zero_as_unset")]
    chunks_limit: Option<NonZeroUsize>,
}

impl TryFrom<RawSummaryEvent> for DocumentSummaryEvent {
    type Error = EventError;

    fn try_from(raw: RawSummaryEvent) -> Result<Self, Self::Error> {
        Self::new(raw.document_id, raw.filename, raw.doc_type, raw.chunks_limit)
    }
}

impl DocumentSummaryEvent {
    /// Build a summary request, rejecting one that names no document.
    pub fn new(
        document_id: Option<String>,
        filename: Option<String>,
        doc_type: Option<String>,
        chunks_limit: Option<NonZeroUsize>,
    ) -> Result<Self, EventError> {
        let document_id = document_id.filter(|value| !value.trim().is_empty());
        let filename = filename.filter(|value| !value.trim().is_empty());
        if document_id.is_none() && filename.is_none() {
            return Err(EventError::MissingSummaryTarget);
        }
        Ok(Self {
            document_id,
            filename,
            doc_type,
            chunks_limit,
        })
    }

    /// Identifier of the document to summarize.
    pub fn document_id(&self) -> Option<&str> {
        self.document_id.as_deref()
    }

    /// Filename of the document to summarize.
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Document type hint.
    pub fn doc_type(&self) -> Option<&str> {
        self.doc_type.as_deref()
    }

    /// Maximum number of chunks to feed the summarizer.
    pub fn chunks_limit(&self) -> Option<usize> {
        self.chunks_limit.map(NonZeroUsize::get)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn upload_event_parses_with_optional_fields() {
        let event = Event::from_value(json!({
            "event_type": "document_upload",
            "filename": "report.txt",
            "file_url": "",
            "metadata": { "team": "legal" }
        }))
        .expect("valid upload");

        assert_eq!(event.event_type(), "document_upload");
        let Event::DocumentUpload(upload) = event else {
            panic!("expected upload variant");
        };
        assert_eq!(upload.filename, "report.txt");
        assert!(upload.doc_type.is_none());
        assert_eq!(upload.metadata["team"], json!("legal"));
    }

    #[test]
    fn summary_event_requires_document_id_or_filename() {
        let error = Event::from_value(json!({
            "event_type": "document_summary",
            "doc_type": "invoice"
        }))
        .expect_err("missing target");
        assert!(error.to_string().contains("document_id or filename"));

        let error = DocumentSummaryEvent::new(Some("  ".into()), None, None, None)
            .expect_err("blank id is not a target");
        assert!(matches!(error, EventError::MissingSummaryTarget));

        let by_name = DocumentSummaryEvent::new(None, Some("a.txt".into()), None, None)
            .expect("filename is enough");
        assert_eq!(by_name.filename(), Some("a.txt"));
        assert_eq!(by_name.document_id(), None);
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let error = Event::from_value(json!({ "event_type": "document_archived" }))
            .expect_err("not a pipeline event");
        assert!(matches!(error, EventError::Invalid(_)));
    }

    #[test]
    fn zero_limits_fall_back_to_defaults() {
        let Event::SearchQuery(search) = Event::from_value(json!({
            "event_type": "search_query",
            "query": "late invoices",
            "limit": 0
        }))
        .expect("zero limit accepted") else {
            panic!("expected search variant");
        };
        assert_eq!(search.limit, None);

        let Event::QaQuery(qa) =
            Event::from_value(json!({ "event_type": "qa_query", "query": "x", "top_k": 0 }))
                .expect("zero top_k accepted")
        else {
            panic!("expected qa variant");
        };
        assert_eq!(qa.top_k, None);

        let Event::DocumentSummary(summary) = Event::from_value(json!({
            "event_type": "document_summary",
            "document_id": "doc-1",
            "chunks_limit": 0
        }))
        .expect("zero chunks_limit accepted") else {
            panic!("expected summary variant");
        };
        assert_eq!(summary.chunks_limit(), None);

        let Event::QaQuery(qa) =
            Event::from_value(json!({ "event_type": "qa_query", "query": "x", "top_k": null }))
                .expect("null top_k accepted")
        else {
            panic!("expected qa variant");
        };
        assert_eq!(qa.top_k, None);
    }

    #[test]
    fn negative_limits_are_rejected() {
        let error = Event::from_value(json!({
            "event_type": "search_query",
            "query": "late invoices",
            "limit": -1
        }))
        .expect_err("negative limit");
        assert!(matches!(error, EventError::Invalid(_)));
    }

    #[test]
    fn serialized_event_carries_discriminator() {
        let event = Event::QaQuery(QaQueryEvent {
            query: "Who signed?".into(),
            top_k: NonZeroUsize::new(3),
            filters: None,
        });
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["event_type"], json!("qa_query"));
        assert_eq!(value["top_k"], json!(3));
        let back = Event::from_value(value).expect("reparse");
        assert_eq!(back, event);
    }
}
