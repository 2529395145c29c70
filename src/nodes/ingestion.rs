//! Extraction, chunking and embedding: the three steps of document ingestion.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use super::{PipelineServices, SourceError, wrong_event};
use crate::documents::TextChunk;
use crate::embedding::ensure_count;
use crate::event::{DocumentUploadEvent, Event};
use crate::pipeline::{Node, NodeError, TaskContext};
use crate::qdrant::compute_chunk_hash;
use crate::vector_store::VectorRecord;

const DOCUMENT_SECTION: &str = "document";
const SAMPLE_PREVIEWS: usize = 5;
const PREVIEW_CHARS: usize = 200;

fn upload_event(node: &'static str, event: &Event) -> Result<DocumentUploadEvent, NodeError> {
    match event {
        Event::DocumentUpload(upload) => Ok(upload.clone()),
        other => Err(wrong_event(node, "document_upload", other)),
    }
}

fn preset_document_id(context: &TaskContext) -> Option<String> {
    context
        .metadata_section(DOCUMENT_SECTION)
        .and_then(|document| document.get("id"))
        .and_then(Value::as_str)
        .filter(|id| !id.trim().is_empty())
        .map(str::to_string)
}

/// Resolves the uploaded document and converts it into a structured document.
pub struct ExtractionNode {
    services: Arc<PipelineServices>,
}

impl ExtractionNode {
    /// Create the node.
    pub fn new(services: Arc<PipelineServices>) -> Self {
        Self { services }
    }

    async fn download(&self, url: &str, target: &Path) -> Result<(), SourceError> {
        let download_error = |message: String| SourceError::Download {
            url: url.to_string(),
            message,
        };

        tracing::info!(url, target = %target.display(), "Downloading document for ingestion");
        let response = self
            .services
            .http
            .get(url)
            .timeout(self.services.settings.download_timeout)
            .send()
            .await
            .map_err(|error| download_error(error.to_string()))?
            .error_for_status()
            .map_err(|error| download_error(error.to_string()))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|error| download_error(error.to_string()))?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| SourceError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(target, &bytes)
            .await
            .map_err(|source| SourceError::Io {
                path: target.to_path_buf(),
                source,
            })
    }

    async fn resolve_local(&self, filename: &str) -> Result<PathBuf, SourceError> {
        let source = PathBuf::from(filename);
        if !tokio::fs::try_exists(&source).await.unwrap_or(false) {
            return Err(SourceError::NotFound { path: source });
        }
        tokio::fs::canonicalize(&source)
            .await
            .map_err(|error| SourceError::Io {
                path: source,
                source: error,
            })
    }
}

#[async_trait]
impl Node for ExtractionNode {
    fn name(&self) -> &'static str {
        "ExtractionNode"
    }

    async fn process(&self, mut context: TaskContext) -> Result<TaskContext, NodeError> {
        let upload = upload_event(self.name(), context.event())?;
        let document_id =
            preset_document_id(&context).unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        let filename = Path::new(&upload.filename)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("{document_id}.bin"));

        let local_path = if upload.file_url.trim().is_empty() {
            self.resolve_local(&upload.filename).await?
        } else {
            let target = self
                .services
                .settings
                .ingestion_dir
                .join(format!("{document_id}_{filename}"));
            self.download(&upload.file_url, &target).await?;
            target
        };

        let document = self.services.converter.convert(&local_path).await?;
        let page_count = document.page_count;
        let local_display = local_path.display().to_string();

        tracing::info!(
            document_id = %document_id,
            path = %local_display,
            page_count,
            sections = document.sections.len(),
            "Document extracted"
        );

        let state = context.state_mut();
        state.document = Some(document);
        state.source_path = Some(local_path);

        context.metadata_mut().insert(
            DOCUMENT_SECTION.into(),
            json!({
                "id": document_id,
                "original_filename": filename,
                "source_url": upload.file_url,
                "local_path": local_display,
                "ingest_source": upload.filename,
                "page_count": page_count,
                "metadata": upload.metadata,
                "doc_type": upload.doc_type,
            }),
        );
        context.record_node(
            self.name(),
            json!({
                "document_id": document_id,
                "local_path": local_display,
                "page_count": page_count,
            }),
        );
        Ok(context)
    }
}

/// Splits the extracted document into token-bounded chunks.
pub struct ChunkingNode {
    services: Arc<PipelineServices>,
}

impl ChunkingNode {
    /// Create the node.
    pub fn new(services: Arc<PipelineServices>) -> Self {
        Self { services }
    }
}

fn render_preview(chunk: &TextChunk) -> String {
    let collapsed = chunk.text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(PREVIEW_CHARS).collect()
}

#[async_trait]
impl Node for ChunkingNode {
    fn name(&self) -> &'static str {
        "ChunkingNode"
    }

    async fn process(&self, mut context: TaskContext) -> Result<TaskContext, NodeError> {
        upload_event(self.name(), context.event())?;
        let document = context
            .state()
            .document
            .as_ref()
            .ok_or(NodeError::MissingArtifact {
                node: self.name(),
                artifact: "an extracted document",
            })?;

        let settings = &self.services.settings;
        let chunks = self.services.chunker.chunk(
            document,
            settings.chunk_max_tokens,
            settings.merge_adjacent_chunks,
        )?;

        let chunk_count = chunks.len();
        let previews: Vec<Value> = chunks
            .iter()
            .take(SAMPLE_PREVIEWS)
            .enumerate()
            .map(|(index, chunk)| json!({ "index": index, "preview": render_preview(chunk) }))
            .collect();
        tracing::debug!(chunk_count, "Document chunked");

        context.state_mut().chunks = Some(chunks);
        context
            .metadata_section_mut(DOCUMENT_SECTION)
            .insert("chunk_count".into(), json!(chunk_count));
        context.record_node(
            self.name(),
            json!({
                "chunk_count": chunk_count,
                "sample_previews": previews,
            }),
        );
        Ok(context)
    }
}

/// Embeds the chunks, writes them to the vector store and releases the working state.
pub struct EmbeddingNode {
    services: Arc<PipelineServices>,
}

impl EmbeddingNode {
    /// Create the node.
    pub fn new(services: Arc<PipelineServices>) -> Self {
        Self { services }
    }
}

fn chunk_metadata(
    document: &Map<String, Value>,
    document_id: &str,
    title: Option<&str>,
    index: usize,
    chunk: &TextChunk,
) -> Map<String, Value> {
    let original_filename = document.get("original_filename").cloned().unwrap_or(Value::Null);
    let mut metadata = Map::new();
    metadata.insert("filename".into(), original_filename.clone());
    metadata.insert("original_filename".into(), original_filename);
    metadata.insert(
        "doc_type".into(),
        document.get("doc_type").cloned().unwrap_or(Value::Null),
    );
    metadata.insert("page_numbers".into(), json!(chunk.page_numbers));
    metadata.insert("title".into(), json!(title));
    metadata.insert("heading".into(), json!(chunk.heading));
    metadata.insert("chunk_index".into(), json!(index));
    metadata.insert("token_count".into(), json!(chunk.token_count));
    metadata.insert("document_id".into(), json!(document_id));
    metadata.insert("chunk_hash".into(), json!(compute_chunk_hash(&chunk.text)));
    metadata
}

#[async_trait]
impl Node for EmbeddingNode {
    fn name(&self) -> &'static str {
        "EmbeddingNode"
    }

    async fn process(&self, mut context: TaskContext) -> Result<TaskContext, NodeError> {
        upload_event(self.name(), context.event())?;
        let chunks = context.state_mut().chunks.take().ok_or(NodeError::MissingArtifact {
            node: self.name(),
            artifact: "document chunks",
        })?;
        let title = context
            .state()
            .document
            .as_ref()
            .and_then(|document| document.title.clone());

        let document_id =
            preset_document_id(&context).unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        let document = context.metadata_section_mut(DOCUMENT_SECTION);
        document.insert("id".into(), json!(document_id));
        let document = document.clone();

        let vector_ids = if chunks.is_empty() {
            Vec::new()
        } else {
            let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
            let vectors = self
                .services
                .embedder
                .generate_embeddings(texts, &self.services.settings.embedding_model)
                .await?;
            let vectors = ensure_count(chunks.len(), vectors)?;
            let records = chunks
                .iter()
                .zip(vectors)
                .enumerate()
                .map(|(index, (chunk, vector))| VectorRecord {
                    contents: chunk.text.clone(),
                    vector,
                    metadata: chunk_metadata(&document, &document_id, title.as_deref(), index, chunk),
                })
                .collect();
            self.services.vector_store.upsert(records).await?
        };

        tracing::info!(
            document_id = %document_id,
            embedded_chunks = vector_ids.len(),
            "Chunks embedded and stored"
        );

        let preview: Vec<&String> = vector_ids
            .iter()
            .take(self.services.settings.chunk_preview_limit)
            .collect();
        let result = json!({
            "embedded_chunks": vector_ids.len(),
            "vector_ids": preview,
            "vector_ids_truncated": preview.len() < vector_ids.len(),
        });

        let document = context.metadata_section_mut(DOCUMENT_SECTION);
        document.insert("embedded_chunk_count".into(), json!(vector_ids.len()));
        document.insert("vector_ids".into(), json!(vector_ids));
        context.record_node(self.name(), result);
        context.state_mut().clear();
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::testing::{ScriptedCompletion, services};
    use crate::pipeline::ErrorKind;
    use httpmock::{Method::GET, MockServer};

    fn upload(filename: &str, file_url: &str) -> Event {
        Event::DocumentUpload(DocumentUploadEvent {
            filename: filename.into(),
            file_url: file_url.into(),
            doc_type: Some("memo".into()),
            metadata: Map::new(),
        })
    }

    #[tokio::test]
    async fn extraction_reads_local_file_and_fills_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("memo.md");
        std::fs::write(&path, "# Memo\nQuarterly budget review.").expect("write");
        let (services, _) = services(dir.path(), ScriptedCompletion::empty());

        let context = ExtractionNode::new(services)
            .process(TaskContext::new(upload(path.to_str().expect("utf8"), "")))
            .await
            .expect("extraction");

        assert!(context.state().document.is_some());
        let document = context.metadata_section("document").expect("document");
        assert_eq!(document["original_filename"], json!("memo.md"));
        assert_eq!(document["page_count"], json!(1));
        assert_eq!(document["doc_type"], json!("memo"));
        assert_eq!(
            context.node_result("ExtractionNode").and_then(|r| r.get("document_id")),
            document.get("id")
        );
    }

    #[tokio::test]
    async fn extraction_keeps_preset_document_id_and_downloads() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/files/report.txt");
                then.status(200).body("Revenue grew in the third quarter.");
            })
            .await;
        let dir = tempfile::tempdir().expect("tempdir");
        let (services, _) = services(dir.path(), ScriptedCompletion::empty());

        let mut metadata = Map::new();
        metadata.insert("document".into(), json!({ "id": "fixed-id" }));
        let event = upload("report.txt", &server.url("/files/report.txt"));
        let context = ExtractionNode::new(services)
            .process(TaskContext::with_metadata(event, metadata))
            .await
            .expect("extraction");

        let expected = dir.path().join("ingestion").join("fixed-id_report.txt");
        assert!(expected.exists());
        assert_eq!(context.metadata()["document"]["id"], json!("fixed-id"));
    }

    #[tokio::test]
    async fn extraction_without_url_or_file_is_not_ready() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (services, _) = services(dir.path(), ScriptedCompletion::empty());
        let error = ExtractionNode::new(services)
            .process(TaskContext::new(upload("/definitely/missing.pdf", "")))
            .await
            .expect_err("missing source");
        assert_eq!(error.kind(), ErrorKind::InputNotReady);
    }

    #[tokio::test]
    async fn chunking_requires_extracted_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (services, _) = services(dir.path(), ScriptedCompletion::empty());
        let error = ChunkingNode::new(services)
            .process(TaskContext::new(upload("memo.md", "")))
            .await
            .expect_err("no document");
        assert!(matches!(error, NodeError::MissingArtifact { .. }));
        assert_eq!(error.kind(), ErrorKind::Wiring);
    }

    #[tokio::test]
    async fn embedding_stores_chunks_and_clears_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (services, store) = services(dir.path(), ScriptedCompletion::empty());

        let mut context = TaskContext::new(upload("memo.md", ""));
        context.metadata_section_mut("document").insert("original_filename".into(), json!("memo.md"));
        context.state_mut().chunks = Some(vec![
            TextChunk {
                text: "first chunk".into(),
                page_numbers: vec![1],
                heading: Some("Intro".into()),
                token_count: 2,
            },
            TextChunk {
                text: "second chunk".into(),
                page_numbers: vec![2],
                heading: None,
                token_count: 2,
            },
        ]);

        let context = EmbeddingNode::new(services)
            .process(context)
            .await
            .expect("embedding");

        assert!(context.state().is_empty());
        assert_eq!(store.len().await, 2);
        let document = context.metadata_section("document").expect("document");
        assert_eq!(document["embedded_chunk_count"], json!(2));
        assert_eq!(document["vector_ids"].as_array().map(Vec::len), Some(2));
        assert_eq!(
            context.node_result("EmbeddingNode").map(|r| r["vector_ids_truncated"].clone()),
            Some(json!(false))
        );
    }

    struct ShortEmbedder;

    #[async_trait]
    impl crate::embedding::EmbeddingClient for ShortEmbedder {
        async fn generate_embeddings(
            &self,
            texts: Vec<String>,
            _model: &str,
        ) -> Result<Vec<Vec<f32>>, crate::embedding::EmbeddingClientError> {
            Ok(texts.iter().skip(1).map(|_| vec![0.5; 16]).collect())
        }
    }

    #[tokio::test]
    async fn embedding_rejects_missing_vectors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (base, store) = services(dir.path(), ScriptedCompletion::empty());
        let services = Arc::new(PipelineServices {
            converter: base.converter.clone(),
            chunker: base.chunker.clone(),
            embedder: Arc::new(ShortEmbedder),
            vector_store: base.vector_store.clone(),
            completion: base.completion.clone(),
            http: base.http.clone(),
            settings: base.settings.clone(),
        });

        let mut context = TaskContext::new(upload("memo.md", ""));
        context.state_mut().chunks = Some(vec![
            TextChunk {
                text: "first chunk".into(),
                page_numbers: vec![1],
                heading: None,
                token_count: 2,
            },
            TextChunk {
                text: "second chunk".into(),
                page_numbers: vec![1],
                heading: None,
                token_count: 2,
            },
        ]);

        let error = EmbeddingNode::new(services)
            .process(context)
            .await
            .expect_err("vector count mismatch");
        assert!(matches!(
            error,
            NodeError::Embedding(crate::embedding::EmbeddingClientError::InvalidResponse(_))
        ));
        assert!(error.to_string().contains("expected 2 vectors"));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn ingestion_nodes_reject_other_events() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (services, _) = services(dir.path(), ScriptedCompletion::empty());
        let event = Event::SearchQuery(crate::event::SearchQueryEvent {
            query: "q".into(),
            filters: None,
            limit: None,
        });
        let error = EmbeddingNode::new(services)
            .process(TaskContext::new(event))
            .await
            .expect_err("wrong event");
        assert!(matches!(
            error,
            NodeError::WrongEvent { actual: "search_query", .. }
        ));
    }
}
