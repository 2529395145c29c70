#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use doculens::classifier::{ClassificationResult, ClassifierError, DocumentClassifier};
use doculens::completion::{
    CompletionClient, CompletionError, CompletionRequest, CompletionResponse,
};
use doculens::config::{DispatchSettings, PipelineSettings};
use doculens::dispatch::{LocalTaskQueue, TaskDispatcher, Worker};
use doculens::documents::{HybridChunker, LocalDocumentConverter};
use doculens::embedding::{DeterministicEmbeddingClient, EmbeddingClient, EmbeddingClientError};
use doculens::nodes::PipelineServices;
use doculens::pipelines::default_registry;
use doculens::store::{InMemoryClassificationStore, InMemoryEventStore};
use doculens::vector_store::InMemoryVectorStore;
use serde_json::Value;

pub enum Reply {
    Json(Value),
    Fail(&'static str),
}

/// Completion client replaying scripted replies in order.
#[derive(Default)]
pub struct ScriptedCompletion {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn json(replies: impl IntoIterator<Item = Value>) -> Arc<Self> {
        Self::new(replies.into_iter().map(Reply::Json))
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        let model = request.model.clone();
        self.requests.lock().expect("requests lock").push(request);
        match self.replies.lock().expect("replies lock").pop_front() {
            Some(Reply::Json(value)) => Ok(CompletionResponse {
                content: value.to_string(),
                model,
                usage: None,
            }),
            Some(Reply::Fail(message)) => Err(CompletionError::GenerationFailed(message.into())),
            None => Err(CompletionError::ProviderUnavailable(
                "no scripted reply".into(),
            )),
        }
    }
}

/// Embedder that fails a fixed number of times before delegating to the deterministic one.
pub struct FlakyEmbedder {
    failures_left: AtomicUsize,
    calls: AtomicUsize,
    inner: DeterministicEmbeddingClient,
}

impl FlakyEmbedder {
    pub fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures_left: AtomicUsize::new(failures),
            calls: AtomicUsize::new(0),
            inner: DeterministicEmbeddingClient::new(16),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingClient for FlakyEmbedder {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
        model: &str,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(EmbeddingClientError::ProviderUnavailable(
                "connection refused".into(),
            ));
        }
        self.inner.generate_embeddings(texts, model).await
    }
}

/// Classifier that always answers with the first candidate label.
#[derive(Default)]
pub struct FirstLabelClassifier {
    inputs: Mutex<Vec<String>>,
    fail: bool,
}

impl FirstLabelClassifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            inputs: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().expect("inputs lock").clone()
    }
}

#[async_trait]
impl DocumentClassifier for FirstLabelClassifier {
    async fn classify(
        &self,
        text: &str,
        labels: &[String],
    ) -> Result<ClassificationResult, ClassifierError> {
        self.inputs.lock().expect("inputs lock").push(text.to_string());
        if self.fail {
            return Err(ClassifierError::Completion(CompletionError::GenerationFailed(
                "classifier offline".into(),
            )));
        }
        let label = labels.first().cloned().ok_or(ClassifierError::NoLabels)?;
        Ok(ClassificationResult {
            label,
            confidence: 0.9,
            reasoning: Some("first candidate".into()),
            candidate_labels: labels.to_vec(),
        })
    }

    fn version(&self) -> String {
        "test:first-label".into()
    }
}

pub struct TestServices {
    pub services: Arc<PipelineServices>,
    pub vectors: Arc<InMemoryVectorStore>,
}

pub fn settings(root: &Path) -> PipelineSettings {
    PipelineSettings {
        ingestion_dir: root.join("ingestion"),
        embedding_model: "test-embedding".into(),
        llm_model: "test-llm".into(),
        summary_chunk_limit: 4,
        ..PipelineSettings::default()
    }
}

pub fn services_with(
    root: &Path,
    completion: Arc<dyn CompletionClient>,
    embedder: Arc<dyn EmbeddingClient>,
) -> TestServices {
    let settings = settings(root);
    let vectors = Arc::new(InMemoryVectorStore::new(
        Arc::new(DeterministicEmbeddingClient::new(16)),
        settings.embedding_model.clone(),
    ));
    let services = PipelineServices {
        converter: Arc::new(LocalDocumentConverter::new()),
        chunker: Arc::new(HybridChunker::whitespace()),
        embedder,
        vector_store: vectors.clone(),
        completion,
        http: reqwest::Client::new(),
        settings,
    };
    TestServices {
        services: Arc::new(services),
        vectors,
    }
}

pub fn services(root: &Path, completion: Arc<dyn CompletionClient>) -> TestServices {
    services_with(
        root,
        completion,
        Arc::new(DeterministicEmbeddingClient::new(16)),
    )
}

pub fn write_document(root: &Path, name: &str, contents: &str) -> PathBuf {
    let path = root.join(name);
    std::fs::write(&path, contents).expect("write document");
    path
}

pub const MEMO: &str = "# Refund policy\n\nCustomers may request a refund within 30 days of purchase.\n\n# Shipping\n\nOrders ship within two business days from the central warehouse.";

pub fn dispatch_settings() -> DispatchSettings {
    DispatchSettings {
        max_retries: 2,
        retry_backoff: std::time::Duration::from_millis(1),
        time_limit: None,
        worker_concurrency: 2,
        auto_summary: false,
        auto_classify: false,
    }
}

pub struct Harness {
    pub dispatcher: Arc<TaskDispatcher>,
    pub worker: Worker,
    pub events: Arc<InMemoryEventStore>,
    pub classifications: Arc<InMemoryClassificationStore>,
}

pub fn harness(
    services: Arc<PipelineServices>,
    labels: Vec<String>,
    classifier: Arc<dyn DocumentClassifier>,
    settings: DispatchSettings,
) -> Harness {
    let events = Arc::new(InMemoryEventStore::new());
    let classifications = Arc::new(InMemoryClassificationStore::new(labels));
    let (queue, receiver) = LocalTaskQueue::new();
    let dispatcher = Arc::new(TaskDispatcher::new(
        default_registry(services),
        events.clone(),
        Arc::new(queue),
        classifications.clone(),
        classifier,
        settings,
    ));
    let worker = Worker::new(dispatcher.clone(), receiver);
    Harness {
        dispatcher,
        worker,
        events,
        classifications,
    }
}
