use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use super::PipelineServices;
use crate::completion::{CompletionClient, CompletionError, CompletionRequest, CompletionResponse};
use crate::config::PipelineSettings;
use crate::documents::{HybridChunker, LocalDocumentConverter};
use crate::embedding::DeterministicEmbeddingClient;
use crate::vector_store::InMemoryVectorStore;

/// Completion client replaying canned JSON replies in order.
#[derive(Default)]
pub(crate) struct ScriptedCompletion {
    replies: Mutex<VecDeque<Value>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub(crate) fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn with_replies(replies: impl IntoIterator<Item = Value>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn requests(&self) -> Vec<CompletionRequest> {
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
        let reply = self
            .replies
            .lock()
            .expect("replies lock")
            .pop_front()
            .ok_or_else(|| CompletionError::ProviderUnavailable("no scripted reply".into()))?;
        Ok(CompletionResponse {
            content: reply.to_string(),
            model,
            usage: None,
        })
    }
}

pub(crate) fn services(
    root: &Path,
    completion: Arc<ScriptedCompletion>,
) -> (Arc<PipelineServices>, Arc<InMemoryVectorStore>) {
    let settings = PipelineSettings {
        ingestion_dir: root.join("ingestion"),
        embedding_model: "test-embedding".into(),
        llm_model: "test-llm".into(),
        ..PipelineSettings::default()
    };
    let embedder = Arc::new(DeterministicEmbeddingClient::new(16));
    let store = Arc::new(InMemoryVectorStore::new(
        embedder.clone(),
        settings.embedding_model.clone(),
    ));
    let services = PipelineServices {
        converter: Arc::new(LocalDocumentConverter::new()),
        chunker: Arc::new(HybridChunker::whitespace()),
        embedder,
        vector_store: store.clone(),
        completion,
        http: reqwest::Client::new(),
        settings,
    };
    (Arc::new(services), store)
}
