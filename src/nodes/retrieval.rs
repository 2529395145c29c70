use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::{PipelineServices, wrong_event};
use crate::event::Event;
use crate::pipeline::{Node, NodeError, TaskContext};

/// Similarity search over stored chunks.
///
/// The full result set goes to `metadata.search`; the node result keeps a preview.
pub struct SemanticSearchNode {
    services: Arc<PipelineServices>,
}

impl SemanticSearchNode {
    /// Create the node.
    pub fn new(services: Arc<PipelineServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Node for SemanticSearchNode {
    fn name(&self) -> &'static str {
        "SemanticSearchNode"
    }

    async fn process(&self, mut context: TaskContext) -> Result<TaskContext, NodeError> {
        let Event::SearchQuery(event) = context.event() else {
            return Err(wrong_event(self.name(), "search_query", context.event()));
        };
        let event = event.clone();
        let settings = &self.services.settings;

        let limit = event
            .limit
            .map(|value| value.get())
            .unwrap_or(settings.search_result_limit);
        let mut results = self
            .services
            .vector_store
            .semantic_search(&event.query, limit, event.filters.as_ref())
            .await?;
        results.truncate(limit);

        let preview = &results[..results.len().min(settings.search_preview_limit)];
        tracing::info!(
            query = %event.query,
            limit,
            result_count = results.len(),
            "Semantic search completed"
        );

        let node_result = json!({
            "query": event.query,
            "filters": event.filters,
            "result_count": results.len(),
            "preview": preview,
            "results_truncated": preview.len() < results.len(),
            "limit": limit,
        });
        context.metadata_mut().insert(
            "search".into(),
            json!({
                "query": event.query,
                "filters": event.filters,
                "limit": limit,
                "results": results,
            }),
        );
        context.record_node(self.name(), node_result);
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SearchQueryEvent;
    use crate::nodes::testing::{ScriptedCompletion, services};
    use crate::vector_store::{VectorRecord, VectorStore};
    use serde_json::{Map, Value};
    use std::num::NonZeroUsize;

    async fn seed(services: &PipelineServices, count: usize) {
        let texts: Vec<String> = (0..count).map(|index| format!("refund clause {index}")).collect();
        let vectors = services
            .embedder
            .generate_embeddings(texts.clone(), "test-embedding")
            .await
            .expect("embed");
        let records = texts
            .into_iter()
            .zip(vectors)
            .map(|(contents, vector)| VectorRecord {
                contents,
                vector,
                metadata: json!({ "doc_type": "policy" }).as_object().cloned().expect("object"),
            })
            .collect();
        services.vector_store.upsert(records).await.expect("upsert");
    }

    fn search(limit: Option<usize>, filters: Option<Map<String, Value>>) -> Event {
        Event::SearchQuery(SearchQueryEvent {
            query: "refund policy".into(),
            filters,
            limit: limit.and_then(NonZeroUsize::new),
        })
    }

    #[tokio::test]
    async fn limit_caps_results_and_preview_flags_truncation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (services, _) = services(dir.path(), ScriptedCompletion::empty());
        seed(&services, 8).await;

        let context = SemanticSearchNode::new(services)
            .process(TaskContext::new(search(Some(3), None)))
            .await
            .expect("search");

        let result = context.node_result("SemanticSearchNode").expect("result");
        assert_eq!(result["result_count"], json!(3));
        assert_eq!(result["preview"].as_array().map(Vec::len), Some(3));
        assert_eq!(result["results_truncated"], json!(false));
        assert_eq!(context.metadata()["search"]["results"].as_array().map(Vec::len), Some(3));
    }

    #[tokio::test]
    async fn default_limit_truncates_preview() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (services, _) = services(dir.path(), ScriptedCompletion::empty());
        seed(&services, 8).await;

        let context = SemanticSearchNode::new(services)
            .process(TaskContext::new(search(None, None)))
            .await
            .expect("search");

        let result = context.node_result("SemanticSearchNode").expect("result");
        assert_eq!(result["limit"], json!(10));
        assert_eq!(result["result_count"], json!(8));
        assert_eq!(result["preview"].as_array().map(Vec::len), Some(5));
        assert_eq!(result["results_truncated"], json!(true));
    }

    #[tokio::test]
    async fn filters_apply_and_empty_results_are_not_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (services, _) = services(dir.path(), ScriptedCompletion::empty());
        seed(&services, 2).await;

        let filters = json!({ "doc_type": "invoice" }).as_object().cloned();
        let context = SemanticSearchNode::new(services)
            .process(TaskContext::new(search(None, filters)))
            .await
            .expect("search");

        let result = context.node_result("SemanticSearchNode").expect("result");
        assert_eq!(result["result_count"], json!(0));
        assert_eq!(result["filters"]["doc_type"], json!("invoice"));
    }
}
