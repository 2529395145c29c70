//! Follow-up work scheduled after a successful, persisted run.

use std::sync::Arc;

use serde_json::{Map, Value, json};
use uuid::Uuid;

use super::DispatchError;
use super::queue::{PROCESS_INCOMING_EVENT, TaskQueue};
use crate::classifier::DocumentClassifier;
use crate::event::Event;
use crate::metrics::DispatchMetrics;
use crate::nodes::SUMMARY_FALLBACK_KEY;
use crate::pipeline::TaskContextRecord;
use crate::store::{
    ClassificationRecord, ClassificationStore, EventStore, find_summary_event, now_rfc3339,
};

const FILENAME_KEYS: [&str; 3] = ["original_filename", "stored_filename", "ingest_source"];

/// Auto-summary and auto-classification hooks.
pub(super) struct FollowUps {
    pub(super) events: Arc<dyn EventStore>,
    pub(super) queue: Arc<dyn TaskQueue>,
    pub(super) classifications: Arc<dyn ClassificationStore>,
    pub(super) classifier: Arc<dyn DocumentClassifier>,
    pub(super) metrics: Arc<DispatchMetrics>,
    pub(super) auto_summary: bool,
    pub(super) auto_classify: bool,
    pub(super) summary_chunk_limit: usize,
}

impl FollowUps {
    /// Run the hook matching the event that produced `record`.
    ///
    /// Failures are logged here and never reach the caller.
    pub(super) async fn after_run(&self, event_id: Uuid, record: &TaskContextRecord) {
        let outcome = match &record.event {
            Event::DocumentUpload(_) if self.auto_summary => self.schedule_summary(record).await,
            Event::DocumentSummary(_) if self.auto_classify => {
                self.classify_summaries(record).await
            }
            _ => return,
        };
        if let Err(error) = outcome {
            tracing::error!(
                event_id = %event_id,
                event_type = record.event.event_type(),
                error = %error,
                "Post-processing hook failed"
            );
        }
    }

    async fn schedule_summary(&self, record: &TaskContextRecord) -> Result<(), DispatchError> {
        let Some(document) = record.metadata.get("document").and_then(Value::as_object) else {
            return Ok(());
        };
        let Some(document_id) = document
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
        else {
            return Ok(());
        };

        if find_summary_event(self.events.as_ref(), document_id)
            .await?
            .is_some()
        {
            tracing::debug!(document_id, "Summary already scheduled; skipping");
            return Ok(());
        }

        let filename = FILENAME_KEYS.iter().find_map(|key| {
            document
                .get(*key)
                .and_then(Value::as_str)
                .filter(|value| !value.is_empty())
        });
        let payload = json!({
            "event_type": "document_summary",
            "document_id": document_id,
            "filename": filename,
            "doc_type": document.get("doc_type").cloned().unwrap_or(Value::Null),
            "chunks_limit": self.summary_chunk_limit,
        });
        Event::from_value(payload.clone())?;

        let summary_event_id = self.events.insert(payload).await?;
        self.queue
            .enqueue(
                PROCESS_INCOMING_EVENT,
                vec![Value::String(summary_event_id.to_string())],
            )
            .await?;
        self.metrics.record_follow_up();
        tracing::info!(
            event_id = %summary_event_id,
            document_id,
            "Queued automatic summary event"
        );
        Ok(())
    }

    async fn classify_summaries(&self, record: &TaskContextRecord) -> Result<(), DispatchError> {
        let Some(summaries) = record
            .metadata
            .get("document_summaries")
            .and_then(Value::as_object)
            .filter(|summaries| !summaries.is_empty())
        else {
            return Ok(());
        };

        let labels = self.classifications.candidate_labels().await?;
        if labels.is_empty() {
            tracing::info!("Skipping auto classification; no candidate labels configured");
            return Ok(());
        }

        for (document_id, payload) in summaries {
            if document_id.is_empty() || document_id == SUMMARY_FALLBACK_KEY {
                continue;
            }
            let Some(payload) = payload.as_object() else {
                continue;
            };
            if self.classifications.has_classification(document_id).await? {
                continue;
            }
            let Some(text) = render_summary_for_classification(payload) else {
                continue;
            };

            let result = match self.classifier.classify(&text, &labels).await {
                Ok(result) => result,
                Err(error) => {
                    tracing::warn!(
                        document_id = %document_id,
                        error = %error,
                        "Automatic classification failed"
                    );
                    continue;
                }
            };

            let mut metadata = Map::new();
            metadata.insert("auto_classified".into(), Value::Bool(true));
            let label = result.label.clone();
            self.classifications
                .record_classification(ClassificationRecord {
                    document_id: document_id.clone(),
                    label: result.label,
                    confidence: result.confidence,
                    source: "ai".into(),
                    classifier_version: Some(self.classifier.version()),
                    reasoning: result.reasoning,
                    metadata,
                    created_at: now_rfc3339(),
                })
                .await?;
            tracing::info!(
                document_id = %document_id,
                label = %label,
                "Stored automatic classification"
            );
        }
        Ok(())
    }
}

fn non_blank_lines(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| match item {
                    Value::String(text) => text.trim().to_string(),
                    other => other.to_string(),
                })
                .filter(|line| !line.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Flatten a stored summary into classifier input; `None` when nothing usable remains.
pub(super) fn render_summary_for_classification(payload: &Map<String, Value>) -> Option<String> {
    let mut segments = Vec::new();

    if let Some(summary) = payload
        .get("summary")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|summary| !summary.is_empty())
    {
        segments.push(summary.to_string());
    }

    for (heading, key) in [("Highlights", "bullet_points"), ("Next steps", "next_steps")] {
        let lines = non_blank_lines(payload.get(key));
        if !lines.is_empty() {
            let bullets: Vec<String> = lines.iter().map(|line| format!("- {line}")).collect();
            segments.push(format!("{heading}:\n{}", bullets.join("\n")));
        }
    }

    if segments.is_empty() {
        None
    } else {
        Some(segments.join("\n\n"))
    }
}
