use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::Instrument;
use uuid::Uuid;

use super::DispatchError;
use super::hooks::FollowUps;
use super::queue::{PROCESS_INCOMING_EVENT, TaskHandle, TaskQueue};
use crate::classifier::DocumentClassifier;
use crate::config::DispatchSettings;
use crate::event::Event;
use crate::metrics::DispatchMetrics;
use crate::pipeline::{ErrorKind, PipelineRegistry, TaskContext, TaskContextRecord};
use crate::store::{ClassificationStore, EventStore};

/// An accepted event and the task scheduled for it.
#[derive(Debug, Clone)]
pub struct Submitted {
    /// Identifier of the stored event.
    pub event_id: Uuid,
    /// Task that will process it.
    pub task: TaskHandle,
}

/// Validates, stores and runs events, owning retry and persistence policy.
pub struct TaskDispatcher {
    registry: PipelineRegistry,
    events: Arc<dyn EventStore>,
    queue: Arc<dyn TaskQueue>,
    settings: DispatchSettings,
    metrics: Arc<DispatchMetrics>,
    follow_ups: FollowUps,
}

impl TaskDispatcher {
    /// Assemble a dispatcher.
    ///
    /// `classifications` and `classifier` back the auto-classification hook; the summary chunk
    /// limit for auto-summaries comes from the registry's pipeline settings.
    pub fn new(
        registry: PipelineRegistry,
        events: Arc<dyn EventStore>,
        queue: Arc<dyn TaskQueue>,
        classifications: Arc<dyn ClassificationStore>,
        classifier: Arc<dyn DocumentClassifier>,
        settings: DispatchSettings,
    ) -> Self {
        let metrics = Arc::new(DispatchMetrics::new());
        let follow_ups = FollowUps {
            events: Arc::clone(&events),
            queue: Arc::clone(&queue),
            classifications,
            classifier,
            metrics: Arc::clone(&metrics),
            auto_summary: settings.auto_summary,
            auto_classify: settings.auto_classify,
            summary_chunk_limit: registry.services().settings.summary_chunk_limit,
        };
        Self {
            registry,
            events,
            queue,
            settings,
            metrics,
            follow_ups,
        }
    }

    /// Dispatcher tunables.
    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Counters for runs, retries and follow-ups.
    pub fn metrics(&self) -> &Arc<DispatchMetrics> {
        &self.metrics
    }

    /// Event store backing this dispatcher.
    pub fn events(&self) -> &Arc<dyn EventStore> {
        &self.events
    }

    /// Validate `data`, store it and schedule its processing.
    ///
    /// Invalid payloads are rejected before anything is stored.
    pub async fn submit(&self, data: Value) -> Result<Submitted, DispatchError> {
        let event = Event::from_value(data.clone())?;
        let event_id = self.events.insert(data).await?;
        let task = self
            .queue
            .enqueue(PROCESS_INCOMING_EVENT, vec![Value::String(event_id.to_string())])
            .await?;
        tracing::info!(
            event_id = %event_id,
            event_type = event.event_type(),
            task_id = %task.id,
            "Accepted event"
        );
        Ok(Submitted { event_id, task })
    }

    /// Run a stored event through its pipeline and persist the resulting context.
    ///
    /// External-service failures are retried from the top of the pipeline with exponential
    /// backoff. A failed run leaves the stored event untouched. Follow-up hooks run after the
    /// context is saved and cannot fail the run.
    pub async fn process_incoming_event(
        &self,
        event_id: Uuid,
    ) -> Result<TaskContextRecord, DispatchError> {
        let span = tracing::info_span!("process_incoming_event", event_id = %event_id);
        async move {
            let stored = self
                .events
                .load(event_id)
                .await?
                .ok_or(DispatchError::EventNotFound(event_id))?;
            let event = Event::from_value(stored.data)?;

            let mut attempt: u32 = 0;
            let context = loop {
                match self.run_once(event_id, &event).await {
                    Ok(context) => break context,
                    Err(error)
                        if error.kind() == ErrorKind::ExternalService
                            && attempt < self.settings.max_retries =>
                    {
                        let delay = backoff_delay(self.settings.retry_backoff, attempt);
                        attempt += 1;
                        self.metrics.record_retry();
                        tracing::warn!(
                            attempt,
                            max_retries = self.settings.max_retries,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "Pipeline run failed; retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    Err(error) => {
                        self.metrics.record_failed();
                        tracing::error!(
                            kind = ?error.kind(),
                            attempts = attempt + 1,
                            error = %error,
                            "Pipeline run failed"
                        );
                        return Err(error);
                    }
                }
            };

            let record = context.into_record();
            self.events
                .save_task_context(event_id, serde_json::to_value(&record)?)
                .await?;
            self.metrics.record_completed();
            tracing::info!(
                event_type = record.event.event_type(),
                nodes = record.nodes.len(),
                "Stored task context"
            );

            self.follow_ups.after_run(event_id, &record).await;
            Ok(record)
        }
        .instrument(span)
        .await
    }

    async fn run_once(&self, event_id: Uuid, event: &Event) -> Result<TaskContext, DispatchError> {
        let pipeline = self.registry.instantiate(event)?;
        let run = pipeline.run(event.clone());
        let context = match self.settings.time_limit {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .map_err(|_| DispatchError::TimedOut { event_id, limit })??,
            None => run.await?,
        };
        Ok(context)
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(4));
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        assert_eq!(backoff_delay(Duration::MAX, 5), Duration::MAX);
    }
}
