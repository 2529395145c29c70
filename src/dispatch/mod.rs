//! Dispatcher boundary: event intake, whole-run retries, persistence and follow-up hooks.
//!
//! The pipeline engine never retries or catches. [`TaskDispatcher`] is the first layer allowed
//! to: it retries external-service failures with exponential backoff, persists the task
//! context only for successful runs, and then runs best-effort hooks that may enqueue more work.

mod dispatcher;
mod hooks;
mod queue;
mod worker;

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::event::EventError;
use crate::pipeline::{ErrorKind, PipelineError, RegistryError};
use crate::store::StoreError;

pub use dispatcher::{Submitted, TaskDispatcher};
pub use queue::{
    LocalTaskQueue, PROCESS_INCOMING_EVENT, QueueError, TaskHandle, TaskQueue, TaskReceiver,
};
pub use worker::{JobOutcome, Worker};

/// Failures surfaced at the dispatcher boundary.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Payload is not a valid event.
    #[error(transparent)]
    Validation(#[from] EventError),
    /// No stored event has the requested identifier.
    #[error("Event with id {0} not found")]
    EventNotFound(Uuid),
    /// Worker received a task it does not know how to run.
    #[error("Unknown task '{0}'")]
    UnknownTask(String),
    /// Task arguments did not name an event.
    #[error("Task '{task}' carries no event id")]
    MissingEventId {
        /// Task name from the handle.
        task: String,
    },
    /// Event or classification persistence failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Task transport failed.
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// Event could not be mapped to a pipeline.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// Pipeline run failed.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    /// Run exceeded the configured time limit.
    #[error("Event {event_id} exceeded the {}s time limit", limit.as_secs_f64())]
    TimedOut {
        /// Event being processed.
        event_id: Uuid,
        /// Limit that was exceeded.
        limit: Duration,
    },
    /// Task context could not be serialized for storage.
    #[error("Failed to serialize task context: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DispatchError {
    /// Classify this failure; only [`ErrorKind::ExternalService`] is retried.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::EventNotFound(_) => ErrorKind::InputNotReady,
            Self::Pipeline(error) => error.kind(),
            Self::Registry(RegistryError::Build(error)) => error.kind(),
            Self::UnknownTask(_)
            | Self::MissingEventId { .. }
            | Self::Registry(_)
            | Self::Serialization(_) => ErrorKind::Wiring,
            Self::Store(_) | Self::Queue(_) | Self::TimedOut { .. } => ErrorKind::ExternalService,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::NodeError;

    #[test]
    fn dispatch_errors_map_to_kinds() {
        let invalid = DispatchError::from(EventError::MissingSummaryTarget);
        assert_eq!(invalid.kind(), ErrorKind::Validation);

        let not_ready = DispatchError::Pipeline(PipelineError::NodeFailed {
            node: "DocumentSummaryNode",
            source: NodeError::InputNotReady("No chunks".into()),
        });
        assert_eq!(not_ready.kind(), ErrorKind::InputNotReady);

        let timed_out = DispatchError::TimedOut {
            event_id: Uuid::nil(),
            limit: Duration::from_secs(1),
        };
        assert_eq!(timed_out.kind(), ErrorKind::ExternalService);
        assert!(timed_out.to_string().contains("1s"));

        let unknown = DispatchError::Registry(RegistryError::UnknownPipeline("x".into()));
        assert_eq!(unknown.kind(), ErrorKind::Wiring);
    }
}
