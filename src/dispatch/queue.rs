use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Name of the task that runs a stored event through its pipeline.
pub const PROCESS_INCOMING_EVENT: &str = "process_incoming_event";

/// Errors raised by the task transport.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The consuming side has gone away.
    #[error("Task queue is closed")]
    Closed,
}

/// A task accepted by the queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskHandle {
    /// Identifier assigned on enqueue.
    pub id: Uuid,
    /// Task to run.
    pub task_name: String,
    /// Positional task arguments.
    pub args: Vec<Value>,
}

impl TaskHandle {
    /// Event identifier carried as the first argument, if it parses.
    pub fn event_id(&self) -> Option<Uuid> {
        self.args
            .first()
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
    }
}

/// Transport used to schedule pipeline runs and follow-up events.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Schedule `task_name` with `args`.
    async fn enqueue(&self, task_name: &str, args: Vec<Value>) -> Result<TaskHandle, QueueError>;
}

/// Receiving half of a [`LocalTaskQueue`].
pub type TaskReceiver = mpsc::UnboundedReceiver<TaskHandle>;

/// In-process queue backed by a tokio channel.
///
/// The channel is unbounded so hooks can enqueue follow-ups from inside a job without waiting
/// on the worker that is running them.
#[derive(Debug, Clone)]
pub struct LocalTaskQueue {
    sender: mpsc::UnboundedSender<TaskHandle>,
}

impl LocalTaskQueue {
    /// Create a queue and the receiver a [`Worker`](super::Worker) consumes.
    pub fn new() -> (Self, TaskReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl TaskQueue for LocalTaskQueue {
    async fn enqueue(&self, task_name: &str, args: Vec<Value>) -> Result<TaskHandle, QueueError> {
        let handle = TaskHandle {
            id: Uuid::new_v4(),
            task_name: task_name.to_string(),
            args,
        };
        self.sender
            .send(handle.clone())
            .map_err(|_| QueueError::Closed)?;
        tracing::debug!(task_id = %handle.id, task = task_name, "Enqueued task");
        Ok(handle)
    }
}
