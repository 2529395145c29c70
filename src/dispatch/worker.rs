use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use uuid::Uuid;

use super::queue::{PROCESS_INCOMING_EVENT, TaskHandle, TaskReceiver};
use super::{DispatchError, TaskDispatcher};
use crate::config::MAX_WORKER_CONCURRENCY;
use crate::pipeline::TaskContextRecord;

/// Result of one processed task.
#[derive(Debug)]
pub struct JobOutcome {
    /// Event the task named, when it named one.
    pub event_id: Option<Uuid>,
    /// Persisted context or the failure.
    pub result: Result<TaskContextRecord, DispatchError>,
}

/// Consumes a [`LocalTaskQueue`](super::LocalTaskQueue) and runs each task on the dispatcher.
pub struct Worker {
    dispatcher: Arc<TaskDispatcher>,
    receiver: TaskReceiver,
}

impl Worker {
    /// Create a worker draining `receiver`.
    pub fn new(dispatcher: Arc<TaskDispatcher>, receiver: TaskReceiver) -> Self {
        Self {
            dispatcher,
            receiver,
        }
    }

    /// Process tasks concurrently until `shutdown` resolves or the queue closes.
    ///
    /// At most `worker_concurrency` jobs run at once. In-flight jobs finish before this returns.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        let concurrency = worker_permits(self.dispatcher.settings().worker_concurrency);
        let semaphore = Arc::new(Semaphore::new(concurrency as usize));
        tracing::info!(concurrency, "Worker started");

        tokio::pin!(shutdown);
        loop {
            let task = tokio::select! {
                _ = &mut shutdown => break,
                task = self.receiver.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
            };
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let dispatcher = Arc::clone(&self.dispatcher);
            tokio::spawn(async move {
                execute(&dispatcher, task).await;
                drop(permit);
            });
        }

        if semaphore.acquire_many(concurrency).await.is_err() {
            tracing::warn!("Worker semaphore closed before in-flight jobs finished");
        }
        tracing::info!("Worker stopped");
    }

    /// Process queued tasks one at a time until the queue is empty.
    ///
    /// Follow-ups enqueued by hooks along the way are processed too.
    pub async fn run_until_idle(&mut self) -> Vec<JobOutcome> {
        let mut outcomes = Vec::new();
        while let Ok(task) = self.receiver.try_recv() {
            outcomes.push(execute(&self.dispatcher, task).await);
        }
        outcomes
    }
}

/// Permits for `requested` concurrent jobs, kept within `1..=MAX_WORKER_CONCURRENCY`.
fn worker_permits(requested: usize) -> u32 {
    let permits = requested.clamp(1, MAX_WORKER_CONCURRENCY);
    u32::try_from(permits).unwrap_or(1)
}

async fn execute(dispatcher: &TaskDispatcher, task: TaskHandle) -> JobOutcome {
    let event_id = task.event_id();
    let result = match event_id {
        _ if task.task_name != PROCESS_INCOMING_EVENT => {
            Err(DispatchError::UnknownTask(task.task_name.clone()))
        }
        Some(event_id) => dispatcher.process_incoming_event(event_id).await,
        None => Err(DispatchError::MissingEventId {
            task: task.task_name.clone(),
        }),
    };
    if let Err(error) = &result {
        tracing::error!(
            task_id = %task.id,
            task = %task.task_name,
            error = %error,
            "Task failed"
        );
    }
    JobOutcome { event_id, result }
}
