// src/exec/dispatcher.rs

//! Execution disciplines.
//!
//! - `BlockingTask` dispatches are awaited by the runtime loop itself; the
//!   loop processes nothing else until they return.
//! - Every other dispatch is spawned onto the Tokio runtime, bounded by a
//!   semaphore of `max_workers` permits, and reports back over the
//!   completion channel.
//!
//! A task naming a `custom_func` runs the registered function on the
//! blocking thread pool instead of calling the external executor.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error, warn};

use crate::dag::{ScheduledTask, TaskId};
use crate::engine::{AttemptWindow, FailureKind, RuntimeEvent, TaskOutcome};
use crate::workflow::output_store;

use super::backend::{ExecutorError, Outcome, TaskExecutor, TaskRequest};
use super::registry::FunctionRegistry;

/// Runs a single attempt and turns its result into a [`TaskOutcome`].
#[derive(Clone)]
struct Worker {
    executor: Arc<dyn TaskExecutor>,
    registry: Arc<FunctionRegistry>,
    timeout: Option<Duration>,
}

impl Worker {
    async fn run(&self, task: ScheduledTask) -> RuntimeEvent {
        let (id, seq) = (task.id, task.seq);
        let started = Utc::now();
        let outcome = self.execute(task).await;
        RuntimeEvent::TaskCompleted {
            task: id,
            seq,
            outcome,
            window: Some(AttemptWindow {
                started,
                finished: Utc::now(),
            }),
        }
    }

    async fn execute(&self, task: ScheduledTask) -> TaskOutcome {
        if let Some(dir) = task.workdir.as_deref() {
            if let Err(e) = output_store::ensure_workdir(dir) {
                return TaskOutcome::failed(format!(
                    "creating workdir {}: {e}",
                    dir.display()
                ));
            }
        }

        let request = TaskRequest::from(&task);
        let attempt = self.invoke(task.id, task.custom_func.clone(), request);
        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(task = task.id, key = %task.key, ?limit, "dispatch timed out");
                    return TaskOutcome::Failed {
                        kind: FailureKind::Timeout,
                        reason: format!("timed out after {limit:?}"),
                    };
                }
            },
            None => attempt.await,
        };

        match result {
            Ok(Outcome::Success(output)) => match task.workdir.as_deref() {
                Some(dir) if task.store_output => match output_store::write_output(dir, &output) {
                    Ok(handle) => TaskOutcome::Success(handle),
                    Err(e) => TaskOutcome::failed(format!("storing output: {e}")),
                },
                _ => TaskOutcome::success(output),
            },
            Ok(Outcome::Failure(reason)) | Err(ExecutorError::Task(reason)) => {
                TaskOutcome::failed(reason)
            }
            Err(ExecutorError::Transport(reason)) => TaskOutcome::Failed {
                kind: FailureKind::Transport,
                reason,
            },
        }
    }

    async fn invoke(
        &self,
        id: TaskId,
        custom_func: Option<String>,
        request: TaskRequest,
    ) -> Result<Outcome, ExecutorError> {
        let Some(path) = custom_func else {
            return self.executor.execute(request).await;
        };

        let func = self
            .registry
            .get(&path)
            .ok_or_else(|| ExecutorError::Task(format!("function '{path}' is not registered")))?;
        debug!(task = id, function = %path, "running custom function");

        tokio::task::spawn_blocking(move || func(&request))
            .await
            .map_err(|e| ExecutorError::Task(format!("function '{path}' panicked: {e}")))?
    }
}

/// Hands scheduled tasks to the executor according to their discipline.
pub struct Dispatcher {
    worker: Worker,
    permits: Arc<Semaphore>,
    events_tx: mpsc::UnboundedSender<RuntimeEvent>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("available_permits", &self.permits.available_permits())
            .field("timeout", &self.worker.timeout)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(
        executor: Arc<dyn TaskExecutor>,
        registry: Arc<FunctionRegistry>,
        max_workers: usize,
        timeout: Option<Duration>,
        events_tx: mpsc::UnboundedSender<RuntimeEvent>,
    ) -> Self {
        Self {
            worker: Worker {
                executor,
                registry,
                timeout,
            },
            permits: Arc::new(Semaphore::new(max_workers.max(1))),
            events_tx,
        }
    }

    /// Dispatch one task.
    ///
    /// Blocking tasks are run to completion here and their completion event
    /// is returned; concurrent tasks are spawned and report through the
    /// completion channel, in which case `None` is returned.
    pub async fn dispatch(&self, task: ScheduledTask) -> Option<RuntimeEvent> {
        if task.kind.is_blocking() {
            debug!(task = task.id, key = %task.key, "running blocking task inline");
            return Some(self.worker.run(task).await);
        }

        let worker = self.worker.clone();
        let permits = Arc::clone(&self.permits);
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(task = task.id, error = %e, "worker pool closed");
                    return;
                }
            };
            let event = worker.run(task).await;
            if events_tx.send(event).is_err() {
                debug!("runtime gone; dropping completion");
            }
        });
        None
    }
}
