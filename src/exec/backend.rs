// src/exec/backend.rs

//! Pluggable executor abstraction.
//!
//! The dispatcher talks to a [`TaskExecutor`] instead of spawning anything
//! itself. Production code uses [`crate::exec::CommandExecutor`]; tests
//! provide their own implementation that simulates work and returns canned
//! outputs.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use thiserror::Error;

use crate::dag::{DataMap, ScheduledTask, TaskId, TaskKind};

/// Everything an executor gets for one attempt of one task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRequest {
    pub id: TaskId,
    pub key: String,
    pub kind: TaskKind,
    pub input: DataMap,
    pub configuration: DataMap,
    pub workdir: Option<PathBuf>,
    /// 1-based attempt number.
    pub attempt: u32,
}

impl From<&ScheduledTask> for TaskRequest {
    fn from(task: &ScheduledTask) -> Self {
        Self {
            id: task.id,
            key: task.key.clone(),
            kind: task.kind,
            input: task.input.clone(),
            configuration: task.configuration.clone(),
            workdir: task.workdir.clone(),
            attempt: task.attempt,
        }
    }
}

/// Result reported by an executor that was reached.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(DataMap),
    /// The task ran but produced no usable output.
    Failure(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("task error: {0}")]
    Task(String),

    /// The executor itself could not be reached.
    #[error("executor unreachable: {0}")]
    Transport(String),
}

/// Trait abstracting how a single task attempt is executed.
///
/// Implementations must be shareable across the worker tasks spawned by
/// the dispatcher.
pub trait TaskExecutor: Send + Sync {
    fn execute(
        &self,
        request: TaskRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Outcome, ExecutorError>> + Send + '_>>;
}
