// src/errors.rs

//! Crate-wide error types.
//!
//! Only structural problems and internal invariant violations surface as
//! errors. The outcome of an individual task is never an error here; it is
//! recorded in the task's status (see [`crate::dag::TaskStatus`]).

use thiserror::Error;

use crate::dag::TaskId;

/// Structural problems with a task graph. Always fatal at construction or
/// load time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("link {from} -> {to} would create a cycle")]
    Cycle { from: TaskId, to: TaskId },

    #[error("no task with id {0} in graph")]
    UnknownTask(TaskId),

    #[error("graph already has a Start task ({0}); cannot add another ({1})")]
    MultipleStart(TaskId, TaskId),

    #[error("graph has no Start task")]
    MissingStart,

    #[error("task {0} is not reachable from the Start task")]
    Unreachable(TaskId),

    #[error("task key '{0}' is already used in this graph")]
    DuplicateKey(String),

    #[error("invalid task reference '{0}' (expected $<task-id>.<output-key>)")]
    InvalidReference(String),

    #[error("task {consumer} reads {reference}, which is not upstream of it")]
    ReferenceNotUpstream { consumer: TaskId, reference: String },

    #[error("task {task} names custom function '{path}' which is not registered")]
    UnknownFunction { task: TaskId, path: String },

    #[error("invalid custom function path '{0}' (expected package.module.function)")]
    InvalidFunctionPath(String),
}

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Unresolved reference ${task}.{key} in input of task {consumer}")]
    UnresolvedReference {
        consumer: TaskId,
        task: TaskId,
        key: String,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Workflow is already running")]
    AlreadyRunning,

    #[error("Workflow is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, FlowError>;
