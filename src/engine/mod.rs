// src/engine/mod.rs

//! Orchestration engine for flowdag.
//!
//! This module ties together:
//! - the pure scheduler core
//! - the async runtime loop that reacts to:
//!   - task completion events from the dispatcher
//!   - control commands from the controller (cancel, breakpoint step, input)
//! - the user-facing [`WorkflowController`]
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use std::fmt;

use chrono::{DateTime, Utc};

use crate::dag::{DataMap, OutputHandle, TaskId};

/// Why an attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The executor reported a failure or returned nothing.
    Task,
    /// The executor could not be reached.
    Transport,
    /// The dispatch exceeded the configured deadline.
    Timeout,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Task => "task",
            FailureKind::Transport => "transport",
            FailureKind::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Outcome of one dispatch, as seen by the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Success(OutputHandle),
    Failed { kind: FailureKind, reason: String },
}

impl TaskOutcome {
    pub fn success(output: DataMap) -> Self {
        TaskOutcome::Success(OutputHandle::Inline(output))
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        TaskOutcome::Failed {
            kind: FailureKind::Task,
            reason: reason.into(),
        }
    }
}

/// When one attempt actually ran, measured around the executor call.
///
/// Dispatch time and the time the loop handles the outcome can both be far
/// from this: a blocking task may wait behind another one, and a concurrent
/// task may wait for a worker permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptWindow {
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
}

/// Requests from the controller, queued into the single-writer loop.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    Cancel,
    StepBreakpoint(TaskId),
    Input(DataMap),
}

/// Events flowing into the runtime.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// Start or resume the run.
    Begin { from: Option<TaskId> },
    /// A dispatch finished.
    TaskCompleted {
        task: TaskId,
        seq: u64,
        outcome: TaskOutcome,
        window: Option<AttemptWindow>,
    },
    Control(ControlCommand),
}

/// Final state of a run once the loop has quiesced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub is_completed: bool,
    pub has_failed: bool,
    pub failed_task: Option<TaskId>,
    pub active_breakpoint: Option<TaskId>,
    pub cancelled: bool,
}

pub mod controller;
pub mod core;
pub mod runtime;

pub use controller::{ControlHandle, WorkflowController};
pub use self::core::{CoreCommand, CoreRuntime, CoreStep};
pub use runtime::Runtime;
