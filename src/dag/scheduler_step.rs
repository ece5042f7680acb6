// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use std::path::PathBuf;

use crate::dag::task::{DataMap, TaskId, TaskKind};

/// Description of a task that the scheduler wants the executor to run now.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub id: TaskId,
    pub key: String,
    pub kind: TaskKind,
    /// Fully resolved input (references substituted).
    pub input: DataMap,
    pub configuration: DataMap,
    pub custom_func: Option<String>,
    pub workdir: Option<PathBuf>,
    pub store_output: bool,
    /// 1-based attempt number for this task.
    pub attempt: u32,
    /// Logical-clock value of this dispatch. Completions must echo it back;
    /// completions carrying an older value are ignored.
    pub seq: u64,
}

/// Structured result of a single scheduler "step".
///
/// This is useful for tests that want to manually step the workflow and make
/// assertions about what changed.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Tasks handed to the executor in this step.
    pub newly_scheduled: Vec<ScheduledTask>,
    /// Tasks that reached `Completed` in this step.
    pub newly_completed: Vec<TaskId>,
    /// Tasks that reached terminal `Failed` in this step.
    pub newly_failed: Vec<TaskId>,
    /// Tasks that failed an attempt and were re-queued.
    pub retried: Vec<TaskId>,
    /// Tasks halted at a breakpoint in this step.
    pub held: Vec<TaskId>,
    /// Tasks snapped to `Aborted` by cancellation in this step.
    pub aborted: Vec<TaskId>,
    /// No dispatch is in flight: the run has nothing left to wait for.
    pub quiescent: bool,
}

impl SchedulerStep {
    pub fn scheduled_ids(&self) -> Vec<TaskId> {
        self.newly_scheduled.iter().map(|t| t.id).collect()
    }
}
