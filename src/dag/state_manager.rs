// src/dag/state_manager.rs

//! Task lifecycle transitions and workflow-level status queries.
//!
//! [`StateManager`] is the only code that writes `status`, `output`,
//! timestamps and `retry_budget`. [`ReadOnlyStateManager`] answers the
//! workflow-level questions (`is_completed`, `has_failed`, ...) from a shared
//! reference.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::dag::graph::TaskGraph;
use crate::dag::reference::{InputValue, Reference};
use crate::dag::task::{DataMap, OutputHandle, TaskId, TaskKind, TaskStatus};
use crate::engine::AttemptWindow;
use crate::errors::{FlowError, Result};

/// What happened to a task after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Budget left: the task is `Ready` again.
    Retry { remaining: u32 },
    /// Budget exhausted (or retries suppressed): the task is `Failed`.
    Terminal,
}

/// Mutating view over a graph's per-task state.
pub struct StateManager<'a> {
    graph: &'a mut TaskGraph,
}

impl<'a> StateManager<'a> {
    pub fn new(graph: &'a mut TaskGraph) -> Self {
        Self { graph }
    }

    /// Move every eligible `Disabled` task to `Ready` and wire its
    /// predecessors' output keys into its input.
    pub fn promote_ready(&mut self) -> Result<Vec<TaskId>> {
        let ready = self.graph.topological_ready_set();
        for &id in &ready {
            self.wire_inputs(id)?;
            if let Some(task) = self.graph.task_mut(id) {
                task.status = TaskStatus::Ready;
                debug!(task = id, key = %task.key, "predecessors completed; marking Ready");
            }
        }
        Ok(ready)
    }

    /// Add `$<pred>.<key>` references for each predecessor output key, under
    /// the link's mapped name. Literal input set by the user is kept; later
    /// links override references from earlier ones.
    ///
    /// A task with `replace_input` instead drops its whole input, literals
    /// included, as soon as any predecessor hands over output.
    fn wire_inputs(&mut self, id: TaskId) -> Result<()> {
        let is_collect = self
            .graph
            .task(id)
            .is_some_and(|t| t.kind == TaskKind::Collect);
        if is_collect {
            return Ok(());
        }

        let mut wired: Vec<(String, Reference)> = Vec::new();
        for pred in self.graph.predecessors(id) {
            let Some(link) = self.graph.link(pred, id) else {
                continue;
            };
            let output = self
                .graph
                .task(pred)
                .map(|t| t.output_data())
                .transpose()?
                .flatten()
                .unwrap_or_default();
            for key in output.keys() {
                wired.push((link.map_key(key).to_string(), Reference::new(pred, key.clone())));
            }
        }

        let task = self.graph.task_mut(id).ok_or(FlowError::TaskNotFound(id))?;
        if task.replace_input && !wired.is_empty() {
            debug!(task = id, key = %task.key, "replacing input with predecessor output");
            task.input_spec.clear();
        }
        for (input_key, reference) in wired {
            let keep_literal = task
                .input_spec
                .get(&input_key)
                .is_some_and(InputValue::is_literal);
            if !keep_literal {
                task.input_spec
                    .insert(input_key, InputValue::Reference(reference));
            }
        }
        Ok(())
    }

    pub fn hold_at_breakpoint(&mut self, id: TaskId) {
        if let Some(task) = self.graph.task_mut(id) {
            task.status = TaskStatus::BreakpointHold;
            info!(task = id, key = %task.key, "breakpoint reached; holding task");
        }
    }

    /// Clear a task's breakpoint flag; a held task becomes `Ready`.
    ///
    /// Returns whether a breakpoint was set.
    pub fn clear_breakpoint(&mut self, id: TaskId) -> Result<bool> {
        let task = self.graph.task_mut(id).ok_or(FlowError::TaskNotFound(id))?;
        if !task.breakpoint && task.status != TaskStatus::BreakpointHold {
            warn!(task = id, "no active breakpoint set on task");
            return Ok(false);
        }
        task.breakpoint = false;
        if task.status == TaskStatus::BreakpointHold {
            task.status = TaskStatus::Ready;
        }
        info!(task = id, key = %task.key, "breakpoint removed");
        Ok(true)
    }

    pub fn mark_running(&mut self, id: TaskId, now: DateTime<Utc>) {
        if let Some(task) = self.graph.task_mut(id) {
            task.status = TaskStatus::Running;
            task.attempts += 1;
            task.started_at.get_or_insert(now);
            task.finished_at = None;
        }
    }

    pub fn mark_completed(&mut self, id: TaskId, output: OutputHandle, now: DateTime<Utc>) {
        if let Some(task) = self.graph.task_mut(id) {
            task.status = TaskStatus::Completed;
            task.output = Some(output);
            task.finished_at = Some(now);
            info!(task = id, key = %task.key, attempts = task.attempts, "task completed");
        }
    }

    pub fn record_attempt_window(&mut self, id: TaskId, window: AttemptWindow) {
        if let Some(task) = self.graph.task_mut(id) {
            if task.attempts <= 1 {
                task.started_at = Some(window.started);
            }
            task.finished_at = Some(window.finished);
        }
    }

    /// Apply a failed attempt. With budget left (and retries allowed) one
    /// unit is spent and the task is `Ready` again; otherwise it is `Failed`
    /// and the budget is left as is.
    ///
    /// A budget of `N` therefore buys `N` retries, `N + 1` attempts in all.
    pub fn mark_failed(
        &mut self,
        id: TaskId,
        reason: &str,
        allow_retry: bool,
        now: DateTime<Utc>,
    ) -> FailureDisposition {
        let Some(task) = self.graph.task_mut(id) else {
            return FailureDisposition::Terminal;
        };
        task.finished_at = Some(now);

        if allow_retry && task.retry_budget > 0 {
            task.retry_budget -= 1;
            task.status = TaskStatus::Ready;
            warn!(
                task = id,
                key = %task.key,
                retry_budget = task.retry_budget,
                reason,
                "task failed; retrying"
            );
            FailureDisposition::Retry {
                remaining: task.retry_budget,
            }
        } else {
            task.status = TaskStatus::Failed;
            error!(task = id, key = %task.key, reason, "task failed");
            FailureDisposition::Terminal
        }
    }

    /// Force a task to terminal `Failed` without touching its budget (used
    /// for a Mapper whose child failed).
    pub fn mark_failed_terminal(&mut self, id: TaskId, now: DateTime<Utc>) {
        if let Some(task) = self.graph.task_mut(id) {
            task.status = TaskStatus::Failed;
            task.finished_at = Some(now);
            error!(task = id, key = %task.key, "task failed");
        }
    }

    /// Snap every non-terminal task to `Aborted`.
    pub fn abort_remaining(&mut self) -> Vec<TaskId> {
        let mut aborted = Vec::new();
        for task in self.graph.tasks_mut() {
            if !task.status.is_terminal() {
                task.status = TaskStatus::Aborted;
                aborted.push(task.id);
            }
        }
        if !aborted.is_empty() {
            info!(count = aborted.len(), ?aborted, "tasks aborted");
        }
        aborted
    }

    /// Reset tasks left `Running` (interrupted run) or `Aborted` (cancelled
    /// run) so they are evaluated again.
    pub fn recover_interrupted(&mut self) -> Vec<TaskId> {
        let mut reset = Vec::new();
        for task in self.graph.tasks_mut() {
            if matches!(task.status, TaskStatus::Running | TaskStatus::Aborted) {
                task.status = TaskStatus::Disabled;
                reset.push(task.id);
            }
        }
        if !reset.is_empty() {
            debug!(?reset, "reset interrupted tasks to Disabled");
        }
        reset
    }

    /// Held tasks whose breakpoint was cleared become `Ready`.
    pub fn release_cleared_breakpoints(&mut self) -> Vec<TaskId> {
        let mut released = Vec::new();
        for task in self.graph.tasks_mut() {
            if task.status == TaskStatus::BreakpointHold && !task.breakpoint {
                task.status = TaskStatus::Ready;
                released.push(task.id);
            }
        }
        released
    }

    /// Reset `from` and all of its transitive successors so they run again.
    pub fn reset_for_rerun(&mut self, from: TaskId) -> Vec<TaskId> {
        let mut targets = vec![from];
        targets.extend(self.graph.descendants(from));

        for &id in &targets {
            self.graph.remove_mapped_children(id);
            if let Some(task) = self.graph.task_mut(id) {
                task.status = TaskStatus::Disabled;
                task.output = None;
                task.retry_budget = task.retries;
                task.started_at = None;
                task.finished_at = None;
                task.attempts = 0;
            }
        }
        info!(from, reset = targets.len(), "reset sub-graph for rerun");
        targets
    }

    /// Merge workflow input into the Start task. If Start already ran, its
    /// recorded output is updated too.
    pub fn seed_start_input(&mut self, input: DataMap) -> Result<()> {
        let root = self.graph.root().ok_or(crate::errors::GraphError::MissingStart)?;
        let task = self.graph.task_mut(root).ok_or(FlowError::TaskNotFound(root))?;

        for (key, value) in input.iter() {
            task.input_spec
                .insert(key.clone(), InputValue::Literal(value.clone()));
        }
        if let Some(OutputHandle::Inline(output)) = task.output.as_mut() {
            output.extend(input);
        }
        Ok(())
    }
}

/// Read-only workflow status queries.
pub struct ReadOnlyStateManager<'a> {
    graph: &'a TaskGraph,
}

impl<'a> ReadOnlyStateManager<'a> {
    pub fn new(graph: &'a TaskGraph) -> Self {
        Self { graph }
    }

    /// Every task is `Completed`, or skipped because it (or an upstream
    /// task) is disabled.
    pub fn is_completed(&self) -> bool {
        let mut memo = HashMap::new();
        !self.graph.is_empty()
            && self
                .graph
                .tasks()
                .filter(|t| !t.is_mapped_child())
                .all(|t| t.status == TaskStatus::Completed || self.is_skipped(t.id, &mut memo))
    }

    pub fn has_failed(&self) -> bool {
        self.graph.tasks().any(|t| t.status == TaskStatus::Failed)
    }

    pub fn failed_task(&self) -> Option<TaskId> {
        self.graph
            .tasks()
            .find(|t| t.status == TaskStatus::Failed)
            .map(|t| t.id)
    }

    pub fn active_breakpoint(&self) -> Option<TaskId> {
        self.graph
            .tasks()
            .find(|t| t.status == TaskStatus::BreakpointHold)
            .map(|t| t.id)
    }

    pub fn active_tasks(&self) -> Vec<TaskId> {
        self.graph
            .tasks()
            .filter(|t| t.status == TaskStatus::Running)
            .map(|t| t.id)
            .collect()
    }

    pub fn was_cancelled(&self) -> bool {
        self.graph.tasks().any(|t| t.status == TaskStatus::Aborted)
    }

    /// A task is skipped if it is disabled or any of its predecessors is
    /// skipped (it can then never become ready).
    pub fn is_skipped(&self, id: TaskId, memo: &mut HashMap<TaskId, bool>) -> bool {
        if let Some(&known) = memo.get(&id) {
            return known;
        }
        let skipped = match self.graph.task(id) {
            None => false,
            Some(task) if !task.enabled => true,
            Some(task) => match task.parent {
                Some(parent) => self.is_skipped(parent, memo),
                None => self
                    .graph
                    .predecessors(id)
                    .into_iter()
                    .any(|p| self.is_skipped(p, memo)),
            },
        };
        memo.insert(id, skipped);
        skipped
    }

    pub fn starttime(&self) -> Option<DateTime<Utc>> {
        self.graph.tasks().filter_map(|t| t.started_at).min()
    }

    pub fn finishtime(&self) -> Option<DateTime<Utc>> {
        self.graph.tasks().filter_map(|t| t.finished_at).max()
    }

    /// Runtime of one task, or of the whole run (`min(started_at)` to
    /// `max(finished_at)`) when `id` is `None`.
    pub fn runtime(&self, id: Option<TaskId>) -> Option<Duration> {
        match id {
            Some(id) => self.graph.task(id)?.runtime(),
            None => {
                let start = self.starttime()?;
                let end = if self.active_tasks().is_empty() {
                    self.finishtime()?
                } else {
                    Utc::now()
                };
                (end - start).to_std().ok()
            }
        }
    }
}
