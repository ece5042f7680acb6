use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::dag::combine::{collect_outputs, gather_mapped_outputs, split_mapper_input};
use crate::dag::graph::TaskGraph;
use crate::dag::reference::resolve_input;
use crate::dag::scheduler_step::{ScheduledTask, SchedulerStep};
use crate::dag::state_manager::{FailureDisposition, ReadOnlyStateManager, StateManager};
use crate::dag::task::{DataMap, OutputHandle, TaskId, TaskKind, TaskStatus};
use crate::engine::{AttemptWindow, FailureKind, RunSummary, TaskOutcome};
use crate::errors::{FlowError, Result};
use crate::types::ResumePolicy;
use crate::workflow::output_store::task_workdir;

/// Settings the scheduler needs from configuration.
#[derive(Debug, Clone, Default)]
pub struct SchedulerOptions {
    /// Base directory for task workdirs (`<dir>/task-<id>`).
    pub project_dir: Option<PathBuf>,
    pub resume_policy: ResumePolicy,
}

/// Scheduler owns the task graph for the duration of a run.
///
/// It is responsible for:
/// - computing which tasks are ready (all predecessors `Completed`)
/// - resolving their input and handing them out as [`ScheduledTask`]s
/// - completing Start / Collect tasks and expanding Mappers in-pass
/// - applying outcomes: completion, retry, terminal failure
/// - breakpoints and cooperative cancellation
///
/// It performs no async work; the runtime feeds it events and executes the
/// dispatches it returns.
#[derive(Debug)]
pub struct Scheduler {
    graph: TaskGraph,
    options: SchedulerOptions,
    /// Monotonically increasing logical clock; one tick per dispatch.
    clock: u64,
    /// Dispatches awaiting an outcome: task -> dispatch sequence number.
    in_flight: HashMap<TaskId, u64>,
    cancel_requested: bool,
}

impl Scheduler {
    pub fn new(graph: TaskGraph, options: SchedulerOptions) -> Self {
        Self {
            graph,
            options,
            clock: 0,
            in_flight: HashMap::new(),
            cancel_requested: false,
        }
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn into_graph(self) -> TaskGraph {
        self.graph
    }

    /// Number of dispatches awaiting an outcome.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn status_of(&self, id: TaskId) -> Option<TaskStatus> {
        self.graph.task(id).map(|t| t.status)
    }

    pub fn summary(&self) -> RunSummary {
        let ro = ReadOnlyStateManager::new(&self.graph);
        RunSummary {
            is_completed: ro.is_completed(),
            has_failed: ro.has_failed(),
            failed_task: ro.failed_task(),
            active_breakpoint: ro.active_breakpoint(),
            cancelled: ro.was_cancelled(),
        }
    }

    /// Start or resume a run, optionally from task `from`.
    ///
    /// Interrupted (`Running`) and cancelled (`Aborted`) tasks are reset
    /// first. Under [`ResumePolicy::Continue`] every other status is kept
    /// and cleared breakpoints are released; under [`ResumePolicy::Rerun`]
    /// `from` and its successors are reset to run again.
    pub fn begin(&mut self, from: Option<TaskId>) -> Result<SchedulerStep> {
        self.preflight(from)?;

        self.cancel_requested = false;
        self.in_flight.clear();

        let mut manager = StateManager::new(&mut self.graph);
        manager.recover_interrupted();
        match (self.options.resume_policy, from) {
            (ResumePolicy::Rerun, Some(id)) => {
                manager.reset_for_rerun(id);
            }
            _ => {
                let released = manager.release_cleared_breakpoints();
                if !released.is_empty() {
                    debug!(?released, "released cleared breakpoints");
                }
            }
        }

        info!(
            from = ?from,
            policy = ?self.options.resume_policy,
            tasks = self.graph.len(),
            "scheduler: starting run"
        );

        let mut step = SchedulerStep::default();
        self.schedule_pass(&mut step)?;
        Ok(self.finish_step(step))
    }

    /// Apply the outcome of a dispatch and schedule whatever became ready.
    pub fn handle_completion(
        &mut self,
        id: TaskId,
        seq: u64,
        outcome: TaskOutcome,
    ) -> Result<SchedulerStep> {
        self.handle_timed_completion(id, seq, outcome, None)
    }

    /// Like [`Scheduler::handle_completion`], but with the window the attempt
    /// actually ran in. It replaces the dispatch-time `started_at` (first
    /// attempt only) and the `finished_at` stamped when the outcome arrived.
    pub fn handle_timed_completion(
        &mut self,
        id: TaskId,
        seq: u64,
        outcome: TaskOutcome,
        window: Option<AttemptWindow>,
    ) -> Result<SchedulerStep> {
        let mut step = SchedulerStep::default();

        match self.in_flight.get(&id) {
            Some(&expected) if expected == seq => {
                self.in_flight.remove(&id);
            }
            _ => {
                warn!(task = id, seq, "completion for unknown or stale dispatch; ignoring");
                return Ok(self.finish_step(step));
            }
        }

        match outcome {
            TaskOutcome::Success(output) => self.complete(id, output, &mut step)?,
            TaskOutcome::Failed { kind, reason } => {
                if kind == FailureKind::Transport {
                    error!(task = id, transport = true, reason = %reason, "executor unreachable");
                }
                self.fail(id, kind, &reason, &mut step);
            }
        }
        if let Some(window) = window {
            StateManager::new(&mut self.graph).record_attempt_window(id, window);
        }

        self.schedule_pass(&mut step)?;
        Ok(self.finish_step(step))
    }

    /// Stop dispatching. Once nothing is in flight every non-terminal task
    /// is snapped to `Aborted`.
    pub fn request_cancel(&mut self) -> SchedulerStep {
        if !self.cancel_requested {
            info!(in_flight = self.in_flight.len(), "cancellation requested");
        }
        self.cancel_requested = true;
        self.finish_step(SchedulerStep::default())
    }

    /// Clear a breakpoint. This does not dispatch the task; it is picked up
    /// by the next scheduling pass or the next `begin`.
    pub fn step_breakpoint(&mut self, id: TaskId) -> Result<SchedulerStep> {
        StateManager::new(&mut self.graph).clear_breakpoint(id)?;
        Ok(self.finish_step(SchedulerStep::default()))
    }

    /// Merge workflow input into the Start task.
    pub fn seed_input(&mut self, input: DataMap) -> Result<SchedulerStep> {
        StateManager::new(&mut self.graph).seed_start_input(input)?;
        Ok(self.finish_step(SchedulerStep::default()))
    }

    /// Checks performed by [`Scheduler::begin`] before any state changes:
    /// `from` exists, the graph is structurally valid, and tasks that store
    /// output on disk have a project directory to write to.
    pub fn preflight(&self, from: Option<TaskId>) -> Result<()> {
        if let Some(id) = from {
            if !self.graph.contains(id) {
                return Err(FlowError::TaskNotFound(id));
            }
        }
        self.graph.validate()?;
        self.check_workdir_requirements()
    }

    fn check_workdir_requirements(&self) -> Result<()> {
        if self.options.project_dir.is_some() {
            return Ok(());
        }
        match self.graph.tasks().find(|t| t.store_output) {
            Some(task) => Err(FlowError::ConfigError(format!(
                "task {} ({}) stores output on disk but no project directory is set",
                task.id, task.key
            ))),
            None => Ok(()),
        }
    }

    /// Promote and advance ready tasks until nothing changes.
    fn schedule_pass(&mut self, step: &mut SchedulerStep) -> Result<()> {
        loop {
            if self.cancel_requested {
                return Ok(());
            }

            StateManager::new(&mut self.graph).promote_ready()?;

            let candidates: Vec<TaskId> = self
                .graph
                .tasks()
                .filter(|t| t.status == TaskStatus::Ready && !self.in_flight.contains_key(&t.id))
                .map(|t| t.id)
                .collect();

            if candidates.is_empty() {
                return Ok(());
            }

            for id in candidates {
                self.advance(id, step)?;
            }
        }
    }

    /// Move one `Ready` task forward.
    fn advance(&mut self, id: TaskId, step: &mut SchedulerStep) -> Result<()> {
        let task = self.graph.task(id).ok_or(FlowError::TaskNotFound(id))?;
        let kind = task.kind;
        let has_custom_func = task.custom_func.is_some();

        if task.breakpoint {
            StateManager::new(&mut self.graph).hold_at_breakpoint(id);
            step.held.push(id);
            return Ok(());
        }

        match kind {
            TaskKind::Start => {
                let input = resolve_input(&self.graph, id)?;
                StateManager::new(&mut self.graph).mark_running(id, Utc::now());
                self.complete(id, OutputHandle::Inline(input), step)?;
            }
            TaskKind::Collect => {
                let merged = self.collect_predecessor_outputs(id)?;
                if has_custom_func {
                    self.dispatch(id, merged, step);
                } else {
                    StateManager::new(&mut self.graph).mark_running(id, Utc::now());
                    self.complete(id, OutputHandle::Inline(merged), step)?;
                }
            }
            TaskKind::Mapper => self.expand_mapper(id, step)?,
            TaskKind::Task | TaskKind::BlockingTask | TaskKind::Custom => {
                let input = resolve_input(&self.graph, id)?;
                self.dispatch(id, input, step);
            }
        }
        Ok(())
    }

    fn collect_predecessor_outputs(&self, id: TaskId) -> Result<DataMap> {
        let mut outputs = Vec::new();
        for pred in self.graph.predecessors(id) {
            let output = self
                .graph
                .task(pred)
                .map(|t| t.output_data())
                .transpose()?
                .flatten()
                .ok_or(FlowError::UnresolvedReference {
                    consumer: id,
                    task: pred,
                    key: "*".to_string(),
                })?;
            outputs.push(output);
        }
        Ok(collect_outputs(outputs))
    }

    /// Fan a Mapper out into one synthetic child per sequence item.
    fn expand_mapper(&mut self, id: TaskId, step: &mut SchedulerStep) -> Result<()> {
        let input = resolve_input(&self.graph, id)?;
        let mapper_arg = self
            .graph
            .task(id)
            .map(|t| t.mapper_arg().to_string())
            .unwrap_or_default();

        StateManager::new(&mut self.graph).mark_running(id, Utc::now());

        let inputs = match split_mapper_input(&input, &mapper_arg) {
            Ok(inputs) => inputs,
            Err(reason) => {
                self.fail(id, FailureKind::Task, &reason, step);
                return Ok(());
            }
        };

        self.graph.remove_mapped_children(id);
        let mut children = Vec::with_capacity(inputs.len());
        for (index, child_input) in inputs.into_iter().enumerate() {
            let child = self.graph.add_mapped_child(id, index, child_input)?;
            if let Some(task) = self.graph.task_mut(child) {
                task.status = TaskStatus::Ready;
            }
            children.push(child);
        }
        info!(task = id, children = children.len(), "mapper expanded");
        Ok(())
    }

    fn dispatch(&mut self, id: TaskId, input: DataMap, step: &mut SchedulerStep) {
        self.clock += 1;
        let seq = self.clock;

        let workdir = match (self.graph.task(id), self.options.project_dir.as_ref()) {
            (Some(task), Some(dir)) if task.store_output => Some(task_workdir(dir, id)),
            _ => None,
        };

        StateManager::new(&mut self.graph).mark_running(id, Utc::now());

        let Some(task) = self.graph.task_mut(id) else {
            return;
        };
        if workdir.is_some() {
            task.workdir = workdir.clone();
        }

        info!(
            task = id,
            key = %task.key,
            kind = ?task.kind,
            attempt = task.attempts,
            seq,
            "dispatching task"
        );

        step.newly_scheduled.push(ScheduledTask {
            id,
            key: task.key.clone(),
            kind: task.kind,
            input,
            configuration: task.configuration.clone(),
            custom_func: task.custom_func.clone(),
            workdir,
            store_output: task.store_output,
            attempt: task.attempts,
            seq,
        });
        self.in_flight.insert(id, seq);
    }

    fn complete(&mut self, id: TaskId, output: OutputHandle, step: &mut SchedulerStep) -> Result<()> {
        StateManager::new(&mut self.graph).mark_completed(id, output, Utc::now());
        step.newly_completed.push(id);

        if let Some(parent) = self.graph.task(id).and_then(|t| t.parent) {
            self.settle_mapper(parent, step)?;
        }
        Ok(())
    }

    fn fail(&mut self, id: TaskId, kind: FailureKind, reason: &str, step: &mut SchedulerStep) {
        let allow_retry = !self.cancel_requested;
        let disposition =
            StateManager::new(&mut self.graph).mark_failed(id, reason, allow_retry, Utc::now());

        match disposition {
            FailureDisposition::Retry { remaining } => {
                debug!(task = id, %kind, remaining, "attempt failed; task re-queued");
                step.retried.push(id);
            }
            FailureDisposition::Terminal => {
                step.newly_failed.push(id);
                if let Some(parent) = self.graph.task(id).and_then(|t| t.parent) {
                    StateManager::new(&mut self.graph).mark_failed_terminal(parent, Utc::now());
                    step.newly_failed.push(parent);
                }
            }
        }
    }

    /// Complete a Mapper once all of its children completed.
    fn settle_mapper(&mut self, parent: TaskId, step: &mut SchedulerStep) -> Result<()> {
        let children = self.graph.mapped_children(parent);
        let all_done = children.iter().all(|c| {
            self.graph
                .task(*c)
                .is_some_and(|t| t.status == TaskStatus::Completed)
        });
        if !all_done {
            return Ok(());
        }

        let mut outputs = Vec::with_capacity(children.len());
        for child in children {
            let output = self
                .graph
                .task(child)
                .map(|t| t.output_data())
                .transpose()?
                .flatten()
                .unwrap_or_default();
            outputs.push(output);
        }
        let gathered = gather_mapped_outputs(&outputs);
        StateManager::new(&mut self.graph).mark_completed(parent, OutputHandle::Inline(gathered), Utc::now());
        step.newly_completed.push(parent);
        Ok(())
    }

    fn finish_step(&mut self, mut step: SchedulerStep) -> SchedulerStep {
        if self.cancel_requested && self.in_flight.is_empty() {
            step.aborted = StateManager::new(&mut self.graph).abort_remaining();
        }
        step.quiescent = self.in_flight.is_empty();
        if step.quiescent {
            debug!("scheduler: no dispatch in flight; run is quiescent");
        }
        step
    }
}
