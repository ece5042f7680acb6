// src/engine/controller.rs

//! User-facing façade over a workflow and its runs.
//!
//! While a run is active the scheduler owns the task graph; the controller
//! only holds a command channel into the run loop and a `watch` receiver
//! with the latest graph snapshot. Queries read that snapshot. Mutating
//! calls (`cancel`, `step_breakpoint`, `input`) are queued into the loop.
//! When no run is active they apply to the controller's own workflow.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::ConfigFile;
use crate::dag::{
    DataMap, ReadOnlyStateManager, Scheduler, SchedulerOptions, StateManager, TaskGraph, TaskId,
    TaskRecord, TaskStatus,
};
use crate::errors::{FlowError, Result};
use crate::exec::{Dispatcher, FunctionRegistry, TaskExecutor};
use crate::workflow::Workflow;

use super::core::CoreRuntime;
use super::runtime::Runtime;
use super::{ControlCommand, RunSummary};

const CONTROL_QUEUE: usize = 32;

struct ActiveRun {
    handle: JoinHandle<(TaskGraph, Result<RunSummary>)>,
    control_tx: mpsc::Sender<ControlCommand>,
    snapshot: watch::Receiver<TaskGraph>,
}

/// Cloneable sender into an active run loop, e.g. for a signal handler.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    control_tx: mpsc::Sender<ControlCommand>,
}

impl ControlHandle {
    /// Returns `false` if the run loop has already exited.
    pub async fn send(&self, command: ControlCommand) -> bool {
        self.control_tx.send(command).await.is_ok()
    }

    pub async fn cancel(&self) -> bool {
        self.send(ControlCommand::Cancel).await
    }
}

pub struct WorkflowController {
    workflow: Workflow,
    executor: Arc<dyn TaskExecutor>,
    registry: Arc<FunctionRegistry>,
    config: ConfigFile,
    active: Option<ActiveRun>,
    last_summary: Option<RunSummary>,
}

impl std::fmt::Debug for WorkflowController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowController")
            .field("title", &self.workflow.metadata.title)
            .field("running", &self.active.is_some())
            .field("last_summary", &self.last_summary)
            .finish_non_exhaustive()
    }
}

impl WorkflowController {
    /// Wrap a workflow. The graph must be structurally valid.
    pub fn new(workflow: Workflow, executor: Arc<dyn TaskExecutor>) -> Result<Self> {
        workflow.graph.validate()?;
        Ok(Self {
            workflow,
            executor,
            registry: Arc::new(FunctionRegistry::new()),
            config: ConfigFile::default(),
            active: None,
            last_summary: None,
        })
    }

    /// Use `registry` for `custom_func` tasks. Every function the graph names
    /// must be registered.
    pub fn with_registry(mut self, registry: FunctionRegistry) -> Result<Self> {
        registry.check_graph(&self.workflow.graph)?;
        self.registry = Arc::new(registry);
        Ok(self)
    }

    pub fn with_config(mut self, config: ConfigFile) -> Self {
        self.config = config;
        self
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    /// Mutable access to the workflow between runs.
    pub fn workflow_mut(&mut self) -> Result<&mut Workflow> {
        if self.active.is_some() {
            return Err(FlowError::AlreadyRunning);
        }
        Ok(&mut self.workflow)
    }

    pub fn into_workflow(self) -> Workflow {
        self.workflow
    }

    fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            project_dir: self
                .config
                .project
                .directory
                .clone()
                .or_else(|| self.workflow.metadata.project_dir.clone()),
            resume_policy: self.config.resume_policy(),
        }
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Start (or resume, from task `from`) a run in the background.
    ///
    /// Must be called from within a Tokio runtime. Structural problems are
    /// reported here; the outcome of the run is reported by [`Self::wait`].
    pub fn run(&mut self, from: Option<TaskId>) -> Result<()> {
        if self.active.is_some() {
            return Err(FlowError::AlreadyRunning);
        }
        self.registry.check_graph(&self.workflow.graph)?;

        let options = self.scheduler_options();
        let graph = std::mem::take(&mut self.workflow.graph);
        let scheduler = Scheduler::new(graph, options);
        if let Err(e) = scheduler.preflight(from) {
            self.workflow.graph = scheduler.into_graph();
            return Err(e);
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE);
        let (snapshot_tx, snapshot) = watch::channel(scheduler.graph().clone());

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.executor),
            Arc::clone(&self.registry),
            self.config.runtime.max_workers,
            self.config.task_timeout(),
            events_tx,
        );
        let runtime = Runtime::new(
            CoreRuntime::new(scheduler),
            events_rx,
            control_rx,
            dispatcher,
            snapshot_tx,
        );

        info!(title = %self.workflow.metadata.title, ?from, "starting workflow run");
        let handle = tokio::spawn(runtime.run(from));
        self.active = Some(ActiveRun {
            handle,
            control_tx,
            snapshot,
        });
        self.last_summary = None;
        Ok(())
    }

    /// Handle for queueing control commands into the active run.
    pub fn control_handle(&self) -> Option<ControlHandle> {
        self.active.as_ref().map(|active| ControlHandle {
            control_tx: active.control_tx.clone(),
        })
    }

    /// Wait for the active run to quiesce and take the graph back.
    pub async fn wait(&mut self) -> Result<RunSummary> {
        let active = self.active.take().ok_or(FlowError::NotRunning)?;
        let (graph, result) = match active.handle.await {
            Ok(done) => done,
            Err(e) => {
                // The graph went down with the run task; keep the last
                // snapshot so nothing already recorded is lost.
                self.workflow.graph = active.snapshot.borrow().clone();
                return Err(FlowError::Other(anyhow!("workflow run task failed: {e}")));
            }
        };
        self.workflow.graph = graph;
        let summary = result?;
        self.last_summary = Some(summary.clone());
        Ok(summary)
    }

    /// `run(from)` followed by `wait()`.
    pub async fn run_to_completion(&mut self, from: Option<TaskId>) -> Result<RunSummary> {
        self.run(from)?;
        self.wait().await
    }

    // ---------------------------------------------------------------------
    // Control
    // ---------------------------------------------------------------------

    /// Request cooperative cancellation.
    ///
    /// In-flight dispatches finish; nothing new is dispatched, and once the
    /// loop settles every non-terminal task is `Aborted`. On an idle
    /// workflow the non-terminal tasks are aborted immediately.
    pub async fn cancel(&mut self) -> Result<()> {
        self.control(ControlCommand::Cancel).await
    }

    /// Clear the breakpoint on task `id`. Does not resume the run by itself.
    ///
    /// Unknown ids are rejected here, before anything is queued into a
    /// live run.
    pub async fn step_breakpoint(&mut self, id: TaskId) -> Result<()> {
        if !self.with_graph(|g| g.contains(id)) {
            return Err(FlowError::TaskNotFound(id));
        }
        self.control(ControlCommand::StepBreakpoint(id)).await
    }

    /// Seed the Start task with workflow input.
    pub async fn input(&mut self, input: DataMap) -> Result<()> {
        self.control(ControlCommand::Input(input)).await
    }

    /// Queue `command` into the run loop, or apply it directly when no run
    /// is active. A loop that already exited is joined first.
    async fn control(&mut self, command: ControlCommand) -> Result<()> {
        let finished = self
            .active
            .as_ref()
            .is_some_and(|active| active.handle.is_finished());
        if finished {
            self.wait().await?;
        }

        let Some(active) = self.active.as_ref() else {
            return self.apply_idle(command);
        };
        let sent = active.control_tx.send(command).await;
        match sent {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendError(command)) => {
                debug!("run loop exited; applying control command to the settled workflow");
                self.wait().await?;
                self.apply_idle(command)
            }
        }
    }

    fn apply_idle(&mut self, command: ControlCommand) -> Result<()> {
        let mut manager = StateManager::new(&mut self.workflow.graph);
        match command {
            ControlCommand::Cancel => {
                manager.abort_remaining();
                Ok(())
            }
            ControlCommand::StepBreakpoint(id) => manager.clear_breakpoint(id).map(|_| ()),
            ControlCommand::Input(input) => manager.seed_start_input(input),
        }
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    fn with_graph<R>(&self, f: impl FnOnce(&TaskGraph) -> R) -> R {
        match self.active.as_ref() {
            Some(active) => f(&active.snapshot.borrow()),
            None => f(&self.workflow.graph),
        }
    }

    /// A run is active and has not finished.
    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.handle.is_finished())
    }

    pub fn is_completed(&self) -> bool {
        self.with_graph(|g| ReadOnlyStateManager::new(g).is_completed())
    }

    pub fn has_failed(&self) -> bool {
        self.with_graph(|g| ReadOnlyStateManager::new(g).has_failed())
    }

    pub fn failed_task(&self) -> Option<TaskId> {
        self.with_graph(|g| ReadOnlyStateManager::new(g).failed_task())
    }

    pub fn active_breakpoint(&self) -> Option<TaskId> {
        self.with_graph(|g| ReadOnlyStateManager::new(g).active_breakpoint())
    }

    pub fn active_tasks(&self) -> Vec<TaskId> {
        self.with_graph(|g| ReadOnlyStateManager::new(g).active_tasks())
    }

    pub fn starttime(&self) -> Option<DateTime<Utc>> {
        self.with_graph(|g| ReadOnlyStateManager::new(g).starttime())
    }

    pub fn finishtime(&self) -> Option<DateTime<Utc>> {
        self.with_graph(|g| ReadOnlyStateManager::new(g).finishtime())
    }

    /// Wall-clock runtime of task `id`, or of the whole run.
    pub fn runtime(&self, id: Option<TaskId>) -> Option<Duration> {
        self.with_graph(|g| ReadOnlyStateManager::new(g).runtime(id))
    }

    /// Output of every completed leaf task, keyed by task id.
    pub fn output(&self) -> Result<BTreeMap<TaskId, DataMap>> {
        self.with_graph(|g| {
            let mut outputs = BTreeMap::new();
            for id in g.leaves() {
                let Some(task) = g.task(id) else { continue };
                if task.status != TaskStatus::Completed {
                    continue;
                }
                if let Some(output) = task.output_data()? {
                    outputs.insert(id, output);
                }
            }
            Ok(outputs)
        })
    }

    /// Output of task `id`; `None` until it has completed.
    pub fn output_of(&self, id: TaskId) -> Result<Option<DataMap>> {
        self.with_graph(|g| {
            let task = g.task(id).ok_or(FlowError::TaskNotFound(id))?;
            if task.status != TaskStatus::Completed {
                return Ok(None);
            }
            task.output_data()
        })
    }

    pub fn get_task(&self, id: TaskId) -> Option<TaskRecord> {
        self.with_graph(|g| g.task(id).cloned())
    }

    pub fn task_by_key(&self, key: &str) -> Option<TaskRecord> {
        self.with_graph(|g| g.task_by_key(key).cloned())
    }

    /// Summary of the most recent finished run.
    pub fn last_run(&self) -> Option<&RunSummary> {
        self.last_summary.as_ref()
    }

    /// One line per task: key, id, successors, status, runtime and output.
    pub fn summary(&self) -> String {
        self.with_graph(|g| {
            let mut out = String::new();
            for task in g.tasks() {
                let successors = g.successors(task.id);
                let runtime = task
                    .runtime()
                    .map(|d| format!("{:.3}s", d.as_secs_f64()))
                    .unwrap_or_else(|| "-".to_string());
                let output = match task.output_data() {
                    Ok(Some(map)) => serde_json::Value::Object(map).to_string(),
                    Ok(None) => "-".to_string(),
                    Err(e) => format!("<unreadable: {e}>"),
                };
                let _ = writeln!(
                    out,
                    "{} ({}) -> {:?} [{:?}] runtime={} output={}",
                    task.key, task.id, successors, task.status, runtime, output
                );
            }
            out
        })
    }
}
