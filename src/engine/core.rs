// src/engine/core.rs

//! Synchronous step function behind the run loop.
//!
//! [`CoreRuntime::step`] takes one [`RuntimeEvent`] (a task outcome or a
//! control command), applies it to the scheduler and answers with the
//! tasks to dispatch next and whether the loop should stay alive. The
//! async side in `engine::runtime` owns the channels, the dispatcher and
//! the snapshot publishing, so everything here can be driven from plain
//! `#[test]` functions.

use tracing::warn;

use crate::dag::{ScheduledTask, Scheduler, SchedulerStep, TaskGraph};
use crate::engine::{ControlCommand, RunSummary, RuntimeEvent};
use crate::errors::Result;

/// Instruction for the async run loop.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Hand these tasks to the dispatcher.
    DispatchTasks(Vec<ScheduledTask>),
    /// Nothing is in flight any more; the run loop can stop.
    RequestExit,
}

/// Result of feeding one event to [`CoreRuntime::step`].
#[derive(Debug, Clone)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
    /// `false` once the workflow is quiescent.
    pub keep_running: bool,
}

impl From<SchedulerStep> for CoreStep {
    fn from(step: SchedulerStep) -> Self {
        let mut commands = Vec::new();
        if !step.newly_scheduled.is_empty() {
            commands.push(CoreCommand::DispatchTasks(step.newly_scheduled));
        }
        if step.quiescent {
            commands.push(CoreCommand::RequestExit);
        }
        CoreStep {
            commands,
            keep_running: !step.quiescent,
        }
    }
}

/// Owns the scheduler, and through it the task graph, for the duration of
/// one run.
#[derive(Debug)]
pub struct CoreRuntime {
    scheduler: Scheduler,
}

impl CoreRuntime {
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }

    pub fn graph(&self) -> &TaskGraph {
        self.scheduler.graph()
    }

    pub fn into_graph(self) -> TaskGraph {
        self.scheduler.into_graph()
    }

    pub fn summary(&self) -> RunSummary {
        self.scheduler.summary()
    }

    /// Apply one outcome or control command to the graph.
    pub fn step(&mut self, event: RuntimeEvent) -> Result<CoreStep> {
        let step = match event {
            RuntimeEvent::Begin { from } => self.scheduler.begin(from)?,
            RuntimeEvent::TaskCompleted {
                task,
                seq,
                outcome,
                window,
            } => self
                .scheduler
                .handle_timed_completion(task, seq, outcome, window)?,
            RuntimeEvent::Control(ControlCommand::Cancel) => self.scheduler.request_cancel(),
            RuntimeEvent::Control(ControlCommand::StepBreakpoint(task))
                if !self.scheduler.graph().contains(task) =>
            {
                // A mistyped id must not take down a live run.
                warn!(task, "step_breakpoint for unknown task; ignoring");
                return Ok(self.unchanged());
            }
            RuntimeEvent::Control(ControlCommand::StepBreakpoint(task)) => {
                self.scheduler.step_breakpoint(task)?
            }
            RuntimeEvent::Control(ControlCommand::Input(input)) => {
                self.scheduler.seed_input(input)?
            }
        };
        Ok(step.into())
    }

    /// Step for an event that left the graph untouched.
    fn unchanged(&self) -> CoreStep {
        let keep_running = self.scheduler.in_flight() > 0;
        let commands = if keep_running {
            Vec::new()
        } else {
            vec![CoreCommand::RequestExit]
        };
        CoreStep {
            commands,
            keep_running,
        }
    }
}
