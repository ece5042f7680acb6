// src/engine/runtime.rs

use std::collections::VecDeque;
use std::fmt;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::dag::{TaskGraph, TaskId};
use crate::errors::Result;
use crate::exec::Dispatcher;

use super::core::CoreRuntime;
use super::{ControlCommand, CoreCommand, RunSummary, RuntimeEvent};

/// Drives the scheduler core in response to `RuntimeEvent`s and delegates
/// task execution to a [`Dispatcher`].
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// runtime semantics. This struct handles async IO: reading completion and
/// control channels, dispatching tasks, and publishing graph snapshots.
pub struct Runtime {
    core: CoreRuntime,
    events_rx: mpsc::UnboundedReceiver<RuntimeEvent>,
    control_rx: mpsc::Receiver<ControlCommand>,
    dispatcher: Dispatcher,
    snapshot_tx: watch::Sender<TaskGraph>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    pub fn new(
        core: CoreRuntime,
        events_rx: mpsc::UnboundedReceiver<RuntimeEvent>,
        control_rx: mpsc::Receiver<ControlCommand>,
        dispatcher: Dispatcher,
        snapshot_tx: watch::Sender<TaskGraph>,
    ) -> Self {
        Self {
            core,
            events_rx,
            control_rx,
            dispatcher,
            snapshot_tx,
        }
    }

    /// Run until nothing is in flight, then hand the graph back.
    ///
    /// The graph is returned even when the run stops on an error, so the
    /// caller never loses task state.
    pub async fn run(mut self, from: Option<TaskId>) -> (TaskGraph, Result<RunSummary>) {
        let result = self.drive(from).await;
        self.publish();

        let summary = result.map(|()| self.core.summary());
        if let Ok(summary) = &summary {
            info!(
                completed = summary.is_completed,
                failed = summary.has_failed,
                breakpoint = ?summary.active_breakpoint,
                cancelled = summary.cancelled,
                "runtime exiting"
            );
        }
        (self.core.into_graph(), summary)
    }

    /// Main event loop.
    ///
    /// - Seeds the core with `Begin`.
    /// - Feeds completion and control events into the core.
    /// - Executes the commands it returns. Outcomes of blocking dispatches
    ///   are queued locally and handled before any channel is read.
    async fn drive(&mut self, from: Option<TaskId>) -> Result<()> {
        info!(?from, "flowdag runtime started");

        let mut pending: VecDeque<RuntimeEvent> = VecDeque::new();
        pending.push_back(RuntimeEvent::Begin { from });
        let mut control_open = true;

        loop {
            let event = match pending.pop_front() {
                Some(event) => event,
                // Control commands win over completions that arrive together.
                None => tokio::select! {
                    biased;
                    cmd = self.control_rx.recv(), if control_open => match cmd {
                        Some(cmd) => RuntimeEvent::Control(cmd),
                        None => {
                            debug!("control channel closed");
                            control_open = false;
                            continue;
                        }
                    },
                    maybe = self.events_rx.recv() => match maybe {
                        Some(event) => event,
                        None => {
                            info!("completion channel closed; exiting");
                            break;
                        }
                    },
                },
            };

            debug!(?event, "runtime received event");

            let step = self.core.step(event)?;
            self.publish();

            for command in step.commands {
                match command {
                    CoreCommand::DispatchTasks(tasks) => {
                        let ids: Vec<_> = tasks.iter().map(|t| t.id).collect();
                        debug!(?ids, "dispatching ready tasks");
                        for task in tasks {
                            if let Some(outcome) = self.dispatcher.dispatch(task).await {
                                pending.push_back(outcome);
                            }
                        }
                    }
                    CoreCommand::RequestExit => {
                        debug!("core reports nothing in flight");
                    }
                }
            }

            if !step.keep_running && pending.is_empty() {
                break;
            }
        }

        Ok(())
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.core.graph().clone());
    }
}
