// src/dag/mod.rs

//! Task graph representation and scheduling.
//!
//! - [`task`] holds the task record and its lifecycle enums.
//! - [`graph`] holds the owned DAG of tasks and links.
//! - [`reference`] parses and resolves `$<id>.<key>` input references.
//! - [`combine`] shapes fan-in (Collect) and fan-out (Mapper) data.
//! - [`state_manager`] applies lifecycle transitions.
//! - [`scheduler`] contains the pure state machine that decides which tasks
//!   run next.
//! - [`scheduler_step`] defines the result type for scheduler steps.

pub mod combine;
pub mod graph;
pub mod reference;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;
pub mod task;

pub use graph::{Link, TaskGraph};
pub use reference::{InputValue, Reference, resolve_input};
pub use scheduler::{Scheduler, SchedulerOptions};
pub use scheduler_step::{ScheduledTask, SchedulerStep};
pub use state_manager::{FailureDisposition, ReadOnlyStateManager, StateManager};
pub use task::{DataMap, NewTask, OutputHandle, TaskId, TaskKind, TaskRecord, TaskStatus};
