// src/exec/mod.rs

//! Task execution layer.
//!
//! - [`backend`] defines the [`TaskExecutor`] contract the scheduler's
//!   dispatches are sent to.
//! - [`registry`] holds in-process functions addressed by dotted path.
//! - [`dispatcher`] applies the blocking / concurrent disciplines, the
//!   per-dispatch timeout and disk-backed output.
//! - [`command`] is the process-backed executor used by the binary.

pub mod backend;
pub mod command;
pub mod dispatcher;
pub mod registry;

pub use backend::{ExecutorError, Outcome, TaskExecutor, TaskRequest};
pub use command::CommandExecutor;
pub use dispatcher::Dispatcher;
pub use registry::{FunctionRegistry, TaskFunction};
