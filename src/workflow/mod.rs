// src/workflow/mod.rs

//! Persisted workflows.
//!
//! - [`document`] is the serde model of the JSON file.
//! - [`store`] converts between documents and live [`Workflow`]s and does
//!   the file IO.
//! - [`output_store`] handles task workdirs and disk-backed output.

pub mod document;
pub mod output_store;
pub mod store;

pub use document::{EdgeDocument, NodeDocument, WorkflowDocument};
pub use store::{Workflow, WorkflowMetadata};
