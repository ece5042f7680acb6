// src/workflow/document.rs

//! Serde model of the persisted workflow JSON.
//!
//! ```json
//! {
//!   "title": "docking",
//!   "description": "",
//!   "project_dir": "/data/run1",
//!   "created_at": "2024-05-01T10:00:00Z",
//!   "root": 1,
//!   "nodes": [{ "id": 1, "key": "start", "kind": "Start", ... }],
//!   "edges": [[1, 2, {"mol2": "ligand"}], [2, 3, null]]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dag::{DataMap, InputValue, OutputHandle, TaskId, TaskKind, TaskRecord, TaskStatus};
use crate::errors::GraphError;

/// `[from, to, data_mapping]`.
pub type EdgeDocument = (TaskId, TaskId, Option<BTreeMap<String, String>>);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDocument {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub project_dir: Option<PathBuf>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub root: Option<TaskId>,
    #[serde(default)]
    pub nodes: Vec<NodeDocument>,
    #[serde(default)]
    pub edges: Vec<EdgeDocument>,
}

/// One persisted task. Fields that are absent fall back to the defaults a
/// freshly added task would get.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDocument {
    pub id: TaskId,
    pub key: String,
    pub kind: TaskKind,
    #[serde(default)]
    pub configuration: DataMap,
    /// Input spec in its string form: references are `"$<id>.<key>"`.
    #[serde(default)]
    pub input: DataMap,
    #[serde(default)]
    pub output: Option<OutputHandle>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default)]
    pub retry_budget: Option<u32>,
    #[serde(default)]
    pub breakpoint: bool,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub replace_input: bool,
    #[serde(default)]
    pub store_output: bool,
    #[serde(default)]
    pub custom_func: Option<String>,
    #[serde(default)]
    pub parent: Option<TaskId>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub workdir: Option<PathBuf>,
    #[serde(default)]
    pub attempts: u32,
}

fn enabled_by_default() -> bool {
    true
}

impl From<&TaskRecord> for NodeDocument {
    fn from(task: &TaskRecord) -> Self {
        Self {
            id: task.id,
            key: task.key.clone(),
            kind: task.kind,
            configuration: task.configuration.clone(),
            input: task
                .input_spec
                .iter()
                .map(|(k, v)| (k.clone(), v.to_value()))
                .collect(),
            output: task.output.clone(),
            status: task.status,
            retries: Some(task.retries),
            retry_budget: Some(task.retry_budget),
            breakpoint: task.breakpoint,
            enabled: task.enabled,
            replace_input: task.replace_input,
            store_output: task.store_output,
            custom_func: task.custom_func.clone(),
            parent: task.parent,
            created_at: Some(task.created_at),
            started_at: task.started_at,
            finished_at: task.finished_at,
            workdir: task.workdir.clone(),
            attempts: task.attempts,
        }
    }
}

impl NodeDocument {
    /// Build the in-memory record, parsing reference strings once.
    ///
    /// `default_retries` applies when the node sets neither `retries` nor
    /// `retry_budget`.
    pub fn into_record(self, default_retries: u32) -> Result<TaskRecord, GraphError> {
        let input_spec = self
            .input
            .into_iter()
            .map(|(k, v)| InputValue::parse(v).map(|iv| (k, iv)))
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        let retries = self.retries.or(self.retry_budget).unwrap_or(default_retries);

        Ok(TaskRecord {
            id: self.id,
            key: self.key,
            kind: self.kind,
            configuration: self.configuration,
            input_spec,
            output: self.output,
            status: self.status,
            retries,
            retry_budget: self.retry_budget.unwrap_or(retries),
            breakpoint: self.breakpoint,
            enabled: self.enabled,
            replace_input: self.replace_input,
            store_output: self.store_output,
            custom_func: self.custom_func,
            parent: self.parent,
            created_at: self.created_at.unwrap_or_else(Utc::now),
            started_at: self.started_at,
            finished_at: self.finished_at,
            workdir: self.workdir,
            attempts: self.attempts,
        })
    }
}
