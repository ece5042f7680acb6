// src/dag/task.rs

//! Task records: one node of the workflow graph, plus its lifecycle state.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dag::reference::InputValue;
use crate::errors::{FlowError, GraphError, Result};

/// Stable task identity. Assigned once by the graph, never reused.
pub type TaskId = u64;

/// Key/value mapping used for configuration, resolved input and output.
pub type DataMap = serde_json::Map<String, Value>;

/// Closed set of task kinds. The kind selects how the executor runs a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    /// Graph root; its output is the workflow input.
    Start,
    /// Concurrent dispatch to the external executor.
    #[serde(alias = "WampTask", alias = "PythonTask")]
    Task,
    /// Dispatch that occupies the scheduler loop until it returns.
    #[serde(alias = "BlockingPythonTask")]
    BlockingTask,
    /// Fan-in: combines the output of all predecessors.
    Collect,
    /// Fan-out: one child dispatch per item of a sequence input.
    Mapper,
    /// In-process function from the function registry.
    Custom,
}

impl TaskKind {
    /// `BlockingTask` is the only kind dispatched inline.
    pub fn is_blocking(self) -> bool {
        matches!(self, TaskKind::BlockingTask)
    }
}

/// Lifecycle state of a task.
///
/// `Disabled` is the initial waiting state: the task has not yet been
/// released by its predecessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Disabled,
    Ready,
    Running,
    BreakpointHold,
    Completed,
    Failed,
    Aborted,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Aborted
        )
    }
}

/// Recorded task output: inline, or a handle to a JSON file on disk.
///
/// Persisted as either the mapping itself or `{"$ref": "<path>"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "DataMap", into = "DataMap")]
pub enum OutputHandle {
    Inline(DataMap),
    OnDisk(PathBuf),
}

impl OutputHandle {
    pub const REF_KEY: &'static str = "$ref";

    /// Materialize the output mapping, reading it from disk if needed.
    pub fn resolve(&self) -> Result<DataMap> {
        match self {
            OutputHandle::Inline(map) => Ok(map.clone()),
            OutputHandle::OnDisk(path) => {
                let contents = fs::read_to_string(path)?;
                match serde_json::from_str::<Value>(&contents)? {
                    Value::Object(map) => Ok(map),
                    other => Err(FlowError::ConfigError(format!(
                        "output file {} does not hold a JSON object (got {})",
                        path.display(),
                        other
                    ))),
                }
            }
        }
    }
}

impl From<DataMap> for OutputHandle {
    fn from(map: DataMap) -> Self {
        if map.len() == 1 {
            if let Some(Value::String(path)) = map.get(OutputHandle::REF_KEY) {
                return OutputHandle::OnDisk(PathBuf::from(path));
            }
        }
        OutputHandle::Inline(map)
    }
}

impl From<OutputHandle> for DataMap {
    fn from(handle: OutputHandle) -> Self {
        match handle {
            OutputHandle::Inline(map) => map,
            OutputHandle::OnDisk(path) => {
                let mut map = DataMap::new();
                map.insert(
                    OutputHandle::REF_KEY.to_string(),
                    Value::String(path.to_string_lossy().into_owned()),
                );
                map
            }
        }
    }
}

/// One node of the pipeline graph.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub id: TaskId,
    pub key: String,
    pub kind: TaskKind,
    /// Static options handed to the executor alongside the resolved input.
    pub configuration: DataMap,
    pub input_spec: BTreeMap<String, InputValue>,
    pub output: Option<OutputHandle>,
    pub status: TaskStatus,
    /// Configured number of retries after the first attempt; `retry_budget`
    /// is reset to this on rerun.
    pub retries: u32,
    pub retry_budget: u32,
    pub breakpoint: bool,
    pub enabled: bool,
    /// When predecessors hand over output, drop the task's own input
    /// instead of merging into it.
    pub replace_input: bool,
    /// Persist output to `<workdir>/output.json` instead of inline.
    pub store_output: bool,
    /// Dotted path of an in-process function (`package.module.function`).
    pub custom_func: Option<String>,
    /// Mapper that spawned this task, for synthetic fan-out children.
    pub parent: Option<TaskId>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub workdir: Option<PathBuf>,
    /// Number of dispatches made for this task.
    pub attempts: u32,
}

impl TaskRecord {
    /// Wall-clock duration between `started_at` and `finished_at`.
    pub fn runtime(&self) -> Option<Duration> {
        let (start, end) = (self.started_at?, self.finished_at?);
        (end - start).to_std().ok()
    }

    pub fn is_mapped_child(&self) -> bool {
        self.parent.is_some()
    }

    /// Resolved output, or `None` if the task has not produced any.
    pub fn output_data(&self) -> Result<Option<DataMap>> {
        self.output.as_ref().map(OutputHandle::resolve).transpose()
    }

    /// Name of the input key a Mapper splits over.
    pub fn mapper_arg(&self) -> &str {
        self.configuration
            .get("mapper_arg")
            .and_then(Value::as_str)
            .unwrap_or("mapper")
    }
}

/// Description of a task to add to a [`crate::dag::TaskGraph`].
///
/// ```
/// use flowdag::dag::{NewTask, TaskKind};
/// use serde_json::json;
///
/// let task = NewTask::new("dock", TaskKind::Task)
///     .config("sleep", json!(0))
///     .input("ligand", json!("$2.mol2"))
///     .retry_budget(3);
/// # let _ = task;
/// ```
#[derive(Debug, Clone)]
pub struct NewTask {
    pub(crate) key: String,
    pub(crate) kind: TaskKind,
    pub(crate) configuration: DataMap,
    pub(crate) input: DataMap,
    pub(crate) retries: u32,
    pub(crate) breakpoint: bool,
    pub(crate) enabled: bool,
    pub(crate) replace_input: bool,
    pub(crate) store_output: bool,
    pub(crate) custom_func: Option<String>,
}

impl NewTask {
    pub fn new(key: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            key: key.into(),
            kind,
            configuration: DataMap::new(),
            input: DataMap::new(),
            retries: 0,
            breakpoint: false,
            enabled: true,
            replace_input: false,
            store_output: false,
            custom_func: None,
        }
    }

    pub fn config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.configuration.insert(key.into(), value);
        self
    }

    /// Literal value or `$<id>.<key>` reference string.
    pub fn input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.input.insert(key.into(), value);
        self
    }

    pub fn retry_budget(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn breakpoint(mut self, on: bool) -> Self {
        self.breakpoint = on;
        self
    }

    pub fn enabled(mut self, on: bool) -> Self {
        self.enabled = on;
        self
    }

    pub fn replace_input(mut self, on: bool) -> Self {
        self.replace_input = on;
        self
    }

    pub fn store_output(mut self, on: bool) -> Self {
        self.store_output = on;
        self
    }

    pub fn custom_func(mut self, path: impl Into<String>) -> Self {
        self.custom_func = Some(path.into());
        self
    }

    pub(crate) fn into_record(self, id: TaskId) -> std::result::Result<TaskRecord, GraphError> {
        let input_spec = self
            .input
            .into_iter()
            .map(|(k, v)| InputValue::parse(v).map(|iv| (k, iv)))
            .collect::<std::result::Result<BTreeMap<_, _>, _>>()?;

        Ok(TaskRecord {
            id,
            key: self.key,
            kind: self.kind,
            configuration: self.configuration,
            input_spec,
            output: None,
            status: TaskStatus::Disabled,
            retries: self.retries,
            retry_budget: self.retries,
            breakpoint: self.breakpoint,
            enabled: self.enabled,
            replace_input: self.replace_input,
            store_output: self.store_output,
            custom_func: self.custom_func,
            parent: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            workdir: None,
            attempts: 0,
        })
    }
}
