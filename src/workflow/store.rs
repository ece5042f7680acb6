// src/workflow/store.rs

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::ConfigFile;
use crate::dag::{NewTask, TaskGraph, TaskId, TaskKind};
use crate::errors::{FlowError, GraphError, Result};

use super::document::{NodeDocument, WorkflowDocument};

/// Workflow-level metadata stored next to the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowMetadata {
    pub title: String,
    pub description: String,
    /// Base directory for task workdirs and disk-backed output.
    pub project_dir: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
}

/// A task graph plus its metadata: the unit that is saved and loaded.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub metadata: WorkflowMetadata,
    pub graph: TaskGraph,
}

impl Workflow {
    /// New workflow holding only its `Start` task (key `"start"`).
    pub fn new(title: impl Into<String>) -> Result<Self> {
        let mut graph = TaskGraph::new();
        graph.add_task(NewTask::new("start", TaskKind::Start))?;
        Ok(Self {
            metadata: WorkflowMetadata {
                title: title.into(),
                description: String::new(),
                project_dir: None,
                created_at: Utc::now(),
            },
            graph,
        })
    }

    pub fn with_project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.metadata.project_dir = Some(dir.into());
        self
    }

    pub fn start(&self) -> Option<TaskId> {
        self.graph.root()
    }

    pub fn add_task(&mut self, spec: NewTask) -> std::result::Result<TaskId, GraphError> {
        self.graph.add_task(spec)
    }

    /// Add a task and link it after `after`.
    pub fn add_after(
        &mut self,
        after: TaskId,
        spec: NewTask,
    ) -> std::result::Result<TaskId, GraphError> {
        let id = self.graph.add_task(spec)?;
        self.graph.connect(after, id, None)?;
        Ok(id)
    }

    pub fn to_document(&self) -> WorkflowDocument {
        WorkflowDocument {
            title: self.metadata.title.clone(),
            description: self.metadata.description.clone(),
            project_dir: self.metadata.project_dir.clone(),
            created_at: self.metadata.created_at,
            root: self.graph.root(),
            nodes: self.graph.tasks().map(NodeDocument::from).collect(),
            edges: self
                .graph
                .links()
                .iter()
                .map(|l| {
                    let mapping = (!l.data_mapping.is_empty()).then(|| l.data_mapping.clone());
                    (l.from, l.to, mapping)
                })
                .collect(),
        }
    }

    /// Rebuild a workflow from its document and validate it.
    pub fn from_document(doc: WorkflowDocument, default_retries: u32) -> Result<Self> {
        let mut graph = TaskGraph::new();
        for node in doc.nodes {
            graph.restore_task(node.into_record(default_retries)?)?;
        }
        for (from, to, mapping) in doc.edges {
            graph.connect(from, to, mapping)?;
        }
        if let Some(root) = doc.root {
            if graph.root() != Some(root) {
                return Err(FlowError::ConfigError(format!(
                    "document root {root} is not the Start task"
                )));
            }
        }
        graph.validate()?;

        Ok(Self {
            metadata: WorkflowMetadata {
                title: doc.title,
                description: doc.description,
                project_dir: doc.project_dir,
                created_at: doc.created_at,
            },
            graph,
        })
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Self::from_json_str_with_defaults(json, &ConfigFile::default())
    }

    fn from_json_str_with_defaults(json: &str, config: &ConfigFile) -> Result<Self> {
        let doc: WorkflowDocument = serde_json::from_str(json)?;
        Self::from_document(doc, config.default.retry_budget)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_document())?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_with_config(path, &ConfigFile::default())
    }

    /// Load a workflow, applying `[default]` values from `config` to nodes
    /// that omit them.
    pub fn load_with_config(path: impl AsRef<Path>, config: &ConfigFile) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let workflow = Self::from_json_str_with_defaults(&contents, config)?;
        info!(
            path = %path.display(),
            title = %workflow.metadata.title,
            tasks = workflow.graph.len(),
            "workflow loaded"
        );
        Ok(workflow)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_json_string()?)?;
        debug!(path = %path.display(), "workflow saved");
        Ok(())
    }
}
