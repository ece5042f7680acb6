// src/exec/registry.rs

//! In-process functions addressable by dotted path.
//!
//! A task whose `custom_func` is set runs the registered function instead of
//! calling the external executor. Paths are checked for shape when the task
//! enters the graph and for existence when a controller is built.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::dag::TaskGraph;
use crate::errors::GraphError;

use super::backend::{ExecutorError, Outcome, TaskRequest};

pub type TaskFunction =
    Arc<dyn Fn(&TaskRequest) -> Result<Outcome, ExecutorError> + Send + Sync>;

#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: BTreeMap<String, TaskFunction>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `func` under `path`, replacing any previous entry.
    pub fn register<F>(&mut self, path: impl Into<String>, func: F) -> Result<(), GraphError>
    where
        F: Fn(&TaskRequest) -> Result<Outcome, ExecutorError> + Send + Sync + 'static,
    {
        let path = path.into();
        check_function_path(&path)?;
        self.functions.insert(path, Arc::new(func));
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<TaskFunction> {
        self.functions.get(path).cloned()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.functions.contains_key(path)
    }

    /// Every `custom_func` in `graph` must be registered.
    pub fn check_graph(&self, graph: &TaskGraph) -> Result<(), GraphError> {
        for task in graph.tasks() {
            if let Some(path) = task.custom_func.as_deref() {
                if !self.contains(path) {
                    return Err(GraphError::UnknownFunction {
                        task: task.id,
                        path: path.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// A function path needs at least `module.function`, with no empty segment.
pub fn check_function_path(path: &str) -> Result<(), GraphError> {
    let segments: Vec<&str> = path.split('.').collect();
    let valid = segments.len() >= 2
        && segments
            .iter()
            .all(|s| !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_'));
    if valid {
        Ok(())
    } else {
        Err(GraphError::InvalidFunctionPath(path.to_string()))
    }
}
