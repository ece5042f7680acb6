// src/dag/reference.rs

//! Task input references and their resolution.
//!
//! In the persisted format an input value may be a plain string of the form
//! `$<task-id>.<output-key>`. Such strings are parsed once, when a task enters
//! the graph, into a typed [`Reference`]; the scheduling loop never looks at
//! the string form again.

use std::fmt;

use serde_json::Value;

use crate::dag::graph::TaskGraph;
use crate::dag::task::{DataMap, TaskId};
use crate::errors::{FlowError, GraphError, Result};

/// Pointer to one key of another task's output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    pub task: TaskId,
    pub key: String,
}

impl Reference {
    pub fn new(task: TaskId, key: impl Into<String>) -> Self {
        Self {
            task,
            key: key.into(),
        }
    }

    /// Parse `$<id>.<key>`.
    ///
    /// Returns `None` for strings that do not start with `$` (plain literals).
    pub fn parse(s: &str) -> Option<std::result::Result<Self, GraphError>> {
        let body = s.strip_prefix('$')?;
        let parsed = body
            .split_once('.')
            .and_then(|(id, key)| {
                let task = id.parse::<TaskId>().ok()?;
                (!key.is_empty()).then(|| Reference::new(task, key))
            })
            .ok_or_else(|| GraphError::InvalidReference(s.to_string()));
        Some(parsed)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}.{}", self.task, self.key)
    }
}

/// One entry of a task's `input_spec`.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    Literal(Value),
    Reference(Reference),
    /// Sequence containing at least one reference; resolved element-wise.
    List(Vec<InputValue>),
}

impl InputValue {
    /// Parse a persisted/user value, turning reference strings into
    /// [`Reference`]s (recursively inside arrays).
    pub fn parse(value: Value) -> std::result::Result<Self, GraphError> {
        match value {
            Value::String(s) => match Reference::parse(&s) {
                Some(r) => Ok(InputValue::Reference(r?)),
                None => Ok(InputValue::Literal(Value::String(s))),
            },
            Value::Array(items) => {
                let parsed = items
                    .into_iter()
                    .map(InputValue::parse)
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                if parsed.iter().all(|v| matches!(v, InputValue::Literal(_))) {
                    Ok(InputValue::Literal(Value::Array(
                        parsed.into_iter().map(|v| v.to_value()).collect(),
                    )))
                } else {
                    Ok(InputValue::List(parsed))
                }
            }
            other => Ok(InputValue::Literal(other)),
        }
    }

    /// Back to the persisted representation.
    pub fn to_value(&self) -> Value {
        match self {
            InputValue::Literal(v) => v.clone(),
            InputValue::Reference(r) => Value::String(r.to_string()),
            InputValue::List(items) => Value::Array(items.iter().map(Self::to_value).collect()),
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, InputValue::Literal(_))
    }

    /// Every reference contained in this value.
    pub fn references(&self) -> Vec<&Reference> {
        match self {
            InputValue::Literal(_) => Vec::new(),
            InputValue::Reference(r) => vec![r],
            InputValue::List(items) => items.iter().flat_map(Self::references).collect(),
        }
    }
}

/// Resolve the `input_spec` of task `id` into a concrete mapping.
///
/// A reference to a task that has no recorded output is an internal error:
/// readiness gating should make it impossible.
pub fn resolve_input(graph: &TaskGraph, id: TaskId) -> Result<DataMap> {
    let task = graph.task(id).ok_or(FlowError::TaskNotFound(id))?;
    let mut resolved = DataMap::new();
    for (key, value) in task.input_spec.iter() {
        resolved.insert(key.clone(), resolve_value(graph, id, value)?);
    }
    Ok(resolved)
}

fn resolve_value(graph: &TaskGraph, consumer: TaskId, value: &InputValue) -> Result<Value> {
    match value {
        InputValue::Literal(v) => Ok(v.clone()),
        InputValue::Reference(r) => resolve_reference(graph, consumer, r),
        InputValue::List(items) => items
            .iter()
            .map(|item| resolve_value(graph, consumer, item))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
    }
}

fn resolve_reference(graph: &TaskGraph, consumer: TaskId, reference: &Reference) -> Result<Value> {
    let unresolved = || FlowError::UnresolvedReference {
        consumer,
        task: reference.task,
        key: reference.key.clone(),
    };

    let source = graph.task(reference.task).ok_or_else(unresolved)?;
    let output = source.output_data()?.ok_or_else(unresolved)?;
    Ok(output.get(&reference.key).cloned().unwrap_or(Value::Null))
}
