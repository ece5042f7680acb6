#![allow(dead_code, unused_imports)]

use serde_json::Value;
use flowdag::dag::{DataMap, TaskGraph, TaskId, TaskStatus};

pub use flowdag_test_utils::{init_tracing, wait_until, with_timeout};

/// `json!({...})` as a `DataMap`.
pub fn data(value: Value) -> DataMap {
    value.as_object().cloned().expect("expected a JSON object")
}

pub fn status(graph: &TaskGraph, id: TaskId) -> TaskStatus {
    graph.task(id).expect("task exists").status
}
