#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Value, json};
use flowdag::config::ConfigFile;
use flowdag::dag::{NewTask, TaskId, TaskKind};
use flowdag::engine::WorkflowController;
use flowdag::exec::TaskExecutor;
use flowdag::workflow::Workflow;

/// Builder for `Workflow` to simplify test setup.
///
/// The workflow starts with its Start task (id 1).
pub struct WorkflowBuilder {
    workflow: Workflow,
}

impl WorkflowBuilder {
    pub fn new(title: &str) -> Self {
        Self {
            workflow: Workflow::new(title).expect("Failed to create workflow"),
        }
    }

    pub fn start(&self) -> TaskId {
        self.workflow.start().expect("workflow has a Start task")
    }

    /// Seed the Start task's input.
    pub fn input(mut self, key: &str, value: Value) -> Self {
        let start = self.start();
        let task = self.workflow.graph.task_mut(start).expect("start task");
        task.input_spec.insert(
            key.to_string(),
            flowdag::dag::InputValue::Literal(value),
        );
        self
    }

    pub fn add(&mut self, task: NewTask) -> TaskId {
        self.workflow.add_task(task).expect("Failed to add task")
    }

    pub fn link(&mut self, from: TaskId, to: TaskId) -> &mut Self {
        self.workflow
            .graph
            .connect(from, to, None)
            .expect("Failed to link tasks");
        self
    }

    pub fn link_mapped(&mut self, from: TaskId, to: TaskId, mapping: &[(&str, &str)]) -> &mut Self {
        let mapping: BTreeMap<String, String> = mapping
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect();
        self.workflow
            .graph
            .connect(from, to, Some(mapping))
            .expect("Failed to link tasks");
        self
    }

    /// Add `task` and link it after `after`.
    pub fn then(&mut self, after: TaskId, task: NewTask) -> TaskId {
        self.workflow
            .add_after(after, task)
            .expect("Failed to add linked task")
    }

    pub fn project_dir(mut self, dir: &std::path::Path) -> Self {
        self.workflow = self.workflow.with_project_dir(dir);
        self
    }

    pub fn build(self) -> Workflow {
        self.workflow
    }
}

/// A `Task` handled by the dummy executor, adding `add` to `dummy`.
pub fn dummy_task(key: &str, kind: TaskKind) -> NewTask {
    NewTask::new(key, kind).config("add_number", json!(1))
}

/// `Start -> t2 -> ... -> tn`: `n` nodes in total, ids `1..=n`.
///
/// The Start task is seeded with `{"dummy": 1}`; each following task adds 1.
pub fn linear_chain(n: usize, kind: TaskKind) -> (WorkflowBuilder, Vec<TaskId>) {
    let mut builder = WorkflowBuilder::new("linear").input("dummy", json!(1));
    let mut ids = vec![builder.start()];
    for i in 2..=n {
        let prev = *ids.last().expect("chain is non-empty");
        let id = builder.then(prev, dummy_task(&format!("task{i}"), kind));
        ids.push(id);
    }
    (builder, ids)
}

/// Controller with default configuration.
pub fn controller(workflow: Workflow, executor: Arc<dyn TaskExecutor>) -> WorkflowController {
    WorkflowController::new(workflow, executor).expect("Failed to build controller")
}

/// Controller with the given configuration.
pub fn controller_with_config(
    workflow: Workflow,
    executor: Arc<dyn TaskExecutor>,
    config: ConfigFile,
) -> WorkflowController {
    controller(workflow, executor).with_config(config)
}
