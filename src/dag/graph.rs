// src/dag/graph.rs

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use petgraph::Direction;
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graphmap::DiGraphMap;
use tracing::debug;

use crate::dag::reference::InputValue;
use crate::dag::task::{DataMap, NewTask, TaskId, TaskKind, TaskRecord, TaskStatus};
use crate::errors::GraphError;

/// Directed dependency / data-flow edge between two tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub from: TaskId,
    pub to: TaskId,
    /// Upstream output key -> downstream input key. Unlisted keys keep
    /// their name.
    pub data_mapping: BTreeMap<String, String>,
}

impl Link {
    /// Downstream input key for an upstream output key.
    pub fn map_key<'a>(&'a self, key: &'a str) -> &'a str {
        self.data_mapping.get(key).map(String::as_str).unwrap_or(key)
    }
}

/// Owned task graph: task records plus the links between them.
///
/// Links are kept in declaration order (this is the "declared predecessor
/// order" used when combining outputs). A petgraph `DiGraphMap` mirrors the
/// topology for cycle checks and topological ordering.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    tasks: BTreeMap<TaskId, TaskRecord>,
    links: Vec<Link>,
    topology: DiGraphMap<TaskId, ()>,
    root: Option<TaskId>,
    next_id: TaskId,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    /// Add a task and return its freshly assigned id.
    pub fn add_task(&mut self, spec: NewTask) -> Result<TaskId, GraphError> {
        let id = self.next_id.max(1);
        let record = spec.into_record(id)?;
        self.insert_record(record)?;
        Ok(id)
    }

    /// Insert a task with a pre-assigned id (used when loading a persisted
    /// workflow).
    pub fn restore_task(&mut self, record: TaskRecord) -> Result<(), GraphError> {
        self.insert_record(record)
    }

    fn insert_record(&mut self, record: TaskRecord) -> Result<(), GraphError> {
        if self.task_by_key(&record.key).is_some() {
            return Err(GraphError::DuplicateKey(record.key));
        }
        if record.kind == TaskKind::Start {
            if let Some(existing) = self.root {
                return Err(GraphError::MultipleStart(existing, record.id));
            }
            self.root = Some(record.id);
        }
        if let Some(path) = record.custom_func.as_deref() {
            crate::exec::registry::check_function_path(path)?;
        }

        let id = record.id;
        self.topology.add_node(id);
        self.tasks.insert(id, record);
        self.next_id = self.next_id.max(id + 1);
        debug!(task = id, "task added to graph");
        Ok(())
    }

    /// Connect `from -> to`. Reconnecting an existing pair replaces its
    /// data mapping.
    pub fn connect(
        &mut self,
        from: TaskId,
        to: TaskId,
        data_mapping: Option<BTreeMap<String, String>>,
    ) -> Result<(), GraphError> {
        for id in [from, to] {
            if !self.tasks.contains_key(&id) {
                return Err(GraphError::UnknownTask(id));
            }
        }
        if from == to || has_path_connecting(&self.topology, to, from, None) {
            return Err(GraphError::Cycle { from, to });
        }

        let data_mapping = data_mapping.unwrap_or_default();
        match self.links.iter_mut().find(|l| l.from == from && l.to == to) {
            Some(existing) => existing.data_mapping = data_mapping,
            None => {
                self.topology.add_edge(from, to, ());
                self.links.push(Link {
                    from,
                    to,
                    data_mapping,
                });
            }
        }
        Ok(())
    }

    /// Direct upstream tasks, in link declaration order.
    pub fn predecessors(&self, id: TaskId) -> Vec<TaskId> {
        self.links
            .iter()
            .filter(|l| l.to == id)
            .map(|l| l.from)
            .collect()
    }

    /// Direct downstream tasks, in link declaration order.
    pub fn successors(&self, id: TaskId) -> Vec<TaskId> {
        self.links
            .iter()
            .filter(|l| l.from == id)
            .map(|l| l.to)
            .collect()
    }

    /// Tasks without incoming links (mapped children excluded).
    pub fn roots(&self) -> Vec<TaskId> {
        self.tasks
            .values()
            .filter(|t| !t.is_mapped_child())
            .filter(|t| {
                self.topology
                    .neighbors_directed(t.id, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|t| t.id)
            .collect()
    }

    /// Tasks without outgoing links (mapped children excluded).
    pub fn leaves(&self) -> Vec<TaskId> {
        self.tasks
            .values()
            .filter(|t| !t.is_mapped_child())
            .filter(|t| {
                self.topology
                    .neighbors_directed(t.id, Direction::Outgoing)
                    .next()
                    .is_none()
            })
            .map(|t| t.id)
            .collect()
    }

    /// Tasks still waiting (`Disabled`), enabled, whose predecessors have all
    /// `Completed`. Ordered by id.
    pub fn topological_ready_set(&self) -> Vec<TaskId> {
        self.tasks
            .values()
            .filter(|t| t.status == TaskStatus::Disabled && t.enabled && !t.is_mapped_child())
            .filter(|t| self.predecessors_completed(t.id))
            .map(|t| t.id)
            .collect()
    }

    pub fn predecessors_completed(&self, id: TaskId) -> bool {
        self.predecessors(id).into_iter().all(|p| {
            self.tasks
                .get(&p)
                .is_some_and(|t| t.status == TaskStatus::Completed)
        })
    }

    /// All transitive successors of `id` (not including `id`), breadth-first.
    pub fn descendants(&self, id: TaskId) -> Vec<TaskId> {
        let mut seen: HashSet<TaskId> = HashSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<TaskId> = self.successors(id).into();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next) {
                order.push(next);
                queue.extend(self.successors(next));
            }
        }
        order
    }

    /// Topological order of the linked tasks.
    pub fn topological_order(&self) -> Result<Vec<TaskId>, GraphError> {
        toposort(&self.topology, None).map_err(|cycle| {
            let node = cycle.node_id();
            GraphError::Cycle {
                from: node,
                to: node,
            }
        })
    }

    /// Check the structural invariants: one Start root, every other task
    /// reachable from it, no cycles, and every `$<id>.<key>` input pointing
    /// at a strict ancestor of the task that reads it.
    pub fn validate(&self) -> Result<(), GraphError> {
        let root = self.root.ok_or(GraphError::MissingStart)?;
        self.topological_order()?;

        let reachable: BTreeSet<TaskId> = std::iter::once(root)
            .chain(self.descendants(root))
            .collect();
        for task in self.tasks.values() {
            let anchored = match task.parent {
                Some(parent) => reachable.contains(&parent),
                None => reachable.contains(&task.id),
            };
            if !anchored {
                return Err(GraphError::Unreachable(task.id));
            }
        }

        for task in self.tasks.values() {
            for reference in task.input_spec.values().flat_map(InputValue::references) {
                let upstream = reference.task != task.id
                    && self.tasks.contains_key(&reference.task)
                    && has_path_connecting(&self.topology, reference.task, task.id, None);
                if !upstream {
                    return Err(GraphError::ReferenceNotUpstream {
                        consumer: task.id,
                        reference: reference.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Create a synthetic fan-out child of `parent` with literal input.
    pub(crate) fn add_mapped_child(
        &mut self,
        parent: TaskId,
        index: usize,
        input: DataMap,
    ) -> Result<TaskId, GraphError> {
        let template = self.tasks.get(&parent).ok_or(GraphError::UnknownTask(parent))?;
        let id = self.next_id.max(1);

        let mut spec = NewTask::new(format!("{}[{}]", template.key, index), TaskKind::Task)
            .retry_budget(template.retries)
            .store_output(template.store_output);
        spec.configuration = template.configuration.clone();
        spec.custom_func = template.custom_func.clone();

        let mut record = spec.into_record(id)?;
        record.input_spec = input
            .into_iter()
            .map(|(k, v)| (k, InputValue::Literal(v)))
            .collect();
        record.parent = Some(parent);
        self.insert_record(record)?;
        Ok(id)
    }

    pub(crate) fn remove_mapped_children(&mut self, parent: TaskId) {
        let children = self.mapped_children(parent);
        for child in children {
            self.tasks.remove(&child);
            self.topology.remove_node(child);
        }
    }

    /// Synthetic children of a Mapper, in creation order.
    pub fn mapped_children(&self, parent: TaskId) -> Vec<TaskId> {
        self.tasks
            .values()
            .filter(|t| t.parent == Some(parent))
            .map(|t| t.id)
            .collect()
    }

    pub fn root(&self) -> Option<TaskId> {
        self.root
    }

    pub fn task(&self, id: TaskId) -> Option<&TaskRecord> {
        self.tasks.get(&id)
    }

    pub fn task_mut(&mut self, id: TaskId) -> Option<&mut TaskRecord> {
        self.tasks.get_mut(&id)
    }

    pub fn task_by_key(&self, key: &str) -> Option<&TaskRecord> {
        self.tasks.values().find(|t| t.key == key)
    }

    /// All tasks ordered by id.
    pub fn tasks(&self) -> impl Iterator<Item = &TaskRecord> {
        self.tasks.values()
    }

    pub(crate) fn tasks_mut(&mut self) -> impl Iterator<Item = &mut TaskRecord> {
        self.tasks.values_mut()
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn link(&self, from: TaskId, to: TaskId) -> Option<&Link> {
        self.links.iter().find(|l| l.from == from && l.to == to)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
