use std::collections::HashSet;

use proptest::prelude::*;
use serde_json::json;
use flowdag::dag::{
    DataMap, NewTask, ScheduledTask, Scheduler, SchedulerOptions, TaskGraph, TaskKind, TaskStatus,
};
use flowdag::engine::TaskOutcome;
use flowdag::errors::GraphError;
use flowdag::workflow::Workflow;

// Strategy to generate a valid DAG: dependency lists per task.
// We ensure acyclicity by only allowing task N to depend on tasks 0..N-1.
fn dag_strategy(max_tasks: usize) -> impl Strategy<Value = Vec<Vec<usize>>> {
    (1..=max_tasks).prop_flat_map(|num_tasks| {
        proptest::collection::vec(
            proptest::collection::vec(any::<usize>(), 0..num_tasks),
            num_tasks,
        )
        .prop_map(|raw_deps| {
            raw_deps
                .into_iter()
                .enumerate()
                .map(|(i, potential)| {
                    let deps: HashSet<usize> = if i == 0 {
                        HashSet::new()
                    } else {
                        potential.into_iter().map(|d| d % i).collect()
                    };
                    let mut deps: Vec<usize> = deps.into_iter().collect();
                    deps.sort_unstable();
                    deps
                })
                .collect()
        })
    })
}

/// Start task plus one `Task` per dependency list. Tasks without
/// dependencies hang off Start.
fn build_workflow(deps: &[Vec<usize>]) -> Workflow {
    let mut workflow = Workflow::new("prop").unwrap();
    let start = workflow.start().unwrap();
    let mut ids = Vec::new();
    for (i, task_deps) in deps.iter().enumerate() {
        let id = workflow
            .add_task(NewTask::new(format!("task_{i}"), TaskKind::Task))
            .unwrap();
        if task_deps.is_empty() {
            workflow.graph.connect(start, id, None).unwrap();
        }
        for &d in task_deps {
            workflow.graph.connect(ids[d], id, None).unwrap();
        }
        ids.push(id);
    }
    workflow
}

fn assert_predecessors_completed(
    scheduler: &Scheduler,
    tasks: &[ScheduledTask],
) -> Result<(), TestCaseError> {
    for task in tasks {
        for pred in scheduler.graph().predecessors(task.id) {
            prop_assert_eq!(
                scheduler.status_of(pred),
                Some(TaskStatus::Completed),
                "task {} dispatched before predecessor {} completed",
                task.id,
                pred
            );
        }
    }
    Ok(())
}

proptest! {
    #[test]
    fn accepted_links_never_form_a_cycle(
        edges in proptest::collection::vec((0..8usize, 0..8usize), 0..40)
    ) {
        let mut graph = TaskGraph::new();
        let ids: Vec<u64> = (0..8)
            .map(|i| graph.add_task(NewTask::new(format!("t{i}"), TaskKind::Task)).unwrap())
            .collect();

        for (a, b) in edges {
            let (from, to) = (ids[a], ids[b]);
            let closes_cycle = from == to || graph.descendants(to).contains(&from);
            match graph.connect(from, to, None) {
                Ok(()) => prop_assert!(!closes_cycle),
                Err(GraphError::Cycle { .. }) => prop_assert!(closes_cycle),
                Err(e) => prop_assert!(false, "unexpected error: {}", e),
            }
            prop_assert!(graph.topological_order().is_ok());
        }
    }

    #[test]
    fn tasks_are_dispatched_only_after_all_predecessors_complete(
        deps in dag_strategy(10),
        picks in proptest::collection::vec(any::<usize>(), 1..30),
    ) {
        let workflow = build_workflow(&deps);
        let mut scheduler = Scheduler::new(workflow.graph, SchedulerOptions::default());

        let first = scheduler.begin(None).unwrap();
        assert_predecessors_completed(&scheduler, &first.newly_scheduled)?;
        let mut pending = first.newly_scheduled;

        // Complete in-flight tasks in an arbitrary order.
        let mut k = 0;
        while !pending.is_empty() {
            let idx = picks[k % picks.len()] % pending.len();
            k += 1;
            let task = pending.remove(idx);

            let mut output = DataMap::new();
            output.insert("dummy".to_string(), json!(task.id));
            let step = scheduler
                .handle_completion(task.id, task.seq, TaskOutcome::success(output))
                .unwrap();

            assert_predecessors_completed(&scheduler, &step.newly_scheduled)?;
            pending.extend(step.newly_scheduled);
        }

        prop_assert!(scheduler.summary().is_completed);
        prop_assert_eq!(scheduler.in_flight(), 0);
    }
}
