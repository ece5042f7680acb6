mod common;

use std::sync::Arc;

use flowdag::dag::{NewTask, TaskKind, TaskStatus};
use flowdag_test_utils::builders::{WorkflowBuilder, controller, linear_chain};
use flowdag_test_utils::fake_executor::{DummyExecutor, GatedExecutor};

use common::{init_tracing, status, wait_until, with_timeout};

#[tokio::test]
async fn cancel_lets_in_flight_work_finish_and_aborts_the_rest() {
    init_tracing();
    let (builder, ids) = linear_chain(5, TaskKind::Task);
    let executor = GatedExecutor::new();
    let mut ctl = controller(builder.build(), Arc::new(executor.clone()));

    ctl.run(None).unwrap();
    with_timeout(executor.wait_started()).await;
    assert_eq!(executor.in_progress(), 1);

    with_timeout(ctl.cancel()).await.unwrap();
    executor.release(10);
    let summary = with_timeout(ctl.wait()).await.unwrap();

    assert!(summary.cancelled);
    assert!(!summary.is_completed);

    let graph = &ctl.workflow().graph;
    assert_eq!(status(graph, ids[0]), TaskStatus::Completed);
    assert_eq!(status(graph, ids[1]), TaskStatus::Completed);
    for &id in &ids[2..] {
        assert_eq!(status(graph, id), TaskStatus::Aborted);
    }
    // Nothing was dispatched once the cancel landed.
    assert_eq!(executor.dummy().call_order(), vec![ids[1]]);
}

#[tokio::test]
async fn cancel_with_parallel_branches_waits_for_all_of_them() {
    init_tracing();
    let mut builder = WorkflowBuilder::new("parallel");
    let start = builder.start();
    let a = builder.then(start, NewTask::new("a", TaskKind::Task));
    let b = builder.then(start, NewTask::new("b", TaskKind::Task));
    let a2 = builder.then(a, NewTask::new("a2", TaskKind::Task));
    let b2 = builder.then(b, NewTask::new("b2", TaskKind::Task));

    let executor = GatedExecutor::new();
    let mut ctl = controller(builder.build(), Arc::new(executor.clone()));
    ctl.run(None).unwrap();
    with_timeout(executor.wait_started()).await;

    let handle = ctl.control_handle().expect("run is active");
    assert!(handle.cancel().await);
    executor.release(10);
    let summary = with_timeout(ctl.wait()).await.unwrap();

    assert!(summary.cancelled);
    let graph = &ctl.workflow().graph;
    assert_eq!(status(graph, a), TaskStatus::Completed);
    assert_eq!(status(graph, b), TaskStatus::Completed);
    assert_eq!(status(graph, a2), TaskStatus::Aborted);
    assert_eq!(status(graph, b2), TaskStatus::Aborted);
    assert_eq!(executor.dummy().calls().len(), 2);

    // The loop is gone; the handle reports it.
    assert!(!handle.cancel().await);
}

#[tokio::test]
async fn cancel_on_an_idle_workflow_aborts_immediately() {
    init_tracing();
    let (builder, ids) = linear_chain(3, TaskKind::Task);
    let executor = DummyExecutor::new();
    let mut ctl = controller(builder.build(), Arc::new(executor.clone()));

    ctl.cancel().await.unwrap();
    for &id in &ids {
        assert_eq!(status(&ctl.workflow().graph, id), TaskStatus::Aborted);
    }
    assert!(executor.calls().is_empty());

    // A new run recovers aborted tasks and finishes.
    let summary = with_timeout(ctl.run_to_completion(None)).await.unwrap();
    assert!(summary.is_completed);
    assert!(!summary.cancelled);
    assert_eq!(executor.call_order(), ids[1..].to_vec());
}

#[tokio::test]
async fn cancel_after_the_run_settled_changes_nothing() {
    init_tracing();
    let (builder, ids) = linear_chain(3, TaskKind::Task);
    let mut ctl = controller(builder.build(), Arc::new(DummyExecutor::new()));

    ctl.run(None).unwrap();
    wait_until(|| !ctl.is_running()).await;
    with_timeout(ctl.cancel()).await.unwrap();

    assert!(ctl.is_completed());
    assert_eq!(ctl.last_run().map(|s| s.is_completed), Some(true));
    for &id in &ids {
        assert_eq!(status(&ctl.workflow().graph, id), TaskStatus::Completed);
    }
}
