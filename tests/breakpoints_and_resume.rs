mod common;

use std::sync::Arc;

use serde_json::json;
use flowdag::config::{ConfigFile, RawConfigFile, RuntimeSection};
use flowdag::dag::{NewTask, TaskKind, TaskStatus};
use flowdag::errors::FlowError;
use flowdag::types::ResumePolicy;
use flowdag_test_utils::builders::{
    WorkflowBuilder, controller, controller_with_config, dummy_task, linear_chain,
};
use flowdag_test_utils::fake_executor::{DummyExecutor, GatedExecutor};

use common::{data, init_tracing, status, with_timeout};

fn rerun_config() -> ConfigFile {
    ConfigFile::try_from(RawConfigFile {
        runtime: RuntimeSection {
            resume_policy: ResumePolicy::Rerun,
            ..RuntimeSection::default()
        },
        ..RawConfigFile::default()
    })
    .expect("valid config")
}

#[tokio::test]
async fn breakpoint_holds_until_stepped_and_resumed() {
    init_tracing();
    let mut builder = WorkflowBuilder::new("bp").input("dummy", json!(1));
    let start = builder.start();
    let t2 = builder.then(start, dummy_task("t2", TaskKind::Task));
    let t3 = builder.then(t2, dummy_task("t3", TaskKind::Task).breakpoint(true));
    let t4 = builder.then(t3, dummy_task("t4", TaskKind::Task));
    let executor = DummyExecutor::new();
    let mut ctl = controller(builder.build(), Arc::new(executor.clone()));

    let summary = with_timeout(ctl.run_to_completion(None)).await.unwrap();
    assert_eq!(summary.active_breakpoint, Some(t3));
    assert!(!summary.is_completed);
    assert_eq!(ctl.active_breakpoint(), Some(t3));
    assert_eq!(status(&ctl.workflow().graph, t3), TaskStatus::BreakpointHold);
    assert_eq!(executor.call_order(), vec![t2]);

    ctl.step_breakpoint(t3).await.unwrap();
    assert_eq!(status(&ctl.workflow().graph, t3), TaskStatus::Ready);
    assert!(!ctl.get_task(t3).unwrap().breakpoint);
    assert_eq!(executor.call_order(), vec![t2], "stepping does not dispatch");

    let summary = with_timeout(ctl.run_to_completion(Some(t3))).await.unwrap();
    assert!(summary.is_completed);
    assert_eq!(executor.call_order(), vec![t2, t3, t4]);
    assert_eq!(ctl.output().unwrap()[&t4], data(json!({"dummy": 4})));
}

#[tokio::test]
async fn stepping_during_a_run_is_picked_up_by_the_next_pass() {
    init_tracing();
    let mut builder = WorkflowBuilder::new("bp-live");
    let start = builder.start();
    let slow = builder.then(start, NewTask::new("slow", TaskKind::Task));
    let held = builder.then(start, NewTask::new("held", TaskKind::Task).breakpoint(true));
    let executor = GatedExecutor::new();
    let mut ctl = controller(builder.build(), Arc::new(executor.clone()));

    ctl.run(None).unwrap();
    with_timeout(executor.wait_started()).await;
    assert_eq!(ctl.active_breakpoint(), Some(held));

    with_timeout(ctl.step_breakpoint(held)).await.unwrap();
    executor.release(10);
    let summary = with_timeout(ctl.wait()).await.unwrap();

    assert!(summary.is_completed);
    assert_eq!(executor.dummy().call_order(), vec![slow, held]);
}

#[tokio::test]
async fn stepping_an_unknown_task_during_a_run_leaves_the_run_alive() {
    init_tracing();
    let mut builder = WorkflowBuilder::new("bp-unknown");
    let start = builder.start();
    let slow = builder.then(start, NewTask::new("slow", TaskKind::Task));
    let executor = GatedExecutor::new();
    let mut ctl = controller(builder.build(), Arc::new(executor.clone()));

    ctl.run(None).unwrap();
    with_timeout(executor.wait_started()).await;

    assert!(matches!(
        with_timeout(ctl.step_breakpoint(999)).await,
        Err(FlowError::TaskNotFound(999))
    ));
    assert!(ctl.is_running());

    executor.release(10);
    let summary = with_timeout(ctl.wait()).await.unwrap();
    assert!(summary.is_completed);
    assert_eq!(status(&ctl.workflow().graph, slow), TaskStatus::Completed);
}

#[tokio::test]
async fn stepping_a_task_without_breakpoint_is_harmless() {
    init_tracing();
    let (builder, ids) = linear_chain(2, TaskKind::Task);
    let mut ctl = controller(builder.build(), Arc::new(DummyExecutor::new()));

    ctl.step_breakpoint(ids[1]).await.unwrap();
    assert!(matches!(
        ctl.step_breakpoint(99).await,
        Err(FlowError::TaskNotFound(99))
    ));
}

#[tokio::test]
async fn continue_policy_keeps_completed_work() {
    init_tracing();
    let (builder, ids) = linear_chain(4, TaskKind::Task);
    let executor = DummyExecutor::new();
    let mut ctl = controller(builder.build(), Arc::new(executor.clone()));

    with_timeout(ctl.run_to_completion(None)).await.unwrap();
    let summary = with_timeout(ctl.run_to_completion(Some(ids[2]))).await.unwrap();

    assert!(summary.is_completed);
    assert_eq!(executor.calls().len(), 3, "nothing ran twice");
}

#[tokio::test]
async fn rerun_policy_reexecutes_the_sub_graph() {
    init_tracing();
    let (builder, ids) = linear_chain(4, TaskKind::Task);
    let executor = DummyExecutor::new();
    let mut ctl = controller_with_config(builder.build(), Arc::new(executor.clone()), rerun_config());

    with_timeout(ctl.run_to_completion(None)).await.unwrap();
    let summary = with_timeout(ctl.run_to_completion(Some(ids[2]))).await.unwrap();

    assert!(summary.is_completed);
    assert_eq!(executor.call_count(ids[1]), 1);
    assert_eq!(executor.call_count(ids[2]), 2);
    assert_eq!(executor.call_count(ids[3]), 2);
    assert_eq!(ctl.get_task(ids[2]).unwrap().attempts, 1);
}

#[tokio::test]
async fn rerun_after_new_input_uses_the_new_values() {
    init_tracing();
    let (builder, ids) = linear_chain(5, TaskKind::Task);
    let mut ctl = controller_with_config(
        builder.build(),
        Arc::new(DummyExecutor::new()),
        rerun_config(),
    );

    with_timeout(ctl.run_to_completion(None)).await.unwrap();
    assert_eq!(ctl.output().unwrap()[&ids[4]], data(json!({"dummy": 5})));

    ctl.input(data(json!({"dummy": 100}))).await.unwrap();
    with_timeout(ctl.run_to_completion(Some(ids[1]))).await.unwrap();
    assert_eq!(ctl.output().unwrap()[&ids[4]], data(json!({"dummy": 104})));
}

#[tokio::test]
async fn input_seeds_the_start_task() {
    init_tracing();
    let (builder, ids) = linear_chain(5, TaskKind::Task);
    let mut ctl = controller(builder.build(), Arc::new(DummyExecutor::new()));

    ctl.input(data(json!({"dummy": 10}))).await.unwrap();
    let summary = with_timeout(ctl.run_to_completion(None)).await.unwrap();

    assert!(summary.is_completed);
    assert_eq!(ctl.output().unwrap()[&ids[4]], data(json!({"dummy": 14})));
}

#[tokio::test]
async fn interrupted_task_is_run_again() {
    init_tracing();
    let (builder, ids) = linear_chain(3, TaskKind::Task);
    let executor = DummyExecutor::new();
    let mut ctl = controller(builder.build(), Arc::new(executor.clone()));

    // As left behind by a process that died mid-dispatch.
    ctl.workflow_mut()
        .unwrap()
        .graph
        .task_mut(ids[1])
        .unwrap()
        .status = TaskStatus::Running;

    let summary = with_timeout(ctl.run_to_completion(None)).await.unwrap();
    assert!(summary.is_completed);
    assert_eq!(executor.call_count(ids[1]), 1);
}

#[tokio::test]
async fn unknown_resume_task_is_reported_before_starting() {
    init_tracing();
    let (builder, _) = linear_chain(2, TaskKind::Task);
    let mut ctl = controller(builder.build(), Arc::new(DummyExecutor::new()));

    assert!(matches!(ctl.run(Some(42)), Err(FlowError::TaskNotFound(42))));
    assert!(!ctl.is_running());
    assert_eq!(ctl.workflow().graph.len(), 2);
}
