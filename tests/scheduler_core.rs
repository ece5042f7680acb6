mod common;

use std::path::PathBuf;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use serde_json::json;
use flowdag::dag::{
    NewTask, OutputHandle, Scheduler, SchedulerOptions, TaskKind, TaskStatus,
};
use flowdag::engine::{
    AttemptWindow, ControlCommand, CoreCommand, CoreRuntime, FailureKind, RuntimeEvent, TaskOutcome,
};
use flowdag::errors::FlowError;
use flowdag::types::ResumePolicy;
use flowdag_test_utils::builders::{WorkflowBuilder, dummy_task, linear_chain};

use common::{data, status};

fn scheduler_for(builder: WorkflowBuilder) -> Scheduler {
    Scheduler::new(builder.build().graph, SchedulerOptions::default())
}

#[test]
fn start_completes_inline_and_releases_its_successor() {
    let (builder, ids) = linear_chain(3, TaskKind::Task);
    let mut scheduler = scheduler_for(builder);

    let step = scheduler.begin(None).unwrap();

    assert_eq!(step.newly_completed, vec![ids[0]]);
    assert_eq!(step.scheduled_ids(), vec![ids[1]]);
    assert!(!step.quiescent);

    let dispatched = &step.newly_scheduled[0];
    assert_eq!(dispatched.input, data(json!({"dummy": 1})));
    assert_eq!(dispatched.attempt, 1);
    assert_eq!(status(scheduler.graph(), ids[1]), TaskStatus::Running);
}

#[test]
fn predecessor_output_is_wired_through_the_link_mapping() {
    let mut builder = WorkflowBuilder::new("wiring").input("a", json!(5));
    let start = builder.start();
    let consumer = builder.add(
        NewTask::new("consumer", TaskKind::Task).input("keep", json!("literal")),
    );
    builder.link_mapped(start, consumer, &[("a", "b")]);
    let mut scheduler = scheduler_for(builder);

    let step = scheduler.begin(None).unwrap();

    assert_eq!(
        step.newly_scheduled[0].input,
        data(json!({"b": 5, "keep": "literal"}))
    );
}

#[test]
fn replace_input_drops_the_tasks_own_input() {
    let mut builder = WorkflowBuilder::new("replace").input("a", json!(5));
    let start = builder.start();
    let consumer = builder.then(
        start,
        NewTask::new("consumer", TaskKind::Task)
            .input("keep", json!("literal"))
            .input("a", json!("overridden"))
            .replace_input(true),
    );
    let mut scheduler = scheduler_for(builder);

    let step = scheduler.begin(None).unwrap();

    assert_eq!(step.newly_scheduled[0].id, consumer);
    assert_eq!(step.newly_scheduled[0].input, data(json!({"a": 5})));
}

#[test]
fn retry_budget_of_n_gives_n_retries_after_the_first_attempt() {
    let mut builder = WorkflowBuilder::new("retry");
    let start = builder.start();
    let flaky = builder.then(start, NewTask::new("flaky", TaskKind::Task).retry_budget(3));
    let mut scheduler = scheduler_for(builder);

    let mut step = scheduler.begin(None).unwrap();
    let mut attempts = 0;
    while let Some(task) = step.newly_scheduled.pop() {
        assert_eq!(task.id, flaky);
        attempts += 1;
        assert_eq!(task.attempt, attempts);
        step = scheduler
            .handle_completion(task.id, task.seq, TaskOutcome::failed("boom"))
            .unwrap();
        if attempts <= 3 {
            assert_eq!(step.retried, vec![flaky]);
            let budget = scheduler.graph().task(flaky).unwrap().retry_budget;
            assert_eq!(budget, 3 - attempts);
        }
    }

    assert_eq!(attempts, 4);
    assert_eq!(step.newly_failed, vec![flaky]);
    assert!(step.quiescent);

    let task = scheduler.graph().task(flaky).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_budget, 0);
    assert_eq!(scheduler.summary().failed_task, Some(flaky));
}

#[test]
fn failure_in_one_branch_leaves_the_other_to_finish() {
    let mut builder = WorkflowBuilder::new("branches").input("dummy", json!(0));
    let start = builder.start();
    let a = builder.then(start, dummy_task("a", TaskKind::Task));
    let a2 = builder.then(a, dummy_task("a2", TaskKind::Task));
    let b = builder.then(start, dummy_task("b", TaskKind::Task));
    let b2 = builder.then(b, dummy_task("b2", TaskKind::Task));
    let mut scheduler = scheduler_for(builder);

    let step = scheduler.begin(None).unwrap();
    assert_eq!(step.scheduled_ids(), vec![a, b]);
    let seq_of = |id: u64| step.newly_scheduled.iter().find(|t| t.id == id).unwrap().seq;
    let (seq_a, seq_b) = (seq_of(a), seq_of(b));

    let step = scheduler
        .handle_completion(a, seq_a, TaskOutcome::failed("branch A broke"))
        .unwrap();
    assert_eq!(step.newly_failed, vec![a]);
    assert!(step.newly_scheduled.is_empty());

    let step = scheduler
        .handle_completion(b, seq_b, TaskOutcome::success(data(json!({"dummy": 1}))))
        .unwrap();
    let b2_task = step.newly_scheduled[0].clone();
    assert_eq!(b2_task.id, b2);

    let step = scheduler
        .handle_completion(b2, b2_task.seq, TaskOutcome::success(data(json!({"dummy": 2}))))
        .unwrap();
    assert!(step.quiescent);

    let graph = scheduler.graph();
    assert_eq!(status(graph, b2), TaskStatus::Completed);
    assert_eq!(status(graph, a2), TaskStatus::Disabled);
    assert_eq!(
        graph.task(b2).unwrap().output,
        Some(OutputHandle::Inline(data(json!({"dummy": 2}))))
    );

    let summary = scheduler.summary();
    assert!(summary.has_failed);
    assert!(!summary.is_completed);
    assert_eq!(summary.failed_task, Some(a));
}

#[test]
fn transport_failures_follow_the_retry_rules() {
    let mut builder = WorkflowBuilder::new("transport");
    let start = builder.start();
    let task = builder.then(start, NewTask::new("remote", TaskKind::Task).retry_budget(2));
    let mut scheduler = scheduler_for(builder);

    let step = scheduler.begin(None).unwrap();
    let seq = step.newly_scheduled[0].seq;
    let step = scheduler
        .handle_completion(
            task,
            seq,
            TaskOutcome::Failed {
                kind: FailureKind::Transport,
                reason: "connection refused".to_string(),
            },
        )
        .unwrap();

    assert_eq!(step.retried, vec![task]);
    assert_eq!(step.scheduled_ids(), vec![task]);
}

#[test]
fn stale_completions_are_ignored() {
    let (builder, ids) = linear_chain(3, TaskKind::Task);
    let mut scheduler = scheduler_for(builder);

    let step = scheduler.begin(None).unwrap();
    let current = step.newly_scheduled[0].seq;

    let step = scheduler
        .handle_completion(ids[1], current + 10, TaskOutcome::success(data(json!({}))))
        .unwrap();
    assert!(step.newly_completed.is_empty());
    assert_eq!(status(scheduler.graph(), ids[1]), TaskStatus::Running);
    assert_eq!(scheduler.in_flight(), 1);

    // Unknown task ids are ignored the same way.
    let step = scheduler
        .handle_completion(999, current, TaskOutcome::success(data(json!({}))))
        .unwrap();
    assert!(step.newly_completed.is_empty());
}

#[test]
fn cancel_waits_for_in_flight_work_then_aborts_the_rest() {
    let (builder, ids) = linear_chain(4, TaskKind::Task);
    let mut scheduler = scheduler_for(builder);

    let step = scheduler.begin(None).unwrap();
    let seq = step.newly_scheduled[0].seq;

    let step = scheduler.request_cancel();
    assert!(step.aborted.is_empty(), "in-flight work is not preempted");
    assert!(!step.quiescent);

    let step = scheduler
        .handle_completion(ids[1], seq, TaskOutcome::success(data(json!({"dummy": 2}))))
        .unwrap();
    assert!(step.newly_scheduled.is_empty(), "no dispatch after cancel");
    assert_eq!(step.aborted, vec![ids[2], ids[3]]);
    assert!(step.quiescent);

    let graph = scheduler.graph();
    assert_eq!(status(graph, ids[0]), TaskStatus::Completed);
    assert_eq!(status(graph, ids[1]), TaskStatus::Completed);
    assert_eq!(status(graph, ids[2]), TaskStatus::Aborted);
    assert!(scheduler.summary().cancelled);
}

#[test]
fn failures_after_cancel_are_not_retried() {
    let mut builder = WorkflowBuilder::new("cancel-retry");
    let start = builder.start();
    let task = builder.then(start, NewTask::new("t", TaskKind::Task).retry_budget(5));
    let mut scheduler = scheduler_for(builder);

    let seq = scheduler.begin(None).unwrap().newly_scheduled[0].seq;
    scheduler.request_cancel();
    let step = scheduler
        .handle_completion(task, seq, TaskOutcome::failed("late failure"))
        .unwrap();

    assert_eq!(step.newly_failed, vec![task]);
    assert!(step.retried.is_empty());
    assert_eq!(status(scheduler.graph(), task), TaskStatus::Failed);
    assert_eq!(scheduler.graph().task(task).unwrap().retry_budget, 5);
}

#[test]
fn tasks_without_a_budget_fail_on_the_first_attempt() {
    let mut builder = WorkflowBuilder::new("no-retry");
    let start = builder.start();
    let task = builder.then(start, NewTask::new("once", TaskKind::Task));
    let mut scheduler = scheduler_for(builder);

    let seq = scheduler.begin(None).unwrap().newly_scheduled[0].seq;
    let step = scheduler
        .handle_completion(task, seq, TaskOutcome::failed("boom"))
        .unwrap();

    assert_eq!(step.newly_failed, vec![task]);
    assert!(step.retried.is_empty());
    assert!(step.quiescent);
    let record = scheduler.graph().task(task).unwrap();
    assert_eq!(record.retry_budget, 0);
    assert_eq!(record.attempts, 1);
}

#[test]
fn breakpoint_holds_the_task_until_stepped() {
    let mut builder = WorkflowBuilder::new("bp").input("dummy", json!(1));
    let start = builder.start();
    let held = builder.then(start, dummy_task("held", TaskKind::Task).breakpoint(true));
    let after = builder.then(held, dummy_task("after", TaskKind::Task));
    let mut scheduler = scheduler_for(builder);

    let step = scheduler.begin(None).unwrap();
    assert_eq!(step.held, vec![held]);
    assert!(step.newly_scheduled.is_empty());
    assert!(step.quiescent);
    assert_eq!(scheduler.summary().active_breakpoint, Some(held));

    let step = scheduler.step_breakpoint(held).unwrap();
    assert!(step.newly_scheduled.is_empty(), "stepping does not dispatch");
    assert_eq!(status(scheduler.graph(), held), TaskStatus::Ready);
    assert_eq!(scheduler.summary().active_breakpoint, None);

    let step = scheduler.begin(Some(held)).unwrap();
    assert_eq!(step.scheduled_ids(), vec![held]);
    assert_eq!(status(scheduler.graph(), after), TaskStatus::Disabled);
}

#[test]
fn stepping_an_unknown_task_is_an_error() {
    let (builder, _) = linear_chain(2, TaskKind::Task);
    let mut scheduler = scheduler_for(builder);
    assert!(matches!(
        scheduler.step_breakpoint(77),
        Err(FlowError::TaskNotFound(77))
    ));
    assert!(matches!(
        scheduler.begin(Some(77)),
        Err(FlowError::TaskNotFound(77))
    ));
}

#[test]
fn rerun_policy_resets_the_sub_graph() {
    let (builder, ids) = linear_chain(4, TaskKind::Task);
    let options = SchedulerOptions {
        project_dir: None,
        resume_policy: ResumePolicy::Rerun,
    };
    let mut scheduler = Scheduler::new(builder.build().graph, options);

    let mut step = scheduler.begin(None).unwrap();
    while let Some(task) = step.newly_scheduled.pop() {
        step = scheduler
            .handle_completion(task.id, task.seq, TaskOutcome::success(data(json!({"dummy": 0}))))
            .unwrap();
    }
    assert!(scheduler.summary().is_completed);

    let step = scheduler.begin(Some(ids[2])).unwrap();
    assert_eq!(step.scheduled_ids(), vec![ids[2]]);
    let graph = scheduler.graph();
    assert_eq!(status(graph, ids[1]), TaskStatus::Completed);
    assert_eq!(status(graph, ids[3]), TaskStatus::Disabled);
    assert!(graph.task(ids[3]).unwrap().output.is_none());
}

#[test]
fn interrupted_tasks_are_recovered_on_begin() {
    let (builder, ids) = linear_chain(3, TaskKind::Task);
    let mut workflow = builder.build();
    {
        let start = workflow.graph.task_mut(ids[0]).unwrap();
        start.status = TaskStatus::Completed;
        start.output = Some(OutputHandle::Inline(data(json!({"dummy": 1}))));
    }
    workflow.graph.task_mut(ids[1]).unwrap().status = TaskStatus::Running;
    let mut scheduler = Scheduler::new(workflow.graph, SchedulerOptions::default());

    let step = scheduler.begin(None).unwrap();
    assert_eq!(step.scheduled_ids(), vec![ids[1]]);
}

#[test]
fn disk_backed_output_requires_a_project_dir() {
    let mut builder = WorkflowBuilder::new("disk");
    let start = builder.start();
    builder.then(start, NewTask::new("store", TaskKind::Task).store_output(true));
    let workflow = builder.build();

    let mut scheduler = Scheduler::new(workflow.graph.clone(), SchedulerOptions::default());
    assert!(matches!(scheduler.begin(None), Err(FlowError::ConfigError(_))));

    let options = SchedulerOptions {
        project_dir: Some(PathBuf::from("/tmp/flowdag-project")),
        resume_policy: ResumePolicy::Continue,
    };
    let mut scheduler = Scheduler::new(workflow.graph, options);
    let step = scheduler.begin(None).unwrap();
    assert_eq!(
        step.newly_scheduled[0].workdir,
        Some(PathBuf::from("/tmp/flowdag-project/task-2"))
    );
    assert!(step.newly_scheduled[0].store_output);
}

#[test]
fn seeding_input_updates_the_start_task() {
    let (builder, ids) = linear_chain(2, TaskKind::Task);
    let mut scheduler = scheduler_for(builder);

    scheduler.seed_input(data(json!({"dummy": 40}))).unwrap();
    let step = scheduler.begin(None).unwrap();

    assert_eq!(step.newly_scheduled[0].id, ids[1]);
    assert_eq!(step.newly_scheduled[0].input, data(json!({"dummy": 40})));
}

#[test]
fn core_runtime_translates_scheduler_steps_into_commands() {
    let (builder, ids) = linear_chain(2, TaskKind::Task);
    let mut core = CoreRuntime::new(scheduler_for(builder));

    let step = core.step(RuntimeEvent::Begin { from: None }).unwrap();
    assert!(step.keep_running);
    let dispatched = match &step.commands[..] {
        [CoreCommand::DispatchTasks(tasks)] => tasks.clone(),
        other => panic!("unexpected commands: {other:?}"),
    };
    assert_eq!(dispatched[0].id, ids[1]);

    let step = core
        .step(RuntimeEvent::Control(ControlCommand::Cancel))
        .unwrap();
    assert!(step.keep_running, "one dispatch still in flight");

    let step = core
        .step(RuntimeEvent::TaskCompleted {
            task: ids[1],
            seq: dispatched[0].seq,
            outcome: TaskOutcome::success(data(json!({"dummy": 2}))),
            window: None,
        })
        .unwrap();
    assert!(!step.keep_running);
    assert!(matches!(step.commands[..], [CoreCommand::RequestExit]));
    assert!(core.summary().is_completed);
}

#[test]
fn core_runtime_ignores_stepping_an_unknown_task() {
    let (builder, ids) = linear_chain(2, TaskKind::Task);
    let mut core = CoreRuntime::new(scheduler_for(builder));

    let step = core.step(RuntimeEvent::Begin { from: None }).unwrap();
    let seq = match &step.commands[..] {
        [CoreCommand::DispatchTasks(tasks)] => tasks[0].seq,
        other => panic!("unexpected commands: {other:?}"),
    };

    let step = core
        .step(RuntimeEvent::Control(ControlCommand::StepBreakpoint(999)))
        .unwrap();
    assert!(step.keep_running);
    assert!(step.commands.is_empty());
    assert_eq!(status(core.graph(), ids[1]), TaskStatus::Running);

    let step = core
        .step(RuntimeEvent::TaskCompleted {
            task: ids[1],
            seq,
            outcome: TaskOutcome::success(data(json!({"dummy": 2}))),
            window: None,
        })
        .unwrap();
    assert!(!step.keep_running);
    assert!(core.summary().is_completed);
}

#[test]
fn attempt_windows_replace_dispatch_timestamps() {
    let (builder, ids) = linear_chain(3, TaskKind::Task);
    let mut scheduler = scheduler_for(builder);

    let seq = scheduler.begin(None).unwrap().newly_scheduled[0].seq;
    let started = Utc::now() + TimeDelta::seconds(5);
    let window = AttemptWindow {
        started,
        finished: started + TimeDelta::milliseconds(250),
    };
    let step = scheduler
        .handle_timed_completion(
            ids[1],
            seq,
            TaskOutcome::success(data(json!({"dummy": 2}))),
            Some(window),
        )
        .unwrap();
    assert_eq!(step.scheduled_ids(), vec![ids[2]]);

    let task = scheduler.graph().task(ids[1]).unwrap();
    assert_eq!(task.started_at, Some(window.started));
    assert_eq!(task.finished_at, Some(window.finished));
    assert_eq!(task.runtime(), Some(Duration::from_millis(250)));
}
