//! End-to-end scheduler behaviour over the in-memory store and a scripted
//! engine: reconcile, fire, monitor and context accumulation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};

use schellar::database::{InMemoryStore, RunStore, ScheduleStore, Stores};
use schellar::domain::{Schedule, ScheduleStatus, WorkflowContext, WorkflowStatus};
use schellar::engine::MockEngine;
use schellar::scheduler::{Scheduler, TriggerOutcome};

struct Fixture {
    store: InMemoryStore,
    engine: Arc<MockEngine>,
    scheduler: Scheduler,
}

fn fixture() -> Fixture {
    let store = InMemoryStore::new();
    let engine = Arc::new(MockEngine::new());
    let scheduler = Scheduler::new(
        &Stores::shared(store.clone()),
        engine.clone(),
        Duration::from_millis(50),
    );
    Fixture {
        store,
        engine,
        scheduler,
    }
}

fn context(value: Value) -> WorkflowContext {
    value.as_object().cloned().unwrap()
}

async fn add(store: &InMemoryStore, schedule: &Schedule) {
    ScheduleStore::insert(store, schedule).await.unwrap();
}

async fn schedule(store: &InMemoryStore, id: &str) -> Schedule {
    store.find_by_id(id).await.unwrap().unwrap()
}

fn daily() -> Schedule {
    let mut schedule = Schedule::new("daily", "wf1", "0 0 9 * * *");
    schedule.enabled = true;
    schedule.parallel_runs = false;
    schedule
}

#[tokio::test]
async fn test_fire_launches_and_records_run() {
    let f = fixture();
    let daily = daily();
    add(&f.store, &daily).await;

    let report = f.scheduler.reconcile().await.unwrap();
    assert_eq!(report.registered.len(), 1);

    f.engine.push_launch("abc");
    let outcome = f.scheduler.fire(&daily.id).await.unwrap();
    assert!(matches!(outcome, TriggerOutcome::Launched { ref workflow_id, .. } if workflow_id == "abc"));

    let runs = f.store.all_runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].workflow_id, "abc");
    assert_eq!(runs[0].status, WorkflowStatus::Running);
    assert_eq!(runs[0].schedule_id, daily.id);

    let stored = schedule(&f.store, &daily.id).await;
    assert_eq!(stored.status, ScheduleStatus::Workflow(WorkflowStatus::Running));
}

#[tokio::test]
async fn test_monitor_finishes_run() {
    let f = fixture();
    let daily = daily();
    add(&f.store, &daily).await;
    f.engine.push_launch("abc");
    f.scheduler.fire(&daily.id).await.unwrap();

    f.engine.set_run("abc", json!({"status": "RUNNING"}));
    let report = f.scheduler.check_runs().await.unwrap();
    assert_eq!(report.still_running, 1);
    assert!(f.store.all_runs()[0].finish_date.is_none());

    f.engine.set_run("abc", json!({"status": "COMPLETED", "output": {}}));
    let report = f.scheduler.check_runs().await.unwrap();
    assert_eq!(report.finished, 1);

    let run = &f.store.all_runs()[0];
    assert_eq!(run.status, WorkflowStatus::Completed);
    assert!(run.finish_date.is_some());
    assert_eq!(run.workflow_details.as_ref().unwrap()["status"], "COMPLETED");

    let stored = schedule(&f.store, &daily.id).await;
    assert_eq!(stored.status, ScheduleStatus::Workflow(WorkflowStatus::Completed));
    assert!(stored.workflow_context.is_empty());

    // Finished runs are no longer polled.
    let queries = f.engine.run_queries();
    f.scheduler.check_runs().await.unwrap();
    assert_eq!(f.engine.run_queries(), queries);
}

#[tokio::test]
async fn test_output_accumulates_into_next_launch() {
    let f = fixture();
    let mut daily = daily();
    daily.workflow_context = context(json!({"y": 2}));
    add(&f.store, &daily).await;

    f.engine.push_launch("first");
    f.scheduler.fire(&daily.id).await.unwrap();
    f.engine
        .set_run("first", json!({"status": "COMPLETED", "output": {"x": 1, "y": 9}}));
    f.scheduler.check_runs().await.unwrap();

    let stored = schedule(&f.store, &daily.id).await;
    assert_eq!(Value::Object(stored.workflow_context), json!({"y": 9, "x": 1}));

    f.engine.push_launch("second");
    f.scheduler.fire(&daily.id).await.unwrap();
    let launches = f.engine.launches();
    assert_eq!(launches.len(), 2);
    assert_eq!(Value::Object(launches[0].input.clone()), json!({"y": 2}));
    assert_eq!(Value::Object(launches[1].input.clone()), json!({"y": 9, "x": 1}));
}

#[tokio::test]
async fn test_failed_run_leaves_context() {
    let f = fixture();
    let mut daily = daily();
    daily.workflow_context = context(json!({"y": 2}));
    add(&f.store, &daily).await;

    f.engine.push_launch("abc");
    f.scheduler.fire(&daily.id).await.unwrap();
    f.engine
        .set_run("abc", json!({"status": "FAILED", "output": {"x": 1}}));
    f.scheduler.check_runs().await.unwrap();

    let stored = schedule(&f.store, &daily.id).await;
    assert_eq!(stored.status, ScheduleStatus::Workflow(WorkflowStatus::Failed));
    assert_eq!(Value::Object(stored.workflow_context), json!({"y": 2}));
}

#[tokio::test]
async fn test_parallel_runs_forbidden_until_finished() {
    let f = fixture();
    let daily = daily();
    add(&f.store, &daily).await;

    f.engine.push_launch("abc");
    f.scheduler.fire(&daily.id).await.unwrap();
    let before = schedule(&f.store, &daily.id).await;

    let outcome = f.scheduler.fire(&daily.id).await.unwrap();
    assert_eq!(outcome, TriggerOutcome::ConcurrentRunSkipped { outstanding: 1 });
    assert_eq!(f.store.all_runs().len(), 1);
    assert_eq!(f.engine.launches().len(), 1);
    assert_eq!(schedule(&f.store, &daily.id).await, before);

    f.engine.set_run("abc", json!({"status": "TERMINATED"}));
    f.scheduler.check_runs().await.unwrap();
    let outcome = f.scheduler.fire(&daily.id).await.unwrap();
    assert!(matches!(outcome, TriggerOutcome::Launched { .. }));
    assert_eq!(f.store.all_runs().len(), 2);
}

#[tokio::test]
async fn test_parallel_runs_allowed() {
    let f = fixture();
    let mut daily = daily();
    daily.parallel_runs = true;
    add(&f.store, &daily).await;

    for _ in 0..3 {
        let outcome = f.scheduler.fire(&daily.id).await.unwrap();
        assert!(matches!(outcome, TriggerOutcome::Launched { .. }));
    }
    let running = f
        .store
        .find_by_schedule(&daily.id, Some(&WorkflowStatus::Running))
        .await
        .unwrap();
    assert_eq!(running.len(), 3);
}

#[tokio::test]
async fn test_window_blocks_launch() {
    let f = fixture();
    let mut expired = daily();
    expired.to_date = Some(Utc::now() - chrono::Duration::minutes(1));
    let mut future = Schedule::new("later", "wf1", "0 0 9 * * *");
    future.from_date = Some(Utc::now() + chrono::Duration::days(1));
    add(&f.store, &expired).await;
    add(&f.store, &future).await;

    assert_eq!(
        f.scheduler.fire(&expired.id).await.unwrap(),
        TriggerOutcome::OutsideWindow
    );
    assert_eq!(
        f.scheduler.fire(&future.id).await.unwrap(),
        TriggerOutcome::OutsideWindow
    );
    assert!(f.store.all_runs().is_empty());
    assert!(f.engine.launches().is_empty());
}

#[tokio::test]
async fn test_one_failing_check_does_not_block_others() {
    let f = fixture();
    let mut a = Schedule::new("a", "wf1", "0 0 9 * * *");
    a.parallel_runs = true;
    let b = Schedule::new("b", "wf2", "0 0 9 * * *");
    add(&f.store, &a).await;
    add(&f.store, &b).await;

    f.engine.push_launch("run-a");
    f.engine.push_launch("run-b");
    f.scheduler.fire(&a.id).await.unwrap();
    f.scheduler.fire(&b.id).await.unwrap();

    f.engine.fail_run("run-a");
    f.engine.set_run("run-b", json!({"status": "COMPLETED", "output": {"ok": true}}));
    let report = f.scheduler.check_runs().await.unwrap();
    assert_eq!(report.checked, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.finished, 1);

    let b_runs = f.store.find_by_schedule(&b.id, None).await.unwrap();
    assert_eq!(b_runs[0].status, WorkflowStatus::Completed);
    let a_runs = f.store.find_by_schedule(&a.id, None).await.unwrap();
    assert_eq!(a_runs[0].status, WorkflowStatus::Running);
}

#[tokio::test]
async fn test_launch_failure_records_nothing() {
    let f = fixture();
    let daily = daily();
    add(&f.store, &daily).await;

    f.engine.fail_next_launch();
    assert!(f.scheduler.fire(&daily.id).await.is_err());
    assert!(f.store.all_runs().is_empty());
    assert_eq!(schedule(&f.store, &daily.id).await.status, ScheduleStatus::Idle);

    // The next fire catches up.
    assert!(matches!(
        f.scheduler.fire(&daily.id).await.unwrap(),
        TriggerOutcome::Launched { .. }
    ));
}

#[tokio::test]
async fn test_timer_fires_and_monitor_completes() {
    let f = fixture();
    let mut every_second = Schedule::new("tick", "wf1", "* * * * * *");
    every_second.parallel_runs = true;
    add(&f.store, &every_second).await;

    f.engine.push_launch("live");
    f.engine
        .set_run("live", json!({"status": "COMPLETED", "output": {"n": 1}}));
    f.scheduler.start().await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let stored = schedule(&f.store, &every_second.id).await;
        if stored.workflow_context.get("n") == Some(&json!(1)) {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timer never fired or monitor never finished the run"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    f.scheduler.shutdown().await;
    assert!(f.scheduler.registry().is_empty());
}

#[tokio::test]
async fn test_deleted_schedule_stops_firing() {
    let f = fixture();
    let daily = daily();
    add(&f.store, &daily).await;
    f.scheduler.reconcile().await.unwrap();

    f.store.remove(&daily.id).await.unwrap();
    let report = f.scheduler.reconcile().await.unwrap();
    assert_eq!(report.unregistered.len(), 1);
    assert!(f.scheduler.registry().is_empty());

    assert_eq!(
        f.scheduler.fire(&daily.id).await.unwrap(),
        TriggerOutcome::ScheduleMissing
    );
}
