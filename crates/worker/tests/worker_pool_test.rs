use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mockall::mock;

use chronoforge_core::models::{RunResult, SymbolOutcome, TaskExecutionRecord, TaskSpec};
use chronoforge_core::{
    Clock, MetricsCollector, SchedulerError, ShutdownSignal, TaskStatusListener, WorkerConfig,
};
use chronoforge_testing_utils::{
    ConcurrencyProbe, ListenerEvent, ManualClock, RecordingListener, TaskSpecBuilder, TestEnv,
    JAN_1_2024_MS,
};

const CLOCK_MS: i64 = JAN_1_2024_MS + 7_200_000;
use chronoforge_worker::{TaskRunner, WorkerPool};

mock! {
    pub Runner {}

    #[async_trait]
    impl TaskRunner for Runner {
        async fn run(&self, spec: Arc<TaskSpec>, shutdown: &ShutdownSignal) -> TaskExecutionRecord;
    }
}

fn ok_record(name: &str) -> TaskExecutionRecord {
    TaskExecutionRecord::from_outcomes(name, 0, 1, vec![SymbolOutcome::succeeded("AAPL", 1, 1)])
}

struct SlowRunner {
    delay: Duration,
    probe: Arc<ConcurrencyProbe>,
}

#[async_trait]
impl TaskRunner for SlowRunner {
    async fn run(&self, spec: Arc<TaskSpec>, _shutdown: &ShutdownSignal) -> TaskExecutionRecord {
        let _guard = self.probe.enter();
        tokio::time::sleep(self.delay).await;
        ok_record(&spec.name)
    }
}

struct PanicRunner;

#[async_trait]
impl TaskRunner for PanicRunner {
    async fn run(&self, spec: Arc<TaskSpec>, _shutdown: &ShutdownSignal) -> TaskExecutionRecord {
        panic!("runner exploded on {}", spec.name);
    }
}

fn pool_config(max_concurrent_tasks: usize) -> WorkerConfig {
    WorkerConfig {
        max_concurrent_tasks,
        queue_capacity: 16,
        shutdown_timeout_ms: 1_000,
    }
}

fn pool(
    max_concurrent_tasks: usize,
    runner: Arc<dyn TaskRunner>,
    listener: Arc<RecordingListener>,
    shutdown: ShutdownSignal,
) -> WorkerPool {
    WorkerPool::new(
        &pool_config(max_concurrent_tasks),
        runner,
        listener as Arc<dyn TaskStatusListener>,
        Arc::new(ManualClock::new(CLOCK_MS)) as Arc<dyn Clock>,
        shutdown,
        MetricsCollector::disabled(),
    )
}

fn slow_runner(delay_ms: u64) -> (Arc<SlowRunner>, Arc<ConcurrencyProbe>) {
    let probe = Arc::new(ConcurrencyProbe::default());
    let runner = Arc::new(SlowRunner {
        delay: Duration::from_millis(delay_ms),
        probe: Arc::clone(&probe),
    });
    (runner, probe)
}

fn spec(name: &str) -> Arc<TaskSpec> {
    Arc::new(TaskSpecBuilder::new(name).build())
}

#[tokio::test]
async fn test_dispatched_task_reports_start_and_completion() {
    let mut runner = MockRunner::new();
    runner
        .expect_run()
        .times(1)
        .returning(|spec, _| ok_record(&spec.name));

    let listener = Arc::new(RecordingListener::new());
    let pool = pool(2, Arc::new(runner), Arc::clone(&listener), ShutdownSignal::new());

    pool.dispatch(spec("daily")).await.unwrap();
    assert!(TestEnv::wait_for(|| async { listener.completed().len() == 1 }, Duration::from_secs(2)).await);

    let events = listener.events();
    assert_eq!(events[0], ListenerEvent::Started("daily".to_string()));
    assert!(matches!(&events[1], ListenerEvent::Completed(r) if r.result == RunResult::Succeeded));
    assert!(pool.running_tasks().await.is_empty());
}

#[tokio::test]
async fn test_rejected_start_skips_execution() {
    let mut runner = MockRunner::new();
    runner
        .expect_run()
        .withf(|spec, _| spec.name == "kept")
        .times(1)
        .returning(|spec, _| ok_record(&spec.name));

    let listener = Arc::new(RecordingListener::new());
    listener.reject("removed");
    let pool = pool(1, Arc::new(runner), Arc::clone(&listener), ShutdownSignal::new());

    pool.dispatch(spec("removed")).await.unwrap();
    pool.dispatch(spec("kept")).await.unwrap();

    assert!(TestEnv::wait_for(|| async { listener.completed().len() == 1 }, Duration::from_secs(2)).await);
    assert_eq!(listener.completed()[0].task_name, "kept");
}

#[tokio::test]
async fn test_concurrent_runs_never_exceed_pool_size() {
    let (runner, probe) = slow_runner(40);
    let listener = Arc::new(RecordingListener::new());
    let pool = pool(2, runner, Arc::clone(&listener), ShutdownSignal::new());

    for i in 0..6 {
        pool.dispatch(spec(&format!("task_{i}"))).await.unwrap();
    }
    assert!(TestEnv::wait_for(|| async { listener.completed().len() == 6 }, Duration::from_secs(5)).await);

    assert!(probe.peak() <= 2);
    assert!(probe.peak() >= 1);
    assert_eq!(pool.available_slots(), 2);
}

#[tokio::test]
async fn test_same_task_cannot_be_dispatched_twice() {
    let (runner, _) = slow_runner(200);
    let listener = Arc::new(RecordingListener::new());
    let pool = pool(2, runner, Arc::clone(&listener), ShutdownSignal::new());

    pool.dispatch(spec("t")).await.unwrap();
    let err = pool.dispatch(spec("t")).await.unwrap_err();
    assert_eq!(err, SchedulerError::TaskRunning { name: "t".to_string() });
}

#[tokio::test]
async fn test_shutdown_skips_queued_tasks_and_waits_for_running() {
    let (runner, _) = slow_runner(150);
    let listener = Arc::new(RecordingListener::new());
    let pool = pool(2, runner, Arc::clone(&listener), ShutdownSignal::new());

    for name in ["a", "b", "c", "d", "e"] {
        pool.dispatch(spec(name)).await.unwrap();
    }
    assert!(TestEnv::wait_for(|| async { pool.running_tasks().await.len() == 2 }, Duration::from_secs(2)).await);

    let report = pool.shutdown(Duration::from_secs(2)).await;

    assert_eq!(report.completed, vec!["a".to_string(), "b".to_string()]);
    assert!(report.abandoned.is_empty());
    assert_eq!(listener.completed().len(), 2);

    let mut skipped = listener.skipped();
    skipped.sort();
    assert_eq!(skipped, vec!["c", "d", "e"]);

    assert!(matches!(
        pool.dispatch(spec("f")).await,
        Err(SchedulerError::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_shutdown_timeout_abandons_running_tasks() {
    let (runner, _) = slow_runner(5_000);
    let listener = Arc::new(RecordingListener::new());
    let shutdown = ShutdownSignal::new();
    let pool = pool(1, runner, Arc::clone(&listener), shutdown.clone());

    pool.dispatch(spec("stuck")).await.unwrap();
    assert!(TestEnv::wait_for(|| async { pool.running_tasks().await.len() == 1 }, Duration::from_secs(2)).await);

    let report = pool.shutdown(Duration::from_millis(50)).await;

    assert_eq!(report.abandoned, vec!["stuck".to_string()]);
    assert!(report.completed.is_empty());
    assert!(shutdown.is_abandoned());
}

#[tokio::test]
async fn test_panicking_run_is_recorded_as_failed() {
    let listener = Arc::new(RecordingListener::new());
    let pool = pool(1, Arc::new(PanicRunner), Arc::clone(&listener), ShutdownSignal::new());

    pool.dispatch(spec("boom")).await.unwrap();
    assert!(TestEnv::wait_for(|| async { listener.completed().len() == 1 }, Duration::from_secs(2)).await);

    let record = &listener.completed()[0];
    assert_eq!(record.result, RunResult::Failed);
    assert!(record.error.is_some());
    assert_eq!(record.started_at_ms, CLOCK_MS);

    // 执行槽位已释放，后续任务照常运行
    pool.dispatch(spec("boom")).await.unwrap();
    assert!(TestEnv::wait_for(|| async { listener.completed().len() == 2 }, Duration::from_secs(2)).await);
}
