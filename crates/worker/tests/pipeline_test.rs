use std::sync::Arc;
use std::time::Duration;

use chronoforge_core::models::{
    MsRange, PluginSpec, RunResult, SymbolStatus, TaskSpec, Timeframe, DAY_MS, HOUR_MS,
};
use chronoforge_core::{
    Clock, MetricsCollector, PipelineConfig, PluginRegistry, RetryConfig, ShutdownSignal,
};
use chronoforge_testing_utils::{
    register_test_plugins, FetchBehavior, ManualClock, MemoryStorage, ScriptedDataSource,
    TaskSpecBuilder, JAN_1_2024_MS,
};
use chronoforge_worker::{FetchPipeline, TaskRunner};

const SUB: Option<&str> = Some("scripted");

struct Harness {
    pipeline: Arc<FetchPipeline>,
    source: Arc<ScriptedDataSource>,
    storage: Arc<MemoryStorage>,
    clock: Arc<ManualClock>,
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        base_interval_ms: 1,
        max_interval_ms: 2,
        backoff_multiplier: 2.0,
        jitter_factor: 0.0,
    }
}

async fn harness_with(
    source: ScriptedDataSource,
    storage: MemoryStorage,
    config: PipelineConfig,
) -> Harness {
    let source = Arc::new(source);
    let storage = Arc::new(storage);
    let clock = Arc::new(ManualClock::new(JAN_1_2024_MS + 10 * DAY_MS + 30_000));

    let registry = PluginRegistry::new();
    register_test_plugins(&registry, Arc::clone(&source), Arc::clone(&storage))
        .await
        .unwrap();

    let pipeline = FetchPipeline::new(
        registry,
        config,
        fast_retry(),
        Arc::clone(&clock) as Arc<dyn Clock>,
        MetricsCollector::disabled(),
    );
    Harness {
        pipeline: Arc::new(pipeline),
        source,
        storage,
        clock,
    }
}

async fn harness() -> Harness {
    harness_with(
        ScriptedDataSource::new("scripted"),
        MemoryStorage::new(),
        PipelineConfig::default(),
    )
    .await
}

async fn run(harness: &Harness, spec: TaskSpec) -> chronoforge_core::models::TaskExecutionRecord {
    harness
        .pipeline
        .run(Arc::new(spec), &ShutdownSignal::new())
        .await
}

#[tokio::test]
async fn test_second_run_fetches_only_new_gap() {
    let h = harness().await;
    let spec = TaskSpecBuilder::new("daily_bars").build();
    let first_now = h.clock.now_ms();

    let record = run(&h, spec.clone()).await;
    assert_eq!(record.result, RunResult::Succeeded);
    let outcome = record.outcome_for("AAPL").unwrap();
    assert_eq!(outcome.chunks_written, 1);
    assert_eq!(outcome.rows_written, 11);
    assert_eq!(
        h.storage.coverage("AAPL_1d", SUB).ranges(),
        &[MsRange::new(JAN_1_2024_MS, first_now).unwrap()]
    );

    // 次日再次运行，只拉取上次运行之后的新数据
    h.clock.advance(Duration::from_millis(DAY_MS as u64));
    let second_now = h.clock.now_ms();
    let record = run(&h, spec).await;
    assert_eq!(record.result, RunResult::Succeeded);

    let calls = h.source.calls_for("AAPL");
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].start_ms, first_now);
    assert_eq!(calls[1].end_ms, Some(second_now));
    assert_eq!(h.storage.row_count("AAPL_1d", SUB), 12);
}

#[tokio::test]
async fn test_fully_covered_range_makes_no_calls() {
    let h = harness().await;
    let spec = TaskSpecBuilder::new("closed")
        .with_range(JAN_1_2024_MS, Some(JAN_1_2024_MS + 5 * DAY_MS))
        .build();

    run(&h, spec.clone()).await;
    let record = run(&h, spec).await;

    assert_eq!(record.result, RunResult::Succeeded);
    assert_eq!(h.source.calls().len(), 1);
    assert_eq!(record.outcome_for("AAPL").unwrap().chunks_written, 0);
}

#[tokio::test]
async fn test_one_bad_symbol_partially_fails_task() {
    let h = harness().await;
    h.source.set_behavior("BAD", FetchBehavior::Permanent);
    let spec = TaskSpecBuilder::new("mixed")
        .with_symbols(&["AAPL", "BAD", "MSFT"])
        .build();

    let record = run(&h, spec).await;

    assert_eq!(record.result, RunResult::PartiallyFailed);
    // 结果顺序与任务中的标的顺序一致
    let symbols: Vec<&str> = record.symbols.iter().map(|o| o.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["AAPL", "BAD", "MSFT"]);

    let bad = record.outcome_for("BAD").unwrap();
    assert_eq!(bad.status, SymbolStatus::FetchFailed);
    assert!(bad.error.is_some());
    // 永久性错误不重试
    assert_eq!(h.source.calls_for("BAD").len(), 1);

    assert_eq!(record.outcome_for("MSFT").unwrap().status, SymbolStatus::Succeeded);
    assert!(h.storage.coverage("BAD_1d", SUB).is_empty());
}

#[tokio::test]
async fn test_all_symbols_failing_fails_task() {
    let h = harness().await;
    h.source.set_behavior("AAPL", FetchBehavior::Permanent);

    let record = run(&h, TaskSpecBuilder::new("t").build()).await;
    assert_eq!(record.result, RunResult::Failed);
}

#[tokio::test]
async fn test_transient_errors_retried_with_backoff() {
    let h = harness().await;
    h.source.set_behavior("AAPL", FetchBehavior::TransientFailures(2));
    h.source.set_behavior("MSFT", FetchBehavior::AlwaysTransient);
    let spec = TaskSpecBuilder::new("flaky")
        .with_symbols(&["AAPL", "MSFT"])
        .build();

    let record = run(&h, spec).await;

    assert_eq!(record.result, RunResult::PartiallyFailed);
    assert_eq!(record.outcome_for("AAPL").unwrap().status, SymbolStatus::Succeeded);
    assert_eq!(h.source.calls_for("AAPL").len(), 3);

    assert_eq!(record.outcome_for("MSFT").unwrap().status, SymbolStatus::FetchFailed);
    assert_eq!(h.source.calls_for("MSFT").len(), 3);
}

#[tokio::test]
async fn test_validation_failures_are_not_retried() {
    let h = harness().await;
    h.source.set_behavior("NAN", FetchBehavior::InvalidValues);
    h.source.set_behavior("DESC", FetchBehavior::Unsorted);
    let spec = TaskSpecBuilder::new("dirty")
        .with_symbols(&["NAN", "DESC"])
        .build();

    let record = run(&h, spec).await;

    assert_eq!(record.result, RunResult::Failed);
    for symbol in ["NAN", "DESC"] {
        assert_eq!(
            record.outcome_for(symbol).unwrap().status,
            SymbolStatus::ValidationFailed
        );
        assert_eq!(h.source.calls_for(symbol).len(), 1);
    }
    assert!(h.storage.save_log().is_empty());
}

#[tokio::test]
async fn test_chunks_fetched_and_written_in_time_order() {
    let config = PipelineConfig {
        page_size: 3,
        ..PipelineConfig::default()
    };
    let h = harness_with(ScriptedDataSource::new("scripted"), MemoryStorage::new(), config).await;
    let spec = TaskSpecBuilder::new("paged")
        .with_symbols(&["AAPL", "MSFT"])
        .with_range(JAN_1_2024_MS, Some(JAN_1_2024_MS + 10 * DAY_MS))
        .build();

    let record = run(&h, spec).await;
    assert_eq!(record.result, RunResult::Succeeded);
    assert_eq!(record.outcome_for("AAPL").unwrap().chunks_written, 4);

    let starts: Vec<i64> = h.source.calls_for("AAPL").iter().map(|c| c.start_ms).collect();
    assert_eq!(
        starts,
        vec![
            JAN_1_2024_MS,
            JAN_1_2024_MS + 3 * DAY_MS,
            JAN_1_2024_MS + 6 * DAY_MS,
            JAN_1_2024_MS + 9 * DAY_MS
        ]
    );

    let written: Vec<MsRange> = h
        .storage
        .save_log()
        .into_iter()
        .filter(|(id, _)| id == "AAPL_1d")
        .map(|(_, range)| range)
        .collect();
    assert_eq!(written.len(), 4);
    assert!(written.windows(2).all(|w| w[0].end() <= w[1].start()));
    assert_eq!(h.storage.row_count("AAPL_1d", SUB), 10);
}

#[tokio::test]
async fn test_empty_segment_still_advances_coverage() {
    let h = harness().await;
    let range = MsRange::new(JAN_1_2024_MS + HOUR_MS, JAN_1_2024_MS + 2 * HOUR_MS).unwrap();
    let spec = TaskSpecBuilder::new("quiet")
        .with_range(range.start(), Some(range.end()))
        .build();

    let record = run(&h, spec.clone()).await;
    let outcome = record.outcome_for("AAPL").unwrap();
    assert_eq!(outcome.status, SymbolStatus::Succeeded);
    assert_eq!(outcome.chunks_written, 1);
    assert_eq!(outcome.rows_written, 0);
    assert!(h.storage.coverage("AAPL_1d", SUB).covers(&range));

    run(&h, spec).await;
    assert_eq!(h.source.calls().len(), 1);
}

#[tokio::test]
async fn test_storage_failure_retried_once() {
    let h = harness().await;
    h.storage.fail_next_saves(1);

    let record = run(&h, TaskSpecBuilder::new("t").build()).await;

    assert_eq!(record.result, RunResult::Succeeded);
    assert_eq!(h.storage.save_attempts(), 2);
}

#[tokio::test]
async fn test_storage_failure_leaves_gap_for_next_run() {
    let h = harness().await;
    h.storage.fail_series("AAPL_1d");
    let spec = TaskSpecBuilder::new("t").build();

    let record = run(&h, spec.clone()).await;
    let outcome = record.outcome_for("AAPL").unwrap();
    assert_eq!(record.result, RunResult::Failed);
    assert_eq!(outcome.status, SymbolStatus::StorageFailed);
    assert_eq!(outcome.chunks_written, 0);
    assert_eq!(h.storage.save_attempts(), 2);
    assert!(h.storage.coverage("AAPL_1d", SUB).is_empty());

    // 存储恢复后，下一次运行重新检测到同一缺口
    h.storage.heal_series("AAPL_1d");
    let record = run(&h, spec).await;
    assert_eq!(record.result, RunResult::Succeeded);
    let calls = h.source.calls_for("AAPL");
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].start_ms, calls[1].start_ms);
}

#[tokio::test]
async fn test_panicking_fetch_fails_only_that_symbol() {
    let h = harness().await;
    h.source.set_behavior("BOOM", FetchBehavior::Panic);
    let spec = Arc::new(
        TaskSpecBuilder::new("mixed")
            .with_symbols(&["AAPL", "BOOM", "MSFT"])
            .build(),
    );

    // 与工作池一样在独立任务中运行
    let pipeline = Arc::clone(&h.pipeline);
    let record = tokio::spawn(async move { pipeline.run(spec, &ShutdownSignal::new()).await })
        .await
        .unwrap();

    assert_eq!(record.result, RunResult::PartiallyFailed);
    let boom = record.outcome_for("BOOM").unwrap();
    assert_eq!(boom.status, SymbolStatus::FetchFailed);
    assert!(boom.error.as_deref().unwrap().contains("scripted panic for BOOM"));

    assert_eq!(record.outcome_for("AAPL").unwrap().status, SymbolStatus::Succeeded);
    assert_eq!(record.outcome_for("MSFT").unwrap().status, SymbolStatus::Succeeded);
    assert_eq!(h.storage.row_count("AAPL_1d", SUB), 11);
    assert_eq!(h.storage.row_count("MSFT_1d", SUB), 11);
    assert_eq!(h.storage.row_count("BOOM_1d", SUB), 0);
}

#[tokio::test]
async fn test_panicking_save_fails_only_that_symbol() {
    let h = harness().await;
    h.storage.panic_on_save("AAPL_1d");
    let spec = TaskSpecBuilder::new("t")
        .with_symbols(&["AAPL", "MSFT"])
        .build();

    let record = run(&h, spec).await;

    assert_eq!(record.result, RunResult::PartiallyFailed);
    let aapl = record.outcome_for("AAPL").unwrap();
    assert_eq!(aapl.status, SymbolStatus::StorageFailed);
    assert!(aapl.error.as_deref().unwrap().contains("save panicked"));
    assert!(h.storage.coverage("AAPL_1d", SUB).is_empty());
    assert_eq!(h.storage.row_count("MSFT_1d", SUB), 11);
}

#[tokio::test]
async fn test_unknown_plugin_fails_run_without_fetching() {
    let h = harness().await;
    let spec = TaskSpecBuilder::new("orphan")
        .with_storage(PluginSpec::new("nowhere"))
        .build();

    let record = run(&h, spec).await;

    assert_eq!(record.result, RunResult::Failed);
    assert!(record.symbols.is_empty());
    assert!(record.error.unwrap().contains("nowhere"));
    assert!(h.source.calls().is_empty());
}

#[tokio::test]
async fn test_draining_skips_remaining_chunks() {
    let h = harness().await;
    let shutdown = ShutdownSignal::new();
    shutdown.begin_drain();

    let record = h
        .pipeline
        .run(Arc::new(TaskSpecBuilder::new("late").build()), &shutdown)
        .await;

    assert_eq!(record.result, RunResult::Failed);
    assert_eq!(record.outcome_for("AAPL").unwrap().status, SymbolStatus::Skipped);
    assert!(h.source.calls().is_empty());
}

#[tokio::test]
async fn test_symbol_fan_out_is_bounded() {
    let config = PipelineConfig {
        symbol_fan_out: 2,
        ..PipelineConfig::default()
    };
    let source = ScriptedDataSource::new("scripted").with_delay(Duration::from_millis(30));
    let h = harness_with(source, MemoryStorage::new(), config).await;
    let spec = TaskSpecBuilder::new("wide")
        .with_symbols(&["A", "B", "C", "D", "E", "F"])
        .build();

    let record = run(&h, spec).await;

    assert_eq!(record.result, RunResult::Succeeded);
    assert_eq!(h.source.calls().len(), 6);
    assert!(h.source.peak_concurrent_fetches() <= 2);
    assert!(h.source.peak_concurrent_fetches() >= 1);
}

#[tokio::test]
async fn test_tasks_sharing_storage_never_overlap_saves() {
    let config = PipelineConfig {
        page_size: 2,
        ..PipelineConfig::default()
    };
    let storage = MemoryStorage::new().with_save_delay(Duration::from_millis(5));
    let h = harness_with(ScriptedDataSource::new("scripted"), storage, config).await;

    let range = Some(JAN_1_2024_MS + 8 * DAY_MS);
    let a = TaskSpecBuilder::new("a")
        .with_symbols(&["AAPL", "MSFT"])
        .with_range(JAN_1_2024_MS, range)
        .build();
    let b = TaskSpecBuilder::new("b")
        .with_symbols(&["GOOG", "AMZN"])
        .with_range(JAN_1_2024_MS, range)
        .build();

    let (ra, rb) = tokio::join!(run(&h, a), run(&h, b));

    assert_eq!(ra.result, RunResult::Succeeded);
    assert_eq!(rb.result, RunResult::Succeeded);
    assert_eq!(h.storage.save_log().len(), 16);
    assert_eq!(h.storage.peak_concurrent_saves(), 1);
}

#[tokio::test]
async fn test_sub_namespace_defaults_to_data_source_name() {
    let h = harness().await;
    run(&h, TaskSpecBuilder::new("default_sub").build()).await;
    run(&h, TaskSpecBuilder::new("custom_sub").with_sub("archive").build()).await;

    assert_eq!(h.storage.row_count("AAPL_1d", SUB), 11);
    assert_eq!(h.storage.row_count("AAPL_1d", Some("archive")), 11);
    // 不同命名空间各自维护覆盖范围
    assert_eq!(h.source.calls().len(), 2);
}

#[tokio::test]
async fn test_hourly_timeframe_series_id() {
    let h = harness().await;
    let spec = TaskSpecBuilder::new("hourly")
        .with_timeframe(Timeframe::H1)
        .with_range(JAN_1_2024_MS, Some(JAN_1_2024_MS + DAY_MS))
        .build();

    run(&h, spec).await;
    assert_eq!(h.storage.row_count("AAPL_1h", SUB), 24);
}
