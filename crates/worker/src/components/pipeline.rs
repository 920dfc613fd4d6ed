use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, info_span, Instrument};

use chronoforge_core::models::{
    series_id, DataSegment, MsRange, Row, SymbolOutcome, SymbolStatus, TaskExecutionRecord, TaskSpec,
};
use chronoforge_core::{
    Clock, DataSource, MetricsCollector, PipelineConfig, PluginRegistry, RetryConfig, SchedulerError,
    SchedulerResult, ShutdownSignal, StorageHandle, StructuredLogger,
};

use super::writer::{SegmentWriter, SymbolWriteReport, WriteJob};
use crate::gap_detector::GapDetector;
use crate::retry::RetryPolicy;

/// 执行一次任务运行
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// 运行任务并返回执行记录；运行中的错误都汇总在记录里，不向外抛出
    async fn run(&self, spec: Arc<TaskSpec>, shutdown: &ShutdownSignal) -> TaskExecutionRecord;
}

/// 拉取阶段对单个标的的结论
#[derive(Debug)]
enum FetchStage {
    Completed,
    Failed(SymbolStatus, String),
    /// 写入器已判定该标的失败
    StoppedByWriter,
}

/// 拉取 → 校验 → 写入 管道
///
/// 标的之间按 `symbol_fan_out` 并发拉取；同一标的的分页严格按时间顺序串行拉取，
/// 数据段经有界队列交给串行写入器，保证同一标的按时间递增写入。
pub struct FetchPipeline {
    registry: PluginRegistry,
    config: PipelineConfig,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    metrics: MetricsCollector,
}

impl FetchPipeline {
    pub fn new(
        registry: PluginRegistry,
        config: PipelineConfig,
        retry: RetryConfig,
        clock: Arc<dyn Clock>,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            registry,
            config,
            retry: RetryPolicy::new(retry),
            clock,
            metrics,
        }
    }

    async fn resolve(&self, spec: &TaskSpec) -> SchedulerResult<(Arc<dyn DataSource>, StorageHandle)> {
        let source = self.registry.data_source(&spec.data_source).await?;
        let storage = self.registry.storage(&spec.storage).await?;
        Ok((source, storage))
    }

    async fn execute(&self, spec: Arc<TaskSpec>, shutdown: &ShutdownSignal) -> TaskExecutionRecord {
        let started_at_ms = self.clock.now_ms();
        let start = Instant::now();

        let (source, storage) = match self.resolve(&spec).await {
            Ok(plugins) => plugins,
            Err(e) => {
                return TaskExecutionRecord::failed(spec.name.as_str(), started_at_ms, format!("插件解析失败: {e}"))
                    .with_duration(start.elapsed().as_millis() as u64);
            }
        };

        let writer = SegmentWriter::new(
            spec.name.as_str(),
            storage.clone(),
            spec.storage_sub(),
            self.config.write_timeout(),
            shutdown.clone(),
            self.metrics.clone(),
        );
        let (tx, writer_handle) = writer.spawn(self.config.writer_queue_capacity);

        let fetches: Vec<_> = spec
            .symbols
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, symbol)| {
                let tx = tx.clone();
                let spec = Arc::clone(&spec);
                let source = Arc::clone(&source);
                let storage = storage.clone();
                let span = info_span!("symbol", symbol = %symbol);
                async move {
                    let fetch = self.fetch_symbol(
                        &spec,
                        source.as_ref(),
                        &storage,
                        &symbol,
                        started_at_ms,
                        tx,
                        shutdown,
                    );
                    let stage = AssertUnwindSafe(fetch).catch_unwind().await.unwrap_or_else(|payload| {
                        let error = format!("插件调用异常: {}", panic_message(payload.as_ref()));
                        self.metrics.record_chunk_failure();
                        StructuredLogger::log_chunk_failed(&spec.name, &symbol, "-", &error);
                        FetchStage::Failed(SymbolStatus::FetchFailed, error)
                    });
                    (index, stage)
                }
                .instrument(span)
            })
            .collect();

        let fetch_results: Vec<(usize, FetchStage)> = stream::iter(fetches)
            .buffer_unordered(self.config.symbol_fan_out.max(1))
            .collect()
            .await;
        drop(tx);

        let mut write_reports = match writer_handle.await {
            Ok(reports) => reports,
            Err(e) => {
                return TaskExecutionRecord::failed(spec.name.as_str(), started_at_ms, format!("写入器异常退出: {e}"))
                    .with_duration(start.elapsed().as_millis() as u64);
            }
        };

        let mut stages: HashMap<usize, FetchStage> = fetch_results.into_iter().collect();
        let outcomes = spec
            .symbols
            .iter()
            .enumerate()
            .map(|(index, symbol)| {
                let stage = stages.remove(&index).unwrap_or(FetchStage::Completed);
                let report = write_reports.remove(symbol).unwrap_or_default();
                symbol_outcome(symbol, stage, report)
            })
            .collect();

        TaskExecutionRecord::from_outcomes(
            spec.name.as_str(),
            started_at_ms,
            start.elapsed().as_millis() as u64,
            outcomes,
        )
    }

    #[allow(clippy::too_many_arguments)]
    async fn fetch_symbol(
        &self,
        spec: &TaskSpec,
        source: &dyn DataSource,
        storage: &StorageHandle,
        symbol: &str,
        now_ms: i64,
        tx: mpsc::Sender<WriteJob>,
        shutdown: &ShutdownSignal,
    ) -> FetchStage {
        let id = series_id(symbol, spec.timeframe);
        let coverage = match timeout(
            self.config.write_timeout(),
            storage.storage.exists(&id, Some(spec.storage_sub())),
        )
        .await
        {
            Ok(Ok(coverage)) => coverage,
            Ok(Err(e)) => return FetchStage::Failed(SymbolStatus::StorageFailed, format!("读取覆盖范围失败: {e}")),
            Err(_) => return FetchStage::Failed(SymbolStatus::StorageFailed, "读取覆盖范围超时".to_string()),
        };

        let Some(request) = spec.time_range.resolve(now_ms) else {
            debug!(symbol = symbol, "请求区间为空");
            return FetchStage::Completed;
        };
        let chunks = GapDetector::new(self.config.page_size).plan(&request, &coverage, spec.timeframe);
        debug!(symbol = symbol, series.id = %id, chunks = chunks.len(), "缺口检测完成");

        let stop = Arc::new(AtomicBool::new(false));
        for chunk in chunks {
            if shutdown.is_draining() {
                return FetchStage::Failed(SymbolStatus::Skipped, "scheduler stopping".to_string());
            }
            if stop.load(Ordering::SeqCst) {
                return FetchStage::StoppedByWriter;
            }

            let rows = match self.fetch_chunk(source, symbol, spec, chunk).await {
                Ok(rows) => rows,
                Err((status, error)) => {
                    self.metrics.record_chunk_failure();
                    StructuredLogger::log_chunk_failed(&spec.name, symbol, &chunk.to_string(), &error);
                    return FetchStage::Failed(status, error);
                }
            };

            let job = WriteJob {
                segment: DataSegment::new(symbol, spec.timeframe, chunk, rows),
                stop: Arc::clone(&stop),
            };
            if tx.send(job).await.is_err() {
                return FetchStage::Failed(SymbolStatus::StorageFailed, "写入器已关闭".to_string());
            }
        }
        FetchStage::Completed
    }

    async fn fetch_chunk(
        &self,
        source: &dyn DataSource,
        symbol: &str,
        spec: &TaskSpec,
        chunk: MsRange,
    ) -> Result<Vec<Row>, (SymbolStatus, String)> {
        let rows = self
            .retry
            .run(
                self.config.fetch_timeout(),
                || source.fetch(symbol, spec.timeframe, chunk.start(), Some(chunk.end())),
                |_, _| self.metrics.record_fetch_retry(),
            )
            .await
            .map_err(|e| match e {
                SchedulerError::Validation(_) => (SymbolStatus::ValidationFailed, e.to_string()),
                other => (SymbolStatus::FetchFailed, other.to_string()),
            })?;

        check_rows(&rows, &chunk)
            .and_then(|()| {
                panic::catch_unwind(AssertUnwindSafe(|| source.validate_data(&rows))).unwrap_or_else(
                    |payload| Err(format!("validate_data panicked: {}", panic_message(payload.as_ref()))),
                )
            })
            .map_err(|reason| (SymbolStatus::ValidationFailed, reason))?;
        Ok(rows)
    }
}

#[async_trait]
impl TaskRunner for FetchPipeline {
    async fn run(&self, spec: Arc<TaskSpec>, shutdown: &ShutdownSignal) -> TaskExecutionRecord {
        let span = info_span!("task_run", task.name = %spec.name, task.symbols = spec.symbols.len());
        async move {
            info!("开始执行任务");
            self.execute(spec, shutdown).await
        }
        .instrument(span)
        .await
    }
}

/// 行必须严格按时间递增、无重复，并全部落在分页区间内
pub fn check_rows(rows: &[Row], chunk: &MsRange) -> Result<(), String> {
    if let Some(row) = rows.iter().find(|r| !chunk.contains(r.time)) {
        return Err(format!("row at {} outside chunk {}", row.time, chunk));
    }
    if let Some(pair) = rows.windows(2).find(|w| w[0].time >= w[1].time) {
        return Err(format!(
            "rows not strictly ascending: {} then {}",
            pair[0].time, pair[1].time
        ));
    }
    Ok(())
}

/// 从 panic 负载中取出可读的消息
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn symbol_outcome(symbol: &str, stage: FetchStage, report: SymbolWriteReport) -> SymbolOutcome {
    // 写入失败总是早于拉取端观察到的失败
    let failure = match stage {
        FetchStage::Failed(status, error) => report.failure.or(Some((status, error))),
        FetchStage::Completed | FetchStage::StoppedByWriter => report.failure,
    };
    match failure {
        None => SymbolOutcome::succeeded(symbol, report.chunks_written, report.rows_written),
        Some((status, error)) => SymbolOutcome {
            symbol: symbol.to_string(),
            status,
            chunks_written: report.chunks_written,
            rows_written: report.rows_written,
            error: Some(error),
        },
    }
}
