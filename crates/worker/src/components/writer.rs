use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use chronoforge_core::models::{DataSegment, SymbolStatus};
use chronoforge_core::{
    MetricsCollector, SchedulerError, SchedulerResult, ShutdownSignal, StorageHandle, StructuredLogger,
};

use super::pipeline::panic_message;

/// 拉取阶段交给写入器的一段数据
#[derive(Debug)]
pub struct WriteJob {
    pub segment: DataSegment,
    /// 写入失败后置位，拉取端据此停止该标的的后续分页
    pub stop: Arc<AtomicBool>,
}

/// 单个标的的写入汇总
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolWriteReport {
    pub chunks_written: usize,
    pub rows_written: usize,
    pub failure: Option<(SymbolStatus, String)>,
}

/// 串行写入器
///
/// 一次运行对应一个写入器，经有界队列接收数据段，按到达顺序逐个写入。
/// 每次 save 都持有存储实例的独占写锁，因此多个任务指向同一存储实例时写入交错而不重叠。
/// 写入失败重试一次，再失败则该标的记为 StorageFailed，其后续数据段全部丢弃。
pub struct SegmentWriter {
    task_name: String,
    storage: StorageHandle,
    sub: String,
    write_timeout: Duration,
    shutdown: ShutdownSignal,
    metrics: MetricsCollector,
}

impl SegmentWriter {
    pub fn new(
        task_name: impl Into<String>,
        storage: StorageHandle,
        sub: impl Into<String>,
        write_timeout: Duration,
        shutdown: ShutdownSignal,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            task_name: task_name.into(),
            storage,
            sub: sub.into(),
            write_timeout,
            shutdown,
            metrics,
        }
    }

    /// 启动写入循环；所有发送端释放后循环结束并返回各标的的写入汇总
    pub fn spawn(
        self,
        queue_capacity: usize,
    ) -> (mpsc::Sender<WriteJob>, JoinHandle<HashMap<String, SymbolWriteReport>>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let handle = tokio::spawn(self.run(rx));
        (tx, handle)
    }

    async fn run(self, mut rx: mpsc::Receiver<WriteJob>) -> HashMap<String, SymbolWriteReport> {
        let mut reports: HashMap<String, SymbolWriteReport> = HashMap::new();

        while let Some(job) = rx.recv().await {
            let report = reports.entry(job.segment.symbol.clone()).or_default();
            if report.failure.is_some() {
                debug!(task.name = %self.task_name, symbol = %job.segment.symbol, "标的已写入失败，丢弃后续数据段");
                continue;
            }

            if self.shutdown.is_abandoned() {
                job.stop.store(true, Ordering::SeqCst);
                report.failure = Some((SymbolStatus::Skipped, "scheduler stopped before write".to_string()));
                continue;
            }

            let chunk = job.segment.range.to_string();
            match self.write_with_retry(&job.segment).await {
                Ok(duration_ms) => {
                    report.chunks_written += 1;
                    report.rows_written += job.segment.rows.len();
                    self.metrics.record_rows_written(job.segment.rows.len());
                    StructuredLogger::log_segment_written(
                        &job.segment.series_id(),
                        &chunk,
                        job.segment.rows.len(),
                        duration_ms,
                    );
                }
                Err(e) => {
                    job.stop.store(true, Ordering::SeqCst);
                    self.metrics.record_chunk_failure();
                    StructuredLogger::log_chunk_failed(&self.task_name, &job.segment.symbol, &chunk, &e.to_string());
                    report.failure = Some((SymbolStatus::StorageFailed, e.to_string()));
                }
            }
        }
        reports
    }

    async fn write_with_retry(&self, segment: &DataSegment) -> SchedulerResult<u64> {
        match self.write_once(segment).await {
            Ok(ms) => Ok(ms),
            Err(first) => {
                warn!(
                    task.name = %self.task_name,
                    series.id = %segment.series_id(),
                    error = %first,
                    "Segment write failed, retrying once"
                );
                self.write_once(segment).await
            }
        }
    }

    async fn write_once(&self, segment: &DataSegment) -> SchedulerResult<u64> {
        let start = Instant::now();
        let id = segment.series_id();
        let _guard = self.storage.write_lock.lock().await;

        let save = AssertUnwindSafe(self.storage.storage.save(&id, segment, Some(&self.sub))).catch_unwind();
        match timeout(self.write_timeout, save).await {
            Ok(Ok(Ok(()))) => Ok(start.elapsed().as_millis() as u64),
            Ok(Ok(Err(SchedulerError::Storage(msg)))) => Err(SchedulerError::Storage(msg)),
            Ok(Ok(Err(other))) => Err(SchedulerError::Storage(other.to_string())),
            Ok(Err(payload)) => Err(SchedulerError::Storage(format!(
                "save panicked: {}",
                panic_message(payload.as_ref())
            ))),
            Err(_) => Err(SchedulerError::Storage(format!(
                "write timed out after {}ms",
                self.write_timeout.as_millis()
            ))),
        }
    }
}
