//! Metrics collector
//!
//! 只负责记录指标，不安装任何 exporter；由嵌入方决定如何导出。

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};

use crate::models::RunResult;

#[derive(Clone)]
pub struct MetricsCollector {
    enabled: bool,
    task_skips_total: Counter,
    fetch_retries_total: Counter,
    chunk_failures_total: Counter,
    rows_written_total: Counter,
    task_run_duration: Histogram,
    running_tasks: Gauge,
}

impl MetricsCollector {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            task_skips_total: counter!("chronoforge_task_skips_total"),
            fetch_retries_total: counter!("chronoforge_fetch_retries_total"),
            chunk_failures_total: counter!("chronoforge_chunk_failures_total"),
            rows_written_total: counter!("chronoforge_rows_written_total"),
            task_run_duration: histogram!("chronoforge_task_run_duration_seconds"),
            running_tasks: gauge!("chronoforge_running_tasks"),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false)
    }

    pub fn record_task_run(&self, result: RunResult, duration_ms: u64) {
        if !self.enabled {
            return;
        }
        let label = match result {
            RunResult::Succeeded => "succeeded",
            RunResult::PartiallyFailed => "partially_failed",
            RunResult::Failed => "failed",
            RunResult::Skipped => "skipped",
        };
        counter!("chronoforge_task_runs_total", "result" => label).increment(1);
        self.task_run_duration.record(duration_ms as f64 / 1000.0);
    }

    pub fn record_task_skip(&self) {
        if self.enabled {
            self.task_skips_total.increment(1);
        }
    }

    pub fn record_fetch_retry(&self) {
        if self.enabled {
            self.fetch_retries_total.increment(1);
        }
    }

    pub fn record_chunk_failure(&self) {
        if self.enabled {
            self.chunk_failures_total.increment(1);
        }
    }

    pub fn record_rows_written(&self, rows: usize) {
        if self.enabled {
            self.rows_written_total.increment(rows as u64);
        }
    }

    pub fn set_running_tasks(&self, count: usize) {
        if self.enabled {
            self.running_tasks.set(count as f64);
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(true)
    }
}
