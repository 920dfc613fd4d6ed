//! Structured logging utilities
//!
//! 日志统一走 `tracing`，事件名放在 `event` 字段中，便于 JSON 日志检索。

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;
use crate::models::{RunResult, TaskExecutionRecord};

/// 初始化全局日志订阅者
///
/// `RUST_LOG` 环境变量优先于配置中的日志级别。进程内只能成功初始化一次。
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.log_format.as_str() {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        other => {
            return Err(anyhow::anyhow!("不支持的日志格式: {other}"));
        }
    }

    Ok(())
}

/// Structured logging helpers
pub struct StructuredLogger;

impl StructuredLogger {
    pub fn log_task_registered(task_name: &str, data_source: &str, storage: &str, symbols: usize) {
        info!(
            event = "task_registered",
            task.name = task_name,
            task.data_source = data_source,
            task.storage = storage,
            task.symbols = symbols,
            "任务已注册"
        );
    }

    pub fn log_task_removed(task_name: &str) {
        info!(event = "task_removed", task.name = task_name, "任务已删除");
    }

    pub fn log_task_dispatched(task_name: &str, due_at_ms: i64) {
        info!(
            event = "task_dispatched",
            task.name = task_name,
            task.due_at = %crate::timestamp::format_ms(due_at_ms),
            "任务已分发到工作池"
        );
    }

    pub fn log_task_skipped(task_name: &str, reason: &str) {
        warn!(
            event = "task_skipped",
            task.name = task_name,
            task.skip_reason = reason,
            "任务本次触发被跳过"
        );
    }

    pub fn log_task_run_completed(record: &TaskExecutionRecord) {
        let failed_symbols = record
            .symbols
            .iter()
            .filter(|o| !o.status.is_success())
            .count();
        match record.result {
            RunResult::Succeeded => info!(
                event = "task_run_completed",
                task.name = %record.task_name,
                run.id = %record.run_id,
                run.duration_ms = record.duration_ms,
                run.symbols = record.symbols.len(),
                "Task run completed successfully"
            ),
            RunResult::Skipped => debug!(
                event = "task_run_skipped",
                task.name = %record.task_name,
                run.id = %record.run_id,
                "Task run skipped"
            ),
            result => error!(
                event = "task_run_failed",
                task.name = %record.task_name,
                run.id = %record.run_id,
                run.result = ?result,
                run.duration_ms = record.duration_ms,
                run.failed_symbols = failed_symbols,
                run.error = record.error.as_deref().unwrap_or(""),
                "Task run finished with failures"
            ),
        }
    }

    pub fn log_chunk_failed(task_name: &str, symbol: &str, chunk: &str, error: &str) {
        warn!(
            event = "chunk_failed",
            task.name = task_name,
            symbol = symbol,
            chunk = chunk,
            error = error,
            "Chunk failed, stopping symbol"
        );
    }

    pub fn log_segment_written(series_id: &str, chunk: &str, rows: usize, duration_ms: u64) {
        debug!(
            event = "segment_written",
            series.id = series_id,
            chunk = chunk,
            rows = rows,
            duration_ms = duration_ms,
            "Segment written"
        );
    }

    pub fn log_task_abandoned(task_name: &str, timeout_ms: u64) {
        error!(
            event = "task_abandoned",
            task.name = task_name,
            timeout_ms = timeout_ms,
            "任务在停止超时后仍未结束，已强制放弃"
        );
    }
}
