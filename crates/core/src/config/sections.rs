use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// 调度循环的 tick 间隔
    pub tick_interval_ms: u64,
    /// 每个任务保留的执行记录条数
    pub history_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 5_000,
            history_capacity: 20,
        }
    }
}

impl DispatcherConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(anyhow::anyhow!("调度间隔必须大于0"));
        }
        if self.history_capacity == 0 {
            return Err(anyhow::anyhow!("执行记录容量必须大于0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub max_concurrent_tasks: usize,
    /// 等待执行槽位的调度队列容量
    pub queue_capacity: usize,
    pub shutdown_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 5,
            queue_capacity: 64,
            shutdown_timeout_ms: 30_000,
        }
    }
}

impl WorkerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_concurrent_tasks == 0 {
            return Err(anyhow::anyhow!("最大并发任务数必须大于0"));
        }
        if self.queue_capacity == 0 {
            return Err(anyhow::anyhow!("调度队列容量必须大于0"));
        }
        if self.shutdown_timeout_ms == 0 {
            return Err(anyhow::anyhow!("停止超时时间必须大于0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 单个任务内跨标的的并发拉取数
    pub symbol_fan_out: usize,
    /// 每个分页包含的周期桶数量
    pub page_size: u32,
    pub fetch_timeout_ms: u64,
    pub write_timeout_ms: u64,
    /// 拉取阶段到写入器之间的有界队列容量
    pub writer_queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            symbol_fan_out: 4,
            page_size: 500,
            fetch_timeout_ms: 30_000,
            write_timeout_ms: 30_000,
            writer_queue_capacity: 16,
        }
    }
}

impl PipelineConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.symbol_fan_out == 0 {
            return Err(anyhow::anyhow!("标的并发拉取数必须大于0"));
        }
        if self.page_size == 0 {
            return Err(anyhow::anyhow!("分页大小必须大于0"));
        }
        if self.fetch_timeout_ms == 0 || self.write_timeout_ms == 0 {
            return Err(anyhow::anyhow!("拉取和写入超时时间必须大于0"));
        }
        if self.writer_queue_capacity == 0 {
            return Err(anyhow::anyhow!("写入队列容量必须大于0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// 包含首次调用在内的最大尝试次数
    pub max_attempts: u32,
    pub base_interval_ms: u64,
    pub max_interval_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_interval_ms: 5_000,
            max_interval_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow::anyhow!("最大尝试次数必须大于0"));
        }
        if self.max_interval_ms < self.base_interval_ms {
            return Err(anyhow::anyhow!("最大重试间隔不能小于基础重试间隔"));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(anyhow::anyhow!("退避倍数不能小于1"));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(anyhow::anyhow!("抖动因子必须在0到1之间"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// "pretty" 或 "json"
    pub log_format: String,
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
        }
    }
}

impl ObservabilityConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(anyhow::anyhow!(
                "无效的日志级别: {}，支持的级别: {:?}",
                self.log_level,
                valid_levels
            ));
        }
        let valid_formats = ["pretty", "json"];
        if !valid_formats.contains(&self.log_format.as_str()) {
            return Err(anyhow::anyhow!(
                "不支持的日志格式: {}，支持的格式: {:?}",
                self.log_format,
                valid_formats
            ));
        }
        Ok(())
    }
}
