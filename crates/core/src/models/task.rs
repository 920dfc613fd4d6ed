use serde::{Deserialize, Serialize};
use std::fmt;

use super::time_range::TimeRange;
use super::time_slot::TimeSlot;
use super::timeframe::Timeframe;
use crate::errors::{SchedulerError, SchedulerResult};

/// 插件引用：插件名 + 插件配置
///
/// 相同的 (name, config) 在注册表中对应同一个共享实例。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginSpec {
    pub name: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl PluginSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: serde_json::Value::Null,
        }
    }

    pub fn with_config(name: impl Into<String>, config: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }
}

/// 任务定义
///
/// 一个任务把一个数据源、一个存储目标、一组标的、一个时间周期和一条触发规则绑定在一起。
/// 任务由调度器的任务表独占持有，调用方每次进程启动都需要重新注册。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    pub data_source: PluginSpec,
    pub storage: PluginSpec,
    pub time_slot: TimeSlot,
    pub symbols: Vec<String>,
    #[serde(default)]
    pub timeframe: Timeframe,
    pub time_range: TimeRange,
    /// 存储子目录/命名空间，缺省为数据源名称
    #[serde(default)]
    pub sub: Option<String>,
}

impl TaskSpec {
    pub fn validate(&self) -> SchedulerResult<()> {
        if self.name.trim().is_empty() {
            return Err(SchedulerError::config("任务名称不能为空"));
        }
        if self.data_source.name.trim().is_empty() {
            return Err(SchedulerError::config("数据源插件名称不能为空"));
        }
        if self.storage.name.trim().is_empty() {
            return Err(SchedulerError::config("存储插件名称不能为空"));
        }
        if self.symbols.is_empty() {
            return Err(SchedulerError::config(format!(
                "任务 {} 至少需要一个标的",
                self.name
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for symbol in &self.symbols {
            if symbol.trim().is_empty() {
                return Err(SchedulerError::config("标的名称不能为空"));
            }
            if !seen.insert(symbol.as_str()) {
                return Err(SchedulerError::config(format!("标的重复: {symbol}")));
            }
        }
        self.time_slot.validate()?;
        self.time_range.validate()?;
        Ok(())
    }

    pub fn storage_sub(&self) -> &str {
        self.sub.as_deref().unwrap_or(&self.data_source.name)
    }
}

/// 任务生命周期状态
///
/// ```text
/// Idle → Scheduled → Running → {Succeeded, PartiallyFailed, Failed} → Idle
///   任意非 Running 状态 → Removed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Idle,
    Scheduled,
    Running,
    Succeeded,
    PartiallyFailed,
    Failed,
    Removed,
}

impl TaskState {
    /// 一次运行的终止状态
    pub fn is_run_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::PartiallyFailed | TaskState::Failed
        )
    }

    /// 占用执行槽位（已排队或运行中）
    pub fn is_busy(&self) -> bool {
        matches!(self, TaskState::Scheduled | TaskState::Running)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Idle => "idle",
            TaskState::Scheduled => "scheduled",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::PartiallyFailed => "partially_failed",
            TaskState::Failed => "failed",
            TaskState::Removed => "removed",
        };
        f.write_str(s)
    }
}
