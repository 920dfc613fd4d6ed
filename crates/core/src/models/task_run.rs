use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::TaskState;

/// 单个标的在一次运行中的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolStatus {
    Succeeded,
    ValidationFailed,
    FetchFailed,
    StorageFailed,
    /// 因停止信号未被处理
    Skipped,
}

impl SymbolStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, SymbolStatus::Succeeded)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolOutcome {
    pub symbol: String,
    pub status: SymbolStatus,
    pub chunks_written: usize,
    pub rows_written: usize,
    pub error: Option<String>,
}

impl SymbolOutcome {
    pub fn succeeded(symbol: impl Into<String>, chunks_written: usize, rows_written: usize) -> Self {
        Self {
            symbol: symbol.into(),
            status: SymbolStatus::Succeeded,
            chunks_written,
            rows_written,
            error: None,
        }
    }

    pub fn failed(symbol: impl Into<String>, status: SymbolStatus, error: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            status,
            chunks_written: 0,
            rows_written: 0,
            error: Some(error.into()),
        }
    }
}

/// 任务一次运行的汇总结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunResult {
    Succeeded,
    PartiallyFailed,
    Failed,
    /// 触发时任务仍在运行，或停止时尚未开始
    Skipped,
}

impl RunResult {
    /// 全部成功为 Succeeded，部分成功为 PartiallyFailed，其余为 Failed
    pub fn aggregate(outcomes: &[SymbolOutcome]) -> RunResult {
        let succeeded = outcomes.iter().filter(|o| o.status.is_success()).count();
        if outcomes.is_empty() || succeeded == 0 {
            RunResult::Failed
        } else if succeeded == outcomes.len() {
            RunResult::Succeeded
        } else {
            RunResult::PartiallyFailed
        }
    }

    /// 运行结果对应的任务终止状态；Skipped 不改变任务状态
    pub fn terminal_state(&self) -> Option<TaskState> {
        match self {
            RunResult::Succeeded => Some(TaskState::Succeeded),
            RunResult::PartiallyFailed => Some(TaskState::PartiallyFailed),
            RunResult::Failed => Some(TaskState::Failed),
            RunResult::Skipped => None,
        }
    }
}

/// 任务执行记录
///
/// 仅保存在每个任务的内存环形缓冲区中用于状态查询，不做持久化。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskExecutionRecord {
    pub run_id: Uuid,
    pub task_name: String,
    pub started_at_ms: i64,
    pub duration_ms: u64,
    pub result: RunResult,
    pub symbols: Vec<SymbolOutcome>,
    pub error: Option<String>,
}

impl TaskExecutionRecord {
    pub fn from_outcomes(
        task_name: impl Into<String>,
        started_at_ms: i64,
        duration_ms: u64,
        symbols: Vec<SymbolOutcome>,
    ) -> Self {
        let result = RunResult::aggregate(&symbols);
        Self {
            run_id: Uuid::new_v4(),
            task_name: task_name.into(),
            started_at_ms,
            duration_ms,
            result,
            symbols,
            error: None,
        }
    }

    /// 整个运行失败（如插件解析失败、执行异常、被强制停止）
    pub fn failed(task_name: impl Into<String>, started_at_ms: i64, error: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            task_name: task_name.into(),
            started_at_ms,
            duration_ms: 0,
            result: RunResult::Failed,
            symbols: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn skipped(task_name: impl Into<String>, at_ms: i64, reason: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            task_name: task_name.into(),
            started_at_ms: at_ms,
            duration_ms: 0,
            result: RunResult::Skipped,
            symbols: Vec::new(),
            error: Some(reason.into()),
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn outcome_for(&self, symbol: &str) -> Option<&SymbolOutcome> {
        self.symbols.iter().find(|o| o.symbol == symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate() {
        let ok = SymbolOutcome::succeeded("A", 1, 10);
        let bad = SymbolOutcome::failed("B", SymbolStatus::FetchFailed, "timeout");
        let skipped = SymbolOutcome::failed("C", SymbolStatus::Skipped, "stopping");

        assert_eq!(RunResult::aggregate(&[ok.clone()]), RunResult::Succeeded);
        assert_eq!(
            RunResult::aggregate(&[ok.clone(), bad.clone()]),
            RunResult::PartiallyFailed
        );
        assert_eq!(RunResult::aggregate(&[bad, skipped.clone()]), RunResult::Failed);
        assert_eq!(RunResult::aggregate(&[ok, skipped]), RunResult::PartiallyFailed);
        assert_eq!(RunResult::aggregate(&[]), RunResult::Failed);
    }

    #[test]
    fn test_terminal_state() {
        assert_eq!(RunResult::Succeeded.terminal_state(), Some(TaskState::Succeeded));
        assert_eq!(RunResult::Skipped.terminal_state(), None);
    }
}
