use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use chronoforge_core::models::{TaskExecutionRecord, TaskState};
use chronoforge_core::{Clock, MetricsCollector, StructuredLogger, TaskStatusListener};

use crate::state_machine::TaskTable;

/// 把工作池回报的执行进度应用到任务表
#[derive(Clone)]
pub struct StateListener {
    table: Arc<RwLock<TaskTable>>,
    clock: Arc<dyn Clock>,
    metrics: MetricsCollector,
}

impl StateListener {
    pub fn new(table: Arc<RwLock<TaskTable>>, clock: Arc<dyn Clock>, metrics: MetricsCollector) -> Self {
        Self { table, clock, metrics }
    }
}

#[async_trait]
impl TaskStatusListener for StateListener {
    async fn on_started(&self, task_name: &str) -> bool {
        let mut table = self.table.write().await;
        let Some(entry) = table.get_mut(task_name) else {
            debug!(task.name = task_name, "任务已删除，放弃执行");
            return false;
        };
        match entry.transition(TaskState::Running) {
            Ok(_) => true,
            Err(e) => {
                warn!(task.name = task_name, error = %e, "任务无法进入运行状态");
                false
            }
        }
    }

    async fn on_completed(&self, record: TaskExecutionRecord) {
        StructuredLogger::log_task_run_completed(&record);
        self.metrics.record_task_run(record.result, record.duration_ms);

        let mut table = self.table.write().await;
        let Some(entry) = table.get_mut(&record.task_name) else {
            debug!(task.name = %record.task_name, "任务已删除，忽略执行结果");
            return;
        };
        if entry.state() != TaskState::Running {
            // 超时后已被标记为强制停止的任务，迟到的结果只丢弃不改变状态
            debug!(
                task.name = %record.task_name,
                state = %entry.state(),
                "任务不在运行状态，忽略执行结果"
            );
            return;
        }
        let target = record.result.terminal_state().unwrap_or(TaskState::Failed);
        if let Err(e) = entry.transition(target) {
            warn!(task.name = %record.task_name, error = %e, "更新任务状态失败");
        }
        entry.push_record(record);
    }

    async fn on_skipped(&self, task_name: &str, reason: &str) {
        StructuredLogger::log_task_skipped(task_name, reason);
        self.metrics.record_task_skip();

        let mut table = self.table.write().await;
        if let Some(entry) = table.get_mut(task_name) {
            if entry.state() == TaskState::Scheduled {
                let _ = entry.transition(TaskState::Idle);
            }
            entry.push_record(TaskExecutionRecord::skipped(task_name, self.clock.now_ms(), reason));
        }
    }
}

impl StateListener {
    /// 超时放弃的任务直接标记为失败
    pub async fn mark_abandoned(&self, task_name: &str) {
        let record = TaskExecutionRecord::failed(task_name, self.clock.now_ms(), "forcibly stopped");
        self.on_completed(record).await;
    }
}
