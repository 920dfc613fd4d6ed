use async_trait::async_trait;

use crate::models::TaskExecutionRecord;

/// 任务状态监听器
///
/// 工作池通过它把执行进度回报给调度端的状态机。
#[async_trait]
pub trait TaskStatusListener: Send + Sync {
    /// 任务获得执行槽位，进入 Running；任务已被删除时返回 false，工作池将放弃执行
    async fn on_started(&self, task_name: &str) -> bool;

    /// 任务运行结束（包括失败、被强制停止）
    async fn on_completed(&self, record: TaskExecutionRecord);

    /// 已排队的任务未执行（如调度器停止）
    async fn on_skipped(&self, task_name: &str, reason: &str);
}
