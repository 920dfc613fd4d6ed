//! 数据源插件接口
//!
//! 数据源负责从外部服务拉取时间序列数据。具体实现（行情 API、宏观数据 API 等）
//! 不在引擎内部，通过 [`crate::PluginRegistry`] 以名称注册。
//!
//! 同一 (名称, 配置) 的实例会被多个任务共享，实现方需要自行保证内部可变状态的同步。

use async_trait::async_trait;

use crate::errors::SchedulerResult;
use crate::models::{Row, Timeframe};

#[async_trait]
pub trait DataSource: Send + Sync {
    /// 插件名称
    fn name(&self) -> &str;

    /// 拉取 `[start_ms, end_ms)` 范围内的数据
    ///
    /// # 参数
    ///
    /// * `symbol` - 标的代码
    /// * `timeframe` - 时间周期
    /// * `start_ms` - 起点（包含）
    /// * `end_ms` - 终点（不包含），None 表示截至当前
    ///
    /// # 返回值
    ///
    /// 按时间升序排列的数据行。
    ///
    /// # 错误
    ///
    /// * `TransientFetch` - 网络、限流等可重试错误
    /// * `PermanentFetch` - 标的不存在、请求被拒绝等不可重试错误
    async fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: Option<i64>,
    ) -> SchedulerResult<Vec<Row>>;

    /// 校验拉取到的数据，失败时返回原因；不得修改数据
    fn validate_data(&self, _rows: &[Row]) -> Result<(), String> {
        Ok(())
    }

    /// 释放连接等资源，需保证幂等
    async fn close_all_connections(&self) -> SchedulerResult<()> {
        Ok(())
    }
}
