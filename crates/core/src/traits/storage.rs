//! 存储插件接口

use async_trait::async_trait;

use crate::errors::SchedulerResult;
use crate::models::{Coverage, DataSegment, Row};

/// 存储插件
///
/// 存储是已持久化数据的唯一事实来源，引擎不会跨运行缓存覆盖范围。
/// `id` 为序列 ID（`{symbol}_{timeframe}`），`sub` 为命名空间，通常是数据源名称。
#[async_trait]
pub trait Storage: Send + Sync {
    fn name(&self) -> &str;

    /// 持久化数据段
    ///
    /// 必须按时间戳做幂等 upsert：重复或重叠的写入不会产生重复行。
    /// 写入成功后，`data.range` 整段视为已覆盖（即使数据段没有任何行）。
    async fn save(&self, id: &str, data: &DataSegment, sub: Option<&str>) -> SchedulerResult<()>;

    /// 读取已持久化的全部数据行，按时间升序
    async fn load(&self, id: &str, sub: Option<&str>) -> SchedulerResult<Vec<Row>>;

    /// 已持久化的覆盖范围，空集合表示没有数据
    async fn exists(&self, id: &str, sub: Option<&str>) -> SchedulerResult<Coverage>;
}
