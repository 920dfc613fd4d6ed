//! # 数据模型
//!
//! 调度引擎的核心数据结构。
//!
//! ## 核心模型
//!
//! - [`TaskSpec`] / [`TaskState`]：任务定义与生命周期状态
//! - [`TimeSlot`]：点触发或时间窗口触发规则
//! - [`Timeframe`] / [`TimeRange`]：时间周期与请求时间范围
//! - [`MsRange`] / [`Coverage`]：半开毫秒区间与已持久化覆盖范围
//! - [`DataSegment`] / [`Row`]：拉取阶段与写入阶段之间传递的数据段
//! - [`TaskExecutionRecord`]：单次运行的执行记录
//!
//! 所有时间均为 UTC 毫秒时间戳，区间一律为左闭右开。

pub mod coverage;
pub mod segment;
pub mod task;
pub mod task_run;
pub mod time_range;
pub mod time_slot;
pub mod timeframe;

pub use coverage::*;
pub use segment::*;
pub use task::*;
pub use task_run::*;
pub use time_range::*;
pub use time_slot::*;
pub use timeframe::*;
