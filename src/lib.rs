//! # Chronoforge
//!
//! 时间序列数据采集的调度与编排引擎：按时间槽触发任务，在有界工作池中执行，
//! 只拉取存储中尚未覆盖的数据段，并把写入串行化到每个存储实例。
//!
//! ```no_run
//! use chronoforge::{PluginRegistry, Scheduler, SchedulerConfig};
//!
//! # async fn demo() -> chronoforge::SchedulerResult<()> {
//! let registry = PluginRegistry::new();
//! // registry.register_data_source(...) / registry.register_storage(...)
//! let scheduler = Scheduler::new(SchedulerConfig::default(), registry)?;
//! scheduler.start().await?;
//! // scheduler.add_task(spec).await?;
//! let report = scheduler.stop().await?;
//! # let _ = report;
//! # Ok(())
//! # }
//! ```

pub mod scheduler;

pub use chronoforge_core::models;
pub use chronoforge_core::{
    init_logging, Clock, DataSource, PluginKind, PluginRegistry, SchedulerConfig, SchedulerError,
    SchedulerResult, Storage, SystemClock,
};
pub use chronoforge_dispatcher::{DueTask, TickOutcome};
pub use chronoforge_worker::StopReport;
pub use scheduler::{Scheduler, TaskStatusReport};
