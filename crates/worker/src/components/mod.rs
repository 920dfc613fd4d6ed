pub mod pipeline;
pub mod worker_pool;
pub mod writer;

pub use pipeline::{check_rows, FetchPipeline, TaskRunner};
pub use worker_pool::{StopReport, WorkerPool};
pub use writer::{SegmentWriter, SymbolWriteReport, WriteJob};
