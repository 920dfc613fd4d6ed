pub mod components;
pub mod gap_detector;
pub mod retry;

pub use components::{FetchPipeline, SegmentWriter, StopReport, TaskRunner, WorkerPool};
pub use gap_detector::GapDetector;
pub use retry::RetryPolicy;
