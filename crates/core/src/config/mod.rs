pub mod scheduler_config;
pub mod sections;

pub use scheduler_config::SchedulerConfig;
pub use sections::*;
