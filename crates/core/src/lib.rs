pub mod config;
pub mod errors;
pub mod logging;
pub mod metrics_collector;
pub mod models;
pub mod plugin_registry;
pub mod shutdown;
pub mod timestamp;
pub mod traits;

pub use self::config::*;
pub use errors::*;
pub use logging::{init_logging, StructuredLogger};
pub use metrics_collector::MetricsCollector;
pub use plugin_registry::{PluginKey, PluginKind, PluginRegistry, StorageHandle};
pub use shutdown::{ShutdownPhase, ShutdownSignal};
pub use traits::*;
