//! Test helper utilities and common testing patterns

use chronoforge_core::{Clock, DataSource, PluginRegistry, SchedulerResult, Storage};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::mocks::{MemoryStorage, ScriptedDataSource};

/// Test environment setup utilities
pub struct TestEnv;

impl TestEnv {
    /// Wait for a condition to be true with timeout
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = std::time::Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }

        condition().await
    }
}

/// Clock whose time only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Register `source` as `scripted` and `storage` as `memory`.
///
/// Every configuration resolves to the same shared instance so tests can
/// inspect it afterwards.
pub async fn register_test_plugins(
    registry: &PluginRegistry,
    source: Arc<ScriptedDataSource>,
    storage: Arc<MemoryStorage>,
) -> SchedulerResult<()> {
    registry
        .register_data_source("scripted", move |_| Ok(Arc::clone(&source) as Arc<dyn DataSource>))
        .await?;
    registry
        .register_storage("memory", move |_| Ok(Arc::clone(&storage) as Arc<dyn Storage>))
        .await?;
    Ok(())
}
