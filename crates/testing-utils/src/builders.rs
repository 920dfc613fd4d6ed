//! Test data builders

use chronoforge_core::models::{PluginSpec, TaskSpec, TimeRange, TimeSlot, Timeframe};

/// 2024-01-01T00:00:00Z
pub const JAN_1_2024_MS: i64 = 1_704_067_200_000;

/// Builder for [`TaskSpec`] with defaults pointing at the `scripted` data
/// source and `memory` storage registered by [`crate::helpers::register_test_plugins`].
pub struct TaskSpecBuilder {
    spec: TaskSpec,
}

impl TaskSpecBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            spec: TaskSpec {
                name: name.to_string(),
                data_source: PluginSpec::new("scripted"),
                storage: PluginSpec::new("memory"),
                time_slot: TimeSlot::daily_at(0, 0),
                symbols: vec!["AAPL".to_string()],
                timeframe: Timeframe::D1,
                time_range: TimeRange::open(JAN_1_2024_MS),
                sub: None,
            },
        }
    }

    pub fn with_symbols(mut self, symbols: &[&str]) -> Self {
        self.spec.symbols = symbols.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_time_slot(mut self, slot: TimeSlot) -> Self {
        self.spec.time_slot = slot;
        self
    }

    pub fn with_timeframe(mut self, timeframe: Timeframe) -> Self {
        self.spec.timeframe = timeframe;
        self
    }

    pub fn with_range(mut self, start_ms: i64, end_ms: Option<i64>) -> Self {
        self.spec.time_range = TimeRange {
            start_ms,
            end_ms,
        };
        self
    }

    pub fn with_data_source(mut self, data_source: PluginSpec) -> Self {
        self.spec.data_source = data_source;
        self
    }

    pub fn with_storage(mut self, storage: PluginSpec) -> Self {
        self.spec.storage = storage;
        self
    }

    pub fn with_sub(mut self, sub: &str) -> Self {
        self.spec.sub = Some(sub.to_string());
        self
    }

    pub fn build(self) -> TaskSpec {
        self.spec
    }
}
