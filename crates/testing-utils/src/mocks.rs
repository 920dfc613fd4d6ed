//! In-memory plugin implementations for tests
//!
//! `MemoryStorage` and `ScriptedDataSource` honour the plugin contracts and
//! record enough about each call for tests to assert on ordering, retries
//! and concurrency.

use async_trait::async_trait;
use chronoforge_core::models::{Coverage, DataSegment, MsRange, Row, TaskExecutionRecord, Timeframe};
use chronoforge_core::{DataSource, SchedulerError, SchedulerResult, Storage, TaskStatusListener};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Tracks how many calls are in flight and the peak seen so far.
#[derive(Debug, Default)]
pub struct ConcurrencyProbe {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyProbe {
    pub fn enter(&self) -> ProbeGuard<'_> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        ProbeGuard { probe: self }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct ProbeGuard<'a> {
    probe: &'a ConcurrencyProbe,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.probe.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct Series {
    rows: BTreeMap<i64, Row>,
    coverage: Coverage,
}

/// Storage backed by a map, keyed by `(sub, id)`.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    series: Mutex<HashMap<(String, String), Series>>,
    save_log: Mutex<Vec<(String, MsRange)>>,
    failing_series: Mutex<HashSet<String>>,
    panicking_series: Mutex<HashSet<String>>,
    fail_next: AtomicUsize,
    save_attempts: AtomicUsize,
    save_delay: Mutex<Option<Duration>>,
    probe: ConcurrencyProbe,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_save_delay(self, delay: Duration) -> Self {
        *self.save_delay.lock().unwrap() = Some(delay);
        self
    }

    /// Fail the next `n` save calls regardless of series.
    pub fn fail_next_saves(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Every save to `id` fails until [`heal_series`](Self::heal_series).
    pub fn fail_series(&self, id: &str) {
        self.failing_series.lock().unwrap().insert(id.to_string());
    }

    pub fn heal_series(&self, id: &str) {
        self.failing_series.lock().unwrap().remove(id);
    }

    /// Every save to `id` panics.
    pub fn panic_on_save(&self, id: &str) {
        self.panicking_series.lock().unwrap().insert(id.to_string());
    }

    /// Pre-populate a series without going through `save`.
    pub fn seed(&self, id: &str, sub: Option<&str>, segment: &DataSegment) {
        let mut series = self.series.lock().unwrap();
        let entry = series.entry(key(id, sub)).or_default();
        for row in &segment.rows {
            entry.rows.insert(row.time, row.clone());
        }
        entry.coverage.insert(segment.range);
    }

    pub fn save_attempts(&self) -> usize {
        self.save_attempts.load(Ordering::SeqCst)
    }

    /// Successful saves in the order they happened.
    pub fn save_log(&self) -> Vec<(String, MsRange)> {
        self.save_log.lock().unwrap().clone()
    }

    pub fn peak_concurrent_saves(&self) -> usize {
        self.probe.peak()
    }

    pub fn row_count(&self, id: &str, sub: Option<&str>) -> usize {
        self.series
            .lock()
            .unwrap()
            .get(&key(id, sub))
            .map(|s| s.rows.len())
            .unwrap_or(0)
    }

    pub fn coverage(&self, id: &str, sub: Option<&str>) -> Coverage {
        self.series
            .lock()
            .unwrap()
            .get(&key(id, sub))
            .map(|s| s.coverage.clone())
            .unwrap_or_default()
    }

    fn should_fail(&self, id: &str) -> bool {
        if self.failing_series.lock().unwrap().contains(id) {
            return true;
        }
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn key(id: &str, sub: Option<&str>) -> (String, String) {
    (sub.unwrap_or_default().to_string(), id.to_string())
}

#[async_trait]
impl Storage for MemoryStorage {
    fn name(&self) -> &str {
        "memory"
    }

    async fn save(&self, id: &str, data: &DataSegment, sub: Option<&str>) -> SchedulerResult<()> {
        let _guard = self.probe.enter();
        self.save_attempts.fetch_add(1, Ordering::SeqCst);

        let delay = *self.save_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.panicking_series.lock().unwrap().contains(id) {
            panic!("injected panic saving {id}");
        }
        if self.should_fail(id) {
            return Err(SchedulerError::Storage(format!("injected failure for {id}")));
        }

        {
            let mut series = self.series.lock().unwrap();
            let entry = series.entry(key(id, sub)).or_default();
            for row in &data.rows {
                entry.rows.insert(row.time, row.clone());
            }
            entry.coverage.insert(data.range);
        }
        self.save_log
            .lock()
            .unwrap()
            .push((id.to_string(), data.range));
        Ok(())
    }

    async fn load(&self, id: &str, sub: Option<&str>) -> SchedulerResult<Vec<Row>> {
        Ok(self
            .series
            .lock()
            .unwrap()
            .get(&key(id, sub))
            .map(|s| s.rows.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn exists(&self, id: &str, sub: Option<&str>) -> SchedulerResult<Coverage> {
        Ok(self.coverage(id, sub))
    }
}

/// Scripted behaviour for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchBehavior {
    /// Fail with a transient error this many times, then succeed.
    TransientFailures(usize),
    AlwaysTransient,
    Permanent,
    /// Rows come back in descending order.
    Unsorted,
    /// Rows carry NaN values, rejected by `validate_data`.
    InvalidValues,
    Panic,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchCall {
    pub symbol: String,
    pub start_ms: i64,
    pub end_ms: Option<i64>,
}

/// Data source that synthesizes one row per timeframe bucket.
#[derive(Debug)]
pub struct ScriptedDataSource {
    name: String,
    behaviors: Mutex<HashMap<String, FetchBehavior>>,
    calls: Mutex<Vec<FetchCall>>,
    delay: Mutex<Option<Duration>>,
    closed: AtomicUsize,
    probe: ConcurrencyProbe,
}

impl ScriptedDataSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            behaviors: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
            closed: AtomicUsize::new(0),
            probe: ConcurrencyProbe::default(),
        }
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn set_behavior(&self, symbol: &str, behavior: FetchBehavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(symbol.to_string(), behavior);
    }

    pub fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, symbol: &str) -> Vec<FetchCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.symbol == symbol)
            .collect()
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn peak_concurrent_fetches(&self) -> usize {
        self.probe.peak()
    }

    pub fn active_fetches(&self) -> usize {
        self.probe.active()
    }

    /// One row per bucket start in `[start_ms, end_ms)`.
    pub fn synth_rows(timeframe: Timeframe, start_ms: i64, end_ms: i64) -> Vec<Row> {
        let step = timeframe.as_millis();
        let first = start_ms.div_euclid(step) * step;
        let first = if first < start_ms { first + step } else { first };
        (0..)
            .map(|i| first + i * step)
            .take_while(|t| *t < end_ms)
            .map(|t| Row::new(t).with_value("close", (t / step) as f64))
            .collect()
    }
}

#[async_trait]
impl DataSource for ScriptedDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: Option<i64>,
    ) -> SchedulerResult<Vec<Row>> {
        let _guard = self.probe.enter();
        self.calls.lock().unwrap().push(FetchCall {
            symbol: symbol.to_string(),
            start_ms,
            end_ms,
        });

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let behavior = {
            let mut behaviors = self.behaviors.lock().unwrap();
            match behaviors.get_mut(symbol) {
                Some(FetchBehavior::TransientFailures(n)) if *n > 0 => {
                    *n -= 1;
                    Some(FetchBehavior::AlwaysTransient)
                }
                other => other.cloned(),
            }
        };

        let end = end_ms.unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
        let mut rows = Self::synth_rows(timeframe, start_ms, end);
        match behavior {
            Some(FetchBehavior::AlwaysTransient) => {
                Err(SchedulerError::TransientFetch(format!("{symbol}: rate limited")))
            }
            Some(FetchBehavior::Permanent) => {
                Err(SchedulerError::PermanentFetch(format!("{symbol}: unknown symbol")))
            }
            Some(FetchBehavior::Panic) => panic!("scripted panic for {symbol}"),
            Some(FetchBehavior::Unsorted) => {
                rows.reverse();
                Ok(rows)
            }
            Some(FetchBehavior::InvalidValues) => Ok(rows
                .into_iter()
                .map(|r| r.with_value("close", f64::NAN))
                .collect()),
            Some(FetchBehavior::TransientFailures(_)) | None => Ok(rows),
        }
    }

    fn validate_data(&self, rows: &[Row]) -> Result<(), String> {
        match rows.iter().find(|r| r.values.values().any(|v| v.is_nan())) {
            Some(row) => Err(format!("NaN value at {}", row.time)),
            None => Ok(()),
        }
    }

    async fn close_all_connections(&self) -> SchedulerResult<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Listener event captured by [`RecordingListener`].
#[derive(Debug, Clone, PartialEq)]
pub enum ListenerEvent {
    Started(String),
    Completed(TaskExecutionRecord),
    Skipped { task: String, reason: String },
}

/// Status listener that records every callback in order.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ListenerEvent>>,
    rejected: Mutex<HashSet<String>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// `on_started` returns false for this task, as if it had been removed.
    pub fn reject(&self, task: &str) {
        self.rejected.lock().unwrap().insert(task.to_string());
    }

    pub fn events(&self) -> Vec<ListenerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn completed(&self) -> Vec<TaskExecutionRecord> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ListenerEvent::Completed(record) => Some(record),
                _ => None,
            })
            .collect()
    }

    pub fn skipped(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ListenerEvent::Skipped { task, .. } => Some(task),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl TaskStatusListener for RecordingListener {
    async fn on_started(&self, task_name: &str) -> bool {
        if self.rejected.lock().unwrap().contains(task_name) {
            return false;
        }
        self.events
            .lock()
            .unwrap()
            .push(ListenerEvent::Started(task_name.to_string()));
        true
    }

    async fn on_completed(&self, record: TaskExecutionRecord) {
        self.events.lock().unwrap().push(ListenerEvent::Completed(record));
    }

    async fn on_skipped(&self, task_name: &str, reason: &str) {
        self.events.lock().unwrap().push(ListenerEvent::Skipped {
            task: task_name.to_string(),
            reason: reason.to_string(),
        });
    }
}
