//! Timestamp normalization
//!
//! Every comparison inside the engine happens on UTC millisecond epochs.
//! This module converts the representations plugins and callers hand us
//! into that canonical form.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::errors::{SchedulerError, SchedulerResult};

/// Epoch values below this are taken to be seconds rather than milliseconds.
const SECONDS_THRESHOLD: i64 = 100_000_000_000;

pub trait ToEpochMillis {
    fn to_epoch_millis(&self) -> i64;
}

impl<Tz: TimeZone> ToEpochMillis for DateTime<Tz> {
    fn to_epoch_millis(&self) -> i64 {
        self.timestamp_millis()
    }
}

impl ToEpochMillis for NaiveDateTime {
    fn to_epoch_millis(&self) -> i64 {
        self.and_utc().timestamp_millis()
    }
}

impl ToEpochMillis for NaiveDate {
    fn to_epoch_millis(&self) -> i64 {
        self.and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp_millis())
            .unwrap_or_default()
    }
}

/// Normalize a raw epoch that may be expressed in seconds or milliseconds.
pub fn normalize_epoch(value: i64) -> i64 {
    if value.abs() < SECONDS_THRESHOLD {
        value * 1000
    } else {
        value
    }
}

/// Parse a textual timestamp into UTC epoch milliseconds.
///
/// Accepted forms: RFC 3339, `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS`,
/// `YYYYMMDD`, `YYYYMMDD_HHMMSS` and integer epochs (seconds or millis).
/// Forms without an offset are read as UTC.
pub fn parse_timestamp(input: &str) -> SchedulerResult<i64> {
    let s = input.trim();
    if s.is_empty() {
        return Err(SchedulerError::config("时间戳不能为空"));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.to_epoch_millis());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y%m%d_%H%M%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.to_epoch_millis());
        }
    }
    for fmt in ["%Y-%m-%d", "%Y%m%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d.to_epoch_millis());
        }
    }
    // 8 位纯数字已按日期解析，其余整数视为 epoch
    if let Ok(raw) = s.parse::<i64>() {
        return Ok(normalize_epoch(raw));
    }

    Err(SchedulerError::config(format!("无法解析的时间戳: {input}")))
}

/// Round `ms` down to a multiple of `step_ms`.
pub fn floor_to(ms: i64, step_ms: i64) -> i64 {
    if step_ms <= 0 {
        return ms;
    }
    ms.div_euclid(step_ms) * step_ms
}

pub fn to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
}

/// Human readable form used in log fields.
pub fn format_ms(ms: i64) -> String {
    to_datetime(ms)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ms.to_string())
}
