use chrono::Datelike;
use serde::{Deserialize, Serialize};

use super::coverage::MsRange;
use crate::errors::{SchedulerError, SchedulerResult};
use crate::timestamp::{floor_to, to_datetime};

pub const MINUTE_MS: i64 = 60_000;
pub const HOUR_MS: i64 = 60 * MINUTE_MS;
pub const DAY_MS: i64 = 24 * HOUR_MS;
pub const WEEK_MS: i64 = 7 * DAY_MS;

/// 时间窗口的作用范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowScope {
    /// 每个 UTC 自然日内的 `HH:MM:SS` 偏移
    Daily,
    /// 每个 UTC 整点小时内的 `MM:SS` 偏移
    Hourly,
}

impl WindowScope {
    pub fn period_ms(&self) -> i64 {
        match self {
            WindowScope::Daily => DAY_MS,
            WindowScope::Hourly => HOUR_MS,
        }
    }
}

/// 任务的触发时间规则
///
/// - `Point`：在匹配的 `hour:minute`（以及可选的星期）触发一次，星期取值 0 = 周一 … 6 = 周日
/// - `Window`：窗口 `[start, end)` 内任意时刻都可触发，但每个窗口实例最多执行一次
///
/// 所有判定都基于 UTC。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimeSlot {
    Point {
        hour: u8,
        minute: u8,
        #[serde(default)]
        weekday: Option<u8>,
    },
    Window {
        scope: WindowScope,
        start_secs: u32,
        end_secs: u32,
    },
}

impl TimeSlot {
    pub fn daily_at(hour: u8, minute: u8) -> Self {
        TimeSlot::Point {
            hour,
            minute,
            weekday: None,
        }
    }

    pub fn weekly_at(weekday: u8, hour: u8, minute: u8) -> Self {
        TimeSlot::Point {
            hour,
            minute,
            weekday: Some(weekday),
        }
    }

    /// 由字符串构造窗口：`HH:MM:SS` 为每日窗口，`MM:SS` 为每小时窗口
    pub fn window(start: &str, end: &str) -> SchedulerResult<Self> {
        let (start_scope, start_secs) = parse_offset(start)?;
        let (end_scope, end_secs) = parse_offset(end)?;
        if start_scope != end_scope {
            return Err(SchedulerError::config(format!(
                "时间窗口起止格式不一致: {start} / {end}"
            )));
        }
        let slot = TimeSlot::Window {
            scope: start_scope,
            start_secs,
            end_secs,
        };
        slot.validate()?;
        Ok(slot)
    }

    pub fn validate(&self) -> SchedulerResult<()> {
        match *self {
            TimeSlot::Point {
                hour,
                minute,
                weekday,
            } => {
                if hour > 23 {
                    return Err(SchedulerError::config(format!("小时必须在 0-23 之间: {hour}")));
                }
                if minute > 59 {
                    return Err(SchedulerError::config(format!("分钟必须在 0-59 之间: {minute}")));
                }
                if let Some(day) = weekday {
                    if day > 6 {
                        return Err(SchedulerError::config(format!("星期必须在 0-6 之间: {day}")));
                    }
                }
            }
            TimeSlot::Window {
                scope,
                start_secs,
                end_secs,
            } => {
                if start_secs >= end_secs {
                    return Err(SchedulerError::config(format!(
                        "时间窗口起点必须早于终点: {start_secs}s >= {end_secs}s"
                    )));
                }
                if i64::from(end_secs) * 1000 > scope.period_ms() {
                    return Err(SchedulerError::config(format!(
                        "时间窗口终点超出周期范围: {end_secs}s"
                    )));
                }
            }
        }
        Ok(())
    }

    /// 不晚于 `now_ms` 的最近一次点触发时刻；窗口类型返回 None
    pub fn latest_point_occurrence(&self, now_ms: i64) -> Option<i64> {
        let TimeSlot::Point {
            hour,
            minute,
            weekday,
        } = *self
        else {
            return None;
        };

        let offset = i64::from(hour) * HOUR_MS + i64::from(minute) * MINUTE_MS;
        let mut candidate = floor_to(now_ms, DAY_MS) + offset;
        if candidate > now_ms {
            candidate -= DAY_MS;
        }
        if let Some(day) = weekday {
            // 最多回退 6 天即可命中目标星期
            for _ in 0..7 {
                if weekday_of(candidate) == Some(u32::from(day)) {
                    break;
                }
                candidate -= DAY_MS;
            }
        }
        Some(candidate)
    }

    /// `now_ms` 所在的窗口实例；不在窗口内或为点类型时返回 None
    pub fn window_at(&self, now_ms: i64) -> Option<MsRange> {
        let TimeSlot::Window {
            scope,
            start_secs,
            end_secs,
        } = *self
        else {
            return None;
        };

        let base = floor_to(now_ms, scope.period_ms());
        let window = MsRange::new(
            base + i64::from(start_secs) * 1000,
            base + i64::from(end_secs) * 1000,
        )?;
        window.contains(now_ms).then_some(window)
    }

    /// 严格晚于 `now_ms` 的下一次触发时刻（窗口类型为下一个窗口的起点）
    pub fn next_fire_after(&self, now_ms: i64) -> Option<i64> {
        match *self {
            TimeSlot::Point { weekday, .. } => {
                let period = if weekday.is_some() { WEEK_MS } else { DAY_MS };
                self.latest_point_occurrence(now_ms).map(|t| t + period)
            }
            TimeSlot::Window {
                scope, start_secs, ..
            } => {
                let period = scope.period_ms();
                let start = floor_to(now_ms, period) + i64::from(start_secs) * 1000;
                Some(if start > now_ms { start } else { start + period })
            }
        }
    }
}

fn weekday_of(ms: i64) -> Option<u32> {
    to_datetime(ms).map(|dt| dt.weekday().num_days_from_monday())
}

fn parse_offset(raw: &str) -> SchedulerResult<(WindowScope, u32)> {
    let invalid = || SchedulerError::config(format!("时间格式无效，应为 HH:MM:SS 或 MM:SS: {raw}"));
    let parts = raw
        .trim()
        .split(':')
        .map(|p| p.parse::<u32>().map_err(|_| invalid()))
        .collect::<SchedulerResult<Vec<u32>>>()?;

    match parts.as_slice() {
        [h, m, s] if *h <= 24 && *m < 60 && *s < 60 => {
            Ok((WindowScope::Daily, h * 3600 + m * 60 + s))
        }
        [m, s] if *m <= 60 && *s < 60 => Ok((WindowScope::Hourly, m * 60 + s)),
        _ => Err(invalid()),
    }
}
