use chrono::{Days, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::coverage::MsRange;
use crate::errors::{SchedulerError, SchedulerResult};
use crate::timestamp::{format_ms, ToEpochMillis};

/// 任务请求的时间范围
///
/// `end_ms` 为 None 表示开放区间，每次运行时以“当前时间”作为终点。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start_ms: i64,
    #[serde(default)]
    pub end_ms: Option<i64>,
}

impl TimeRange {
    pub fn new(start_ms: i64, end_ms: Option<i64>) -> SchedulerResult<Self> {
        let range = Self { start_ms, end_ms };
        range.validate()?;
        Ok(range)
    }

    pub fn open(start_ms: i64) -> Self {
        Self {
            start_ms,
            end_ms: None,
        }
    }

    pub fn validate(&self) -> SchedulerResult<()> {
        if let Some(end) = self.end_ms {
            if self.start_ms >= end {
                return Err(SchedulerError::config(format!(
                    "时间范围起点必须早于终点: {} >= {}",
                    format_ms(self.start_ms),
                    format_ms(end)
                )));
            }
        }
        Ok(())
    }

    /// 解析 `YYYYMMDD[_HHMMSS]-[YYYYMMDD[_HHMMSS]]` 形式的时间范围字符串
    ///
    /// 只写日期的终点表示包含当天，即终点取次日零点。
    pub fn parse(input: &str) -> SchedulerResult<Self> {
        let s = input.trim();
        let (start, end) = s.split_once('-').ok_or_else(|| {
            SchedulerError::config(format!("时间范围格式无效，应为 START-[END]: {input}"))
        })?;

        if start.trim().is_empty() {
            return Err(SchedulerError::config(format!("时间范围缺少起点: {input}")));
        }
        let start_ms = parse_bound(start, false)?;
        let end_ms = match end.trim() {
            "" => None,
            end => Some(parse_bound(end, true)?),
        };

        Self::new(start_ms, end_ms)
    }

    /// 以 `now_ms` 作为开放终点，得到本次运行的半开请求区间
    pub fn resolve(&self, now_ms: i64) -> Option<MsRange> {
        MsRange::new(self.start_ms, self.end_ms.unwrap_or(now_ms))
    }
}

fn parse_bound(raw: &str, is_end: bool) -> SchedulerResult<i64> {
    let raw = raw.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y%m%d_%H%M%S") {
        return Ok(dt.to_epoch_millis());
    }
    let date = NaiveDate::parse_from_str(raw, "%Y%m%d")
        .map_err(|_| SchedulerError::config(format!("无法解析的日期: {raw}")))?;
    let date = if is_end {
        date.checked_add_days(Days::new(1))
            .ok_or_else(|| SchedulerError::config(format!("日期超出范围: {raw}")))?
    } else {
        date
    };
    Ok(date.to_epoch_millis())
}

impl FromStr for TimeRange {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end_ms {
            Some(end) => write!(f, "[{}, {})", format_ms(self.start_ms), format_ms(end)),
            None => write!(f, "[{}, now)", format_ms(self.start_ms)),
        }
    }
}
