use serde::{Deserialize, Serialize};
use std::fmt;

use crate::timestamp::format_ms;

/// 半开毫秒区间 `[start, end)`，构造时保证 `start < end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawMsRange")]
pub struct MsRange {
    start: i64,
    end: i64,
}

#[derive(Deserialize)]
struct RawMsRange {
    start: i64,
    end: i64,
}

impl TryFrom<RawMsRange> for MsRange {
    type Error = String;

    fn try_from(raw: RawMsRange) -> Result<Self, Self::Error> {
        MsRange::new(raw.start, raw.end)
            .ok_or_else(|| format!("empty range: start {} >= end {}", raw.start, raw.end))
    }
}

impl MsRange {
    /// 空区间返回 None
    pub fn new(start: i64, end: i64) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    pub fn len_ms(&self) -> i64 {
        self.end - self.start
    }

    pub fn contains(&self, ms: i64) -> bool {
        self.start <= ms && ms < self.end
    }

    pub fn contains_range(&self, other: &MsRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn overlaps(&self, other: &MsRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn intersect(&self, other: &MsRange) -> Option<MsRange> {
        MsRange::new(self.start.max(other.start), self.end.min(other.end))
    }
}

impl fmt::Display for MsRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", format_ms(self.start), format_ms(self.end))
    }
}

/// 已持久化数据的覆盖范围
///
/// 内部区间始终有序、互不相交，并且相邻区间会被合并。覆盖范围不在核心中缓存，
/// 每次运行都从存储插件重新获取。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawCoverage")]
pub struct Coverage {
    ranges: Vec<MsRange>,
}

#[derive(Deserialize)]
struct RawCoverage {
    #[serde(default)]
    ranges: Vec<MsRange>,
}

impl From<RawCoverage> for Coverage {
    fn from(raw: RawCoverage) -> Self {
        Coverage::from_ranges(raw.ranges)
    }
}

impl Coverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ranges<I: IntoIterator<Item = MsRange>>(ranges: I) -> Self {
        let mut ranges: Vec<MsRange> = ranges.into_iter().collect();
        ranges.sort();

        let mut merged: Vec<MsRange> = Vec::with_capacity(ranges.len());
        for range in ranges {
            match merged.last_mut() {
                Some(last) if range.start <= last.end => {
                    last.end = last.end.max(range.end);
                }
                _ => merged.push(range),
            }
        }
        Self { ranges: merged }
    }

    pub fn insert(&mut self, range: MsRange) {
        let mut ranges = std::mem::take(&mut self.ranges);
        ranges.push(range);
        *self = Self::from_ranges(ranges);
    }

    /// 与请求区间求交，结果同样是规范化的覆盖集合
    pub fn intersect(&self, request: &MsRange) -> Coverage {
        Coverage {
            ranges: self
                .ranges
                .iter()
                .filter_map(|r| r.intersect(request))
                .collect(),
        }
    }

    pub fn ranges(&self) -> &[MsRange] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn covered_ms(&self) -> i64 {
        self.ranges.iter().map(MsRange::len_ms).sum()
    }

    pub fn covers(&self, range: &MsRange) -> bool {
        self.ranges.iter().any(|r| r.contains_range(range))
    }
}
