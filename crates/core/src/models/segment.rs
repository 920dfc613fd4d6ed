use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::coverage::MsRange;
use super::timeframe::Timeframe;

/// 单行时间序列数据，`time` 为 UTC 毫秒时间戳
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub time: i64,
    #[serde(default)]
    pub values: BTreeMap<String, f64>,
}

impl Row {
    pub fn new(time: i64) -> Self {
        Self {
            time,
            values: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, key: impl Into<String>, value: f64) -> Self {
        self.values.insert(key.into(), value);
        self
    }
}

/// 从拉取阶段流向写入阶段的数据段，运行结束后不保留
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSegment {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub range: MsRange,
    pub rows: Vec<Row>,
}

impl DataSegment {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe, range: MsRange, rows: Vec<Row>) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            range,
            rows,
        }
    }

    /// 存储中的序列 ID，格式为 `{symbol}_{timeframe}`
    pub fn series_id(&self) -> String {
        series_id(&self.symbol, self.timeframe)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub fn series_id(symbol: &str, timeframe: Timeframe) -> String {
    format!("{symbol}_{timeframe}")
}
