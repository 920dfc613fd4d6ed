use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::SchedulerError;

const HOUR_MS: i64 = 3_600_000;

/// K线周期
///
/// 仅支持 `1w`、`1d`、`4h`、`1h` 四种周期，序列化形式与字符串表示一致。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "1w")]
    W1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 4] = [Timeframe::W1, Timeframe::D1, Timeframe::H4, Timeframe::H1];

    /// 单个周期桶的毫秒长度
    pub fn as_millis(&self) -> i64 {
        match self {
            Timeframe::H1 => HOUR_MS,
            Timeframe::H4 => 4 * HOUR_MS,
            Timeframe::D1 => 24 * HOUR_MS,
            Timeframe::W1 => 7 * 24 * HOUR_MS,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
            Timeframe::W1 => "1w",
        }
    }
}

impl Default for Timeframe {
    fn default() -> Self {
        Timeframe::D1
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            "1w" => Ok(Timeframe::W1),
            other => Err(SchedulerError::config(format!(
                "不支持的时间周期: {other}，支持的周期: 1w, 1d, 4h, 1h"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        for tf in Timeframe::ALL {
            assert_eq!(tf.to_string().parse::<Timeframe>().unwrap(), tf);
        }
        assert_eq!("1D".parse::<Timeframe>().unwrap(), Timeframe::D1);
        assert!("15m".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_millis() {
        assert_eq!(Timeframe::D1.as_millis(), 86_400_000);
        assert_eq!(Timeframe::W1.as_millis(), 7 * Timeframe::D1.as_millis());
        assert_eq!(Timeframe::H4.as_millis(), 4 * Timeframe::H1.as_millis());
    }

    #[test]
    fn test_serde_uses_short_names() {
        let json = serde_json::to_string(&Timeframe::H4).unwrap();
        assert_eq!(json, "\"4h\"");
        let back: Timeframe = serde_json::from_str("\"1w\"").unwrap();
        assert_eq!(back, Timeframe::W1);
    }
}
