use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// K 線週期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    Minute1,
    Minute3,
    Minute5,
    Minute10,
    Minute15,
    Minute30,
    Hour1,
    Hour4,
    Day1,
    Week1,
    Month1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 11] = [
        Timeframe::Minute1,
        Timeframe::Minute3,
        Timeframe::Minute5,
        Timeframe::Minute10,
        Timeframe::Minute15,
        Timeframe::Minute30,
        Timeframe::Hour1,
        Timeframe::Hour4,
        Timeframe::Day1,
        Timeframe::Week1,
        Timeframe::Month1,
    ];

    /// 儲存路徑使用的標籤
    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::Minute1 => "1M",
            Timeframe::Minute3 => "3M",
            Timeframe::Minute5 => "5M",
            Timeframe::Minute10 => "10M",
            Timeframe::Minute15 => "15M",
            Timeframe::Minute30 => "30M",
            Timeframe::Hour1 => "1H",
            Timeframe::Hour4 => "4H",
            Timeframe::Day1 => "1D",
            Timeframe::Week1 => "1W",
            Timeframe::Month1 => "1MO",
        }
    }

    /// Upbit candles API 的路徑片段
    pub fn upbit_endpoint(&self) -> &'static str {
        match self {
            Timeframe::Minute1 => "minutes/1",
            Timeframe::Minute3 => "minutes/3",
            Timeframe::Minute5 => "minutes/5",
            Timeframe::Minute10 => "minutes/10",
            Timeframe::Minute15 => "minutes/15",
            Timeframe::Minute30 => "minutes/30",
            Timeframe::Hour1 => "minutes/60",
            Timeframe::Hour4 => "minutes/240",
            Timeframe::Day1 => "days",
            Timeframe::Week1 => "weeks",
            Timeframe::Month1 => "months",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Timeframe {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_uppercase();
        Timeframe::ALL
            .iter()
            .copied()
            .find(|tf| tf.label() == upper)
            .or(match upper.as_str() {
                "60M" => Some(Timeframe::Hour1),
                "240M" => Some(Timeframe::Hour4),
                "D" => Some(Timeframe::Day1),
                "W" => Some(Timeframe::Week1),
                _ => None,
            })
            .ok_or_else(|| OrchestratorError::Validation(format!("不支援的週期: {:?}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1m", Timeframe::Minute1, "minutes/1")]
    #[case("5M", Timeframe::Minute5, "minutes/5")]
    #[case("1h", Timeframe::Hour1, "minutes/60")]
    #[case("4H", Timeframe::Hour4, "minutes/240")]
    #[case("1d", Timeframe::Day1, "days")]
    #[case("1W", Timeframe::Week1, "weeks")]
    #[case("1mo", Timeframe::Month1, "months")]
    fn test_parse_and_endpoint(#[case] raw: &str, #[case] tf: Timeframe, #[case] endpoint: &str) {
        let parsed: Timeframe = raw.parse().unwrap();
        assert_eq!(parsed, tf);
        assert_eq!(parsed.upbit_endpoint(), endpoint);
    }

    #[test]
    fn test_unknown_timeframe() {
        assert!("2D".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_labels_are_path_safe() {
        for tf in Timeframe::ALL {
            assert!(crate::artifact::normalize_timeframe(tf.label()).is_ok());
        }
    }
}
