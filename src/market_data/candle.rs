use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// OHLCV K 線（時間為 UTC）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn year(&self) -> i32 {
        self.timestamp.year()
    }
}

/// 依時間排序並以時間戳去重，重複時保留後出現者
pub fn dedup_sorted(candles: Vec<Candle>) -> Vec<Candle> {
    let mut by_time: BTreeMap<i64, Candle> = BTreeMap::new();
    for candle in candles {
        by_time.insert(candle.timestamp.timestamp_millis(), candle);
    }
    by_time.into_values().collect()
}

/// 依 UTC 年份分組
pub fn split_by_year(candles: Vec<Candle>) -> BTreeMap<i32, Vec<Candle>> {
    let mut groups: BTreeMap<i32, Vec<Candle>> = BTreeMap::new();
    for candle in dedup_sorted(candles) {
        groups.entry(candle.year()).or_default().push(candle);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candle(y: i32, m: u32, d: u32, close: f64) -> Candle {
        Candle {
            timestamp: Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn test_split_by_year_dedups_and_sorts() {
        let groups = split_by_year(vec![
            candle(2024, 1, 2, 2.0),
            candle(2023, 12, 31, 1.0),
            candle(2024, 1, 1, 1.5),
            candle(2024, 1, 2, 2.5),
        ]);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[&2023].len(), 1);
        let y2024 = &groups[&2024];
        assert_eq!(y2024.len(), 2);
        assert!(y2024[0].timestamp < y2024[1].timestamp);
        assert_eq!(y2024[1].close, 2.5);
    }
}
