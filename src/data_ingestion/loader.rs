use crate::artifact::{ArtifactKey, ArtifactStore};
use crate::error::{OrchestratorError, Result};
use crate::market_data::{dedup_sorted, frame, Candle};
use chrono::{Datelike, NaiveDate};
use std::ops::RangeInclusive;
use tracing::debug;

/// 日期區間涵蓋的年份
pub fn years_between(start: NaiveDate, end: NaiveDate) -> RangeInclusive<i32> {
    start.year()..=end.year()
}

/// 讀取單一年份檔；不存在時回傳 `None`
pub fn read_year(store: &ArtifactStore, key: &ArtifactKey) -> Result<Option<Vec<Candle>>> {
    let relative = key.relative_path();
    if !store.exists(&relative)? {
        return Ok(None);
    }
    let bytes = store.read(&relative)?;
    let df = frame::read_parquet(&bytes)
        .map_err(|e| OrchestratorError::Schema(format!("無法讀取 {}: {}", key, e)))?;
    let candles =
        frame::frame_to_candles(&df).map_err(|e| OrchestratorError::Schema(format!("{} 欄位格式錯誤: {}", key, e)))?;
    Ok(Some(candles))
}

/// 載入 `[start, end]`（含）內的 K 線，跨年份合併並依時間排序
pub fn load_candles(
    store: &ArtifactStore,
    symbol: &str,
    timeframe: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<Candle>> {
    let mut candles = Vec::new();
    for year in years_between(start, end) {
        let key = ArtifactKey::new(symbol, timeframe, year)?;
        if let Some(year_candles) = read_year(store, &key)? {
            candles.extend(year_candles.into_iter().filter(|c| {
                let date = c.timestamp.date_naive();
                date >= start && date <= end
            }));
        }
    }
    let candles = dedup_sorted(candles);
    debug!(symbol, timeframe, %start, %end, rows = candles.len(), "載入行情資料");
    Ok(candles)
}

/// 區間內是否至少有一個年份檔
pub fn has_data(store: &ArtifactStore, symbol: &str, timeframe: &str, start: NaiveDate, end: NaiveDate) -> Result<bool> {
    for year in years_between(start, end) {
        let key = ArtifactKey::new(symbol, timeframe, year)?;
        if store.exists(&key.relative_path())? {
            return Ok(true);
        }
    }
    Ok(false)
}
