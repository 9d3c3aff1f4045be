//! Candle 與 polars DataFrame / Parquet 之間的轉換
use crate::market_data::candle::Candle;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use polars::prelude::*;
use std::io::Cursor;

/// 行情檔必須具備的欄位
pub const REQUIRED_COLUMNS: [&str; 6] = ["timestamp", "open", "high", "low", "close", "volume"];

const PARQUET_MAGIC: &[u8; 4] = b"PAR1";

/// 依檔頭判斷是否為 Parquet
pub fn is_parquet(bytes: &[u8]) -> bool {
    bytes.len() >= 8 && bytes.starts_with(PARQUET_MAGIC) && bytes.ends_with(PARQUET_MAGIC)
}

/// 讀取 Parquet 位元組
pub fn read_parquet(bytes: &[u8]) -> PolarsResult<DataFrame> {
    ParquetReader::new(Cursor::new(bytes.to_vec())).finish()
}

/// 讀取 CSV 位元組（有標題列）
pub fn read_csv(bytes: &[u8]) -> PolarsResult<DataFrame> {
    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(1000))
        .into_reader_with_file_handle(Cursor::new(bytes.to_vec()))
        .finish()
}

/// 將欄位名稱統一為小寫
pub fn lowercase_columns(df: &mut DataFrame) -> PolarsResult<()> {
    let names: Vec<String> = df.get_column_names().iter().map(|n| n.to_string()).collect();
    for name in names {
        let lower = name.to_lowercase();
        if lower != name {
            df.rename(&name, lower.into())?;
        }
    }
    Ok(())
}

/// 缺少的必要欄位（不分大小寫）
pub fn missing_columns(df: &DataFrame) -> Vec<&'static str> {
    let present: Vec<String> = df.get_column_names().iter().map(|n| n.to_lowercase()).collect();
    REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|required| !present.iter().any(|p| p == required))
        .collect()
}

/// 將 K 線寫成 Parquet 位元組
pub fn candles_to_parquet(candles: &[Candle]) -> PolarsResult<Vec<u8>> {
    let mut df = candles_to_frame(candles)?;
    dataframe_to_parquet(&mut df)
}

pub fn dataframe_to_parquet(df: &mut DataFrame) -> PolarsResult<Vec<u8>> {
    let mut buf = Vec::new();
    ParquetWriter::new(&mut buf).finish(df)?;
    Ok(buf)
}

pub fn candles_to_frame(candles: &[Candle]) -> PolarsResult<DataFrame> {
    let timestamps: Vec<i64> = candles.iter().map(|c| c.timestamp.timestamp_millis()).collect();
    let timestamp = Series::new("timestamp".into(), timestamps)
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?;

    DataFrame::new(vec![
        timestamp.into(),
        Column::new("open".into(), candles.iter().map(|c| c.open).collect::<Vec<f64>>()),
        Column::new("high".into(), candles.iter().map(|c| c.high).collect::<Vec<f64>>()),
        Column::new("low".into(), candles.iter().map(|c| c.low).collect::<Vec<f64>>()),
        Column::new("close".into(), candles.iter().map(|c| c.close).collect::<Vec<f64>>()),
        Column::new("volume".into(), candles.iter().map(|c| c.volume).collect::<Vec<f64>>()),
    ])
}

/// 讀取 DataFrame 為 K 線，時間欄可為 Datetime、Date、整數毫秒或字串
pub fn frame_to_candles(df: &DataFrame) -> PolarsResult<Vec<Candle>> {
    let mut df = df.clone();
    lowercase_columns(&mut df)?;

    let timestamps = timestamp_millis(df.column("timestamp")?)?;
    let open = float_values(df.column("open")?)?;
    let high = float_values(df.column("high")?)?;
    let low = float_values(df.column("low")?)?;
    let close = float_values(df.column("close")?)?;
    let volume = float_values(df.column("volume")?)?;

    let mut candles = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let (Some(ts), Some(o), Some(h), Some(l), Some(c)) = (timestamps[i], open[i], high[i], low[i], close[i])
        else {
            continue;
        };
        let Some(timestamp) = DateTime::<Utc>::from_timestamp_millis(ts) else {
            continue;
        };
        candles.push(Candle {
            timestamp,
            open: o,
            high: h,
            low: l,
            close: c,
            volume: volume[i].unwrap_or(0.0),
        });
    }
    Ok(candles)
}

fn float_values(column: &Column) -> PolarsResult<Vec<Option<f64>>> {
    let casted = column.cast(&DataType::Float64)?;
    Ok(casted.as_materialized_series().f64()?.into_iter().collect())
}

fn timestamp_millis(column: &Column) -> PolarsResult<Vec<Option<i64>>> {
    match column.dtype() {
        DataType::Datetime(unit, _) => {
            let divisor = match unit {
                TimeUnit::Milliseconds => 1,
                TimeUnit::Microseconds => 1_000,
                TimeUnit::Nanoseconds => 1_000_000,
            };
            let raw = column.cast(&DataType::Int64)?;
            Ok(raw
                .as_materialized_series()
                .i64()?
                .into_iter()
                .map(|v| v.map(|v| v / divisor))
                .collect())
        }
        DataType::Date => {
            // 自 epoch 起算的天數
            let raw = column.cast(&DataType::Int32)?;
            Ok(raw
                .as_materialized_series()
                .i32()?
                .into_iter()
                .map(|v| v.map(|d| i64::from(d) * 86_400_000))
                .collect())
        }
        DataType::String => Ok(column
            .as_materialized_series()
            .str()?
            .into_iter()
            .map(|v| v.and_then(parse_timestamp_str))
            .collect()),
        _ => {
            let raw = column.cast(&DataType::Int64)?;
            Ok(raw.as_materialized_series().i64()?.into_iter().collect())
        }
    }
}

/// 解析常見的時間字串格式
pub fn parse_timestamp_str(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp_millis());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Vec<Candle> {
        (1..=3)
            .map(|d| Candle {
                timestamp: Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap(),
                open: 1.0,
                high: 2.0,
                low: 0.5,
                close: 1.5 + d as f64,
                volume: 10.0,
            })
            .collect()
    }

    #[test]
    fn test_parquet_bytes_have_magic_and_columns() {
        let bytes = candles_to_parquet(&sample()).unwrap();
        assert!(is_parquet(&bytes));

        let df = read_parquet(&bytes).unwrap();
        assert!(missing_columns(&df).is_empty());
        let candles = frame_to_candles(&df).unwrap();
        assert_eq!(candles, sample());
    }

    #[test]
    fn test_csv_with_string_timestamps() {
        let csv = "Timestamp,Open,High,Low,Close,Volume\n2024-01-01,1,2,0.5,1.5,10\n2024-01-02 00:00:00,1,2,0.5,1.6,11\n";
        let df = read_csv(csv.as_bytes()).unwrap();
        assert!(missing_columns(&df).is_empty());

        let candles = frame_to_candles(&df).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[1].timestamp, Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_missing_columns_reported() {
        let csv = "timestamp,open,close\n2024-01-01,1,2\n";
        let df = read_csv(csv.as_bytes()).unwrap();
        assert_eq!(missing_columns(&df), vec!["high", "low", "volume"]);
    }

    #[test]
    fn test_parse_timestamp_str() {
        assert_eq!(parse_timestamp_str("1970-01-01T00:00:01Z"), Some(1000));
        assert_eq!(parse_timestamp_str("1970-01-02"), Some(86_400_000));
        assert_eq!(parse_timestamp_str("not a date"), None);
    }
}
