//! 上傳檔案驗證器
//!
//! 外部檔案進入產物儲存之前的唯一關卡，依序檢查：
//! 路徑元件白名單、檔案大小、表格結構（必要欄位）。
//! 任何一步失敗都不會產生寫入。
use crate::artifact::{parse_year, ArtifactKey};
use crate::error::{OrchestratorError, Result};
use crate::market_data::frame::{self, REQUIRED_COLUMNS};
use serde::Serialize;
use tracing::debug;

/// 上傳請求
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub bytes: Vec<u8>,
    pub symbol: String,
    pub timeframe: String,
    pub year: String,
    pub overwrite: bool,
}

/// 上傳檔案格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadFormat {
    Parquet,
    Csv,
}

/// 通過驗證的上傳內容
#[derive(Debug, Clone)]
pub struct ValidatedUpload {
    pub key: ArtifactKey,
    /// 要寫入的 Parquet 位元組；CSV 會先轉為 Parquet
    pub parquet_bytes: Vec<u8>,
    pub format: UploadFormat,
    pub row_count: usize,
}

/// 上傳驗證器
#[derive(Debug, Clone)]
pub struct UploadValidator {
    max_bytes: u64,
}

impl UploadValidator {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// 只驗證路徑元件，不讀檔
    pub fn validate_key(&self, symbol: &str, timeframe: &str, year: &str) -> Result<ArtifactKey> {
        let year = parse_year(year)?;
        ArtifactKey::new(symbol, timeframe, year)
    }

    pub fn validate(&self, request: &UploadRequest) -> Result<ValidatedUpload> {
        let key = self.validate_key(&request.symbol, &request.timeframe, &request.year)?;

        let size = request.bytes.len() as u64;
        if size == 0 {
            return Err(OrchestratorError::Validation("上傳檔案為空".into()));
        }
        if size > self.max_bytes {
            return Err(OrchestratorError::Validation(format!(
                "檔案大小 {} 超過上限 {} 位元組",
                size, self.max_bytes
            )));
        }

        let (mut df, format) = if frame::is_parquet(&request.bytes) {
            let df = frame::read_parquet(&request.bytes)
                .map_err(|e| OrchestratorError::Schema(format!("無法讀取 Parquet 檔案: {}", e)))?;
            (df, UploadFormat::Parquet)
        } else {
            let df = frame::read_csv(&request.bytes)
                .map_err(|e| OrchestratorError::Schema(format!("檔案不是可讀取的 Parquet 或 CSV: {}", e)))?;
            (df, UploadFormat::Csv)
        };

        let missing = frame::missing_columns(&df);
        if !missing.is_empty() {
            return Err(OrchestratorError::Schema(format!(
                "缺少必要欄位: {}（需要 {}）",
                missing.join(", "),
                REQUIRED_COLUMNS.join(", ")
            )));
        }

        let row_count = df.height();
        let parquet_bytes = match format {
            UploadFormat::Parquet => request.bytes.clone(),
            UploadFormat::Csv => {
                frame::lowercase_columns(&mut df)
                    .and_then(|_| frame::dataframe_to_parquet(&mut df))
                    .map_err(|e| OrchestratorError::Schema(format!("CSV 轉換失敗: {}", e)))?
            }
        };

        debug!(key = %key, ?format, row_count, "上傳檔案驗證通過");
        Ok(ValidatedUpload {
            key,
            parquet_bytes,
            format,
            row_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::{candles_to_parquet, Candle};
    use assert_matches::assert_matches;
    use chrono::{TimeZone, Utc};
    use rstest::rstest;

    fn request(bytes: Vec<u8>, symbol: &str) -> UploadRequest {
        UploadRequest {
            bytes,
            symbol: symbol.into(),
            timeframe: "1d".into(),
            year: "2024".into(),
            overwrite: false,
        }
    }

    fn parquet() -> Vec<u8> {
        candles_to_parquet(&[Candle {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1.0,
        }])
        .unwrap()
    }

    #[test]
    fn test_valid_parquet() {
        let validated = UploadValidator::new(1024 * 1024).validate(&request(parquet(), "btc_krw")).unwrap();
        assert_eq!(validated.key.symbol, "BTC_KRW");
        assert_eq!(validated.key.timeframe, "1D");
        assert_eq!(validated.format, UploadFormat::Parquet);
        assert_eq!(validated.row_count, 1);
    }

    #[test]
    fn test_csv_is_converted() {
        let csv = b"timestamp,open,high,low,close,volume\n2024-01-01,1,2,0.5,1.5,10\n".to_vec();
        let validated = UploadValidator::new(1024).validate(&request(csv, "BTC_KRW")).unwrap();
        assert_eq!(validated.format, UploadFormat::Csv);
        assert!(frame::is_parquet(&validated.parquet_bytes));
    }

    #[rstest]
    #[case("../../../ETC")]
    #[case("BTC/../../x")]
    #[case("..\\..\\win")]
    fn test_traversal_rejected(#[case] symbol: &str) {
        let result = UploadValidator::new(1024 * 1024).validate(&request(parquet(), symbol));
        assert_matches!(result, Err(OrchestratorError::Validation(_)));
    }

    #[test]
    fn test_missing_columns_is_schema_error() {
        let csv = b"timestamp,open,close\n2024-01-01,1,2\n".to_vec();
        let result = UploadValidator::new(1024).validate(&request(csv, "BTC_KRW"));
        assert_matches!(result, Err(OrchestratorError::Schema(msg)) if msg.contains("high"));
    }

    #[test]
    fn test_size_limits() {
        let validator = UploadValidator::new(8);
        assert_matches!(
            validator.validate(&request(vec![], "BTC_KRW")),
            Err(OrchestratorError::Validation(_))
        );
        assert_matches!(
            validator.validate(&request(vec![b'a'; 9], "BTC_KRW")),
            Err(OrchestratorError::Validation(_))
        );
    }

    #[test]
    fn test_bad_year_rejected() {
        let mut req = request(parquet(), "BTC_KRW");
        req.year = "24".into();
        assert_matches!(
            UploadValidator::new(1024 * 1024).validate(&req),
            Err(OrchestratorError::Validation(_))
        );
    }
}
