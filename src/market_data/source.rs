use crate::market_data::candle::Candle;
use crate::market_data::timeframe::Timeframe;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// 行情來源錯誤
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("找不到市場代碼: {0}")]
    SymbolNotFound(String),

    #[error("請求過於頻繁，{retry_after_secs} 秒後重試")]
    RateLimited { retry_after_secs: u64 },

    #[error("網路錯誤: {0}")]
    Network(String),

    #[error("回應格式錯誤: {0}")]
    InvalidResponse(String),

    #[error("行情來源錯誤: {0}")]
    Other(String),
}

impl SourceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::RateLimited { .. } | SourceError::Network(_))
    }
}

/// K 線資料來源
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CandleSource: Send + Sync {
    fn name(&self) -> &str;

    /// 取得 `[since, until]` 區間的 K 線，依時間遞增
    async fn fetch_candles(
        &self,
        market: &str,
        timeframe: Timeframe,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Candle>, SourceError>;
}

/// `KRW-BTC` → `BTC_KRW`，已是儲存格式時原樣回傳
pub fn to_data_symbol(market: &str) -> String {
    let upper = market.trim().to_uppercase();
    match upper.split_once('-') {
        Some((quote, base)) if !quote.is_empty() && !base.is_empty() => format!("{}_{}", base, quote),
        _ => upper,
    }
}

/// `BTC_KRW` → `KRW-BTC`，已是交易所格式時原樣回傳
pub fn to_market_code(symbol: &str) -> String {
    let upper = symbol.trim().to_uppercase();
    if upper.contains('-') {
        return upper;
    }
    match upper.rsplit_once('_') {
        Some((base, quote)) if !quote.is_empty() && !base.is_empty() => format!("{}-{}", quote, base),
        _ => upper,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("KRW-BTC", "BTC_KRW")]
    #[case("krw-eth", "ETH_KRW")]
    #[case("BTC_KRW", "BTC_KRW")]
    fn test_to_data_symbol(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(to_data_symbol(raw), expected);
    }

    #[rstest]
    #[case("BTC_KRW", "KRW-BTC")]
    #[case("KRW-BTC", "KRW-BTC")]
    #[case("btc_krw", "KRW-BTC")]
    fn test_to_market_code(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(to_market_code(raw), expected);
    }
}
