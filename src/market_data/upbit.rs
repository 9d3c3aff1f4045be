//! Upbit 公開 K 線 API
//!
//! 由新到舊分頁往回取，直到涵蓋要求的起始時間。
//! 每次請求之間保留固定間隔；429 與 5xx 以指數退避重試。
use crate::config::MarketDataConfig;
use crate::market_data::candle::{dedup_sorted, Candle};
use crate::market_data::source::{CandleSource, SourceError};
use crate::market_data::timeframe::Timeframe;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Upbit candles API 回應的單筆資料
#[derive(Debug, Deserialize)]
struct UpbitCandle {
    candle_date_time_utc: String,
    opening_price: f64,
    high_price: f64,
    low_price: f64,
    trade_price: f64,
    candle_acc_trade_volume: f64,
}

#[derive(Debug, Deserialize)]
struct UpbitErrorBody {
    error: UpbitErrorDetail,
}

#[derive(Debug, Deserialize)]
struct UpbitErrorDetail {
    #[serde(default)]
    name: String,
    #[serde(default)]
    message: String,
}

impl UpbitCandle {
    fn into_candle(self) -> Result<Candle, SourceError> {
        let naive = NaiveDateTime::parse_from_str(&self.candle_date_time_utc, "%Y-%m-%dT%H:%M:%S").map_err(|e| {
            SourceError::InvalidResponse(format!("無法解析時間 {}: {}", self.candle_date_time_utc, e))
        })?;
        Ok(Candle {
            timestamp: naive.and_utc(),
            open: self.opening_price,
            high: self.high_price,
            low: self.low_price,
            close: self.trade_price,
            volume: self.candle_acc_trade_volume,
        })
    }
}

/// Upbit K 線來源
pub struct UpbitCandleSource {
    client: reqwest::Client,
    base_url: String,
    page_size: u32,
    request_interval: Duration,
    max_retries: u32,
    base_delay: Duration,
}

impl UpbitCandleSource {
    pub fn new(config: &MarketDataConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("backtest-orchestrator/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SourceError::Other(format!("無法建立 HTTP 客戶端: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            page_size: config.page_size,
            request_interval: Duration::from_millis(config.request_interval_ms),
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(500),
        })
    }

    fn candles_url(&self, timeframe: Timeframe) -> String {
        format!("{}/candles/{}", self.base_url, timeframe.upbit_endpoint())
    }

    /// 取得 `to` 之前的一頁資料（由新到舊）
    async fn fetch_page(
        &self,
        market: &str,
        timeframe: Timeframe,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>, SourceError> {
        let url = self.candles_url(timeframe);
        let to_param = to.format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let count = self.page_size.to_string();
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = match &last_error {
                    Some(SourceError::RateLimited { retry_after_secs }) => Duration::from_secs(*retry_after_secs),
                    _ => self.base_delay * 2u32.pow(attempt - 1) + Duration::from_millis(rand::random_range(0..250)),
                };
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .get(&url)
                .query(&[("market", market), ("count", count.as_str()), ("to", to_param.as_str())])
                .send()
                .await;

            let response = match response {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() => {
                    warn!(market, attempt, error = %e, "Upbit 連線失敗，準備重試");
                    last_error = Some(SourceError::Network(e.to_string()));
                    continue;
                }
                Err(e) => return Err(SourceError::Network(e.to_string())),
            };

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(1);
                warn!(market, attempt, retry_after, "Upbit 限流");
                last_error = Some(SourceError::RateLimited {
                    retry_after_secs: retry_after,
                });
                continue;
            }
            if status.is_server_error() {
                last_error = Some(SourceError::Network(format!("HTTP {} for {}", status, market)));
                continue;
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(match serde_json::from_str::<UpbitErrorBody>(&body) {
                    Ok(err) if status == StatusCode::NOT_FOUND || err.error.name.contains("market") => {
                        SourceError::SymbolNotFound(format!("{}: {}", market, err.error.message))
                    }
                    Ok(err) => SourceError::Other(format!("{}: {}", err.error.name, err.error.message)),
                    Err(_) => SourceError::Other(format!("HTTP {}: {}", status, body)),
                });
            }

            let page: Vec<UpbitCandle> = response
                .json()
                .await
                .map_err(|e| SourceError::InvalidResponse(format!("{}: {}", market, e)))?;
            return page.into_iter().map(UpbitCandle::into_candle).collect();
        }

        Err(last_error.unwrap_or_else(|| SourceError::Other("超過最大重試次數".into())))
    }
}

#[async_trait]
impl CandleSource for UpbitCandleSource {
    fn name(&self) -> &str {
        "upbit"
    }

    async fn fetch_candles(
        &self,
        market: &str,
        timeframe: Timeframe,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Candle>, SourceError> {
        let mut collected = Vec::new();
        let mut cursor = until;
        let mut pages = 0;

        loop {
            if pages > 0 {
                tokio::time::sleep(self.request_interval).await;
            }
            let page = self.fetch_page(market, timeframe, cursor).await?;
            pages += 1;

            let Some(oldest) = page.iter().map(|c| c.timestamp).min() else {
                break;
            };
            let page_len = page.len();
            collected.extend(page.into_iter().filter(|c| c.timestamp >= since && c.timestamp <= until));

            if oldest <= since || page_len < self.page_size as usize || oldest >= cursor {
                break;
            }
            cursor = oldest;
        }

        debug!(market, timeframe = %timeframe, pages, count = collected.len(), "Upbit K 線取得完成");
        Ok(dedup_sorted(collected))
    }
}
