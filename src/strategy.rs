//! 回測策略
//!
//! 策略只接收 K 線與參數，回傳訊號與績效指標；
//! 資料載入與結果保存由工作者負責。
pub mod buy_and_hold;
pub mod metrics;
pub mod registry;

use crate::market_data::Candle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use buy_and_hold::BuyAndHold;
pub use metrics::{calculate_metrics, TradeMetrics};
pub use registry::StrategyRegistry;

#[derive(Error, Debug, PartialEq)]
pub enum StrategyError {
    #[error("參數錯誤: {0}")]
    InvalidParameter(String),

    #[error("資料不足: 需要 {needed} 根 K 線，實際 {got} 根")]
    InsufficientData { needed: usize, got: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

/// 交易訊號
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub timestamp: DateTime<Utc>,
    pub side: Side,
    pub price: f64,
    /// 0.0 ~ 1.0
    pub confidence: f64,
}

/// 單一代碼的策略結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyResult {
    pub signals: Vec<Signal>,
    #[serde(flatten)]
    pub metrics: TradeMetrics,
}

impl StrategyResult {
    pub fn samples(&self) -> usize {
        self.signals.len()
    }
}

pub trait Strategy: Send + Sync {
    /// 註冊名稱，例如 `buy_and_hold`
    fn name(&self) -> &str;

    /// K 線依時間遞增
    fn run(&self, candles: &[Candle], params: &serde_json::Value) -> Result<StrategyResult, StrategyError>;
}
