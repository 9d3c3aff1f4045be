use crate::market_data::Candle;
use crate::strategy::metrics::calculate_metrics;
use crate::strategy::{Side, Signal, Strategy, StrategyError, StrategyResult};

/// 第一根收盤買進、最後一根收盤賣出
///
/// 參數 `hold_bars`（可選）：每次持有的 K 線數，到期賣出後下一根重新買進。
#[derive(Debug, Default, Clone, Copy)]
pub struct BuyAndHold;

impl BuyAndHold {
    pub const NAME: &'static str = "buy_and_hold";

    fn hold_bars(params: &serde_json::Value, len: usize) -> Result<usize, StrategyError> {
        match params.get("hold_bars") {
            None | Some(serde_json::Value::Null) => Ok(len.saturating_sub(1).max(1)),
            Some(v) => match v.as_u64() {
                Some(n) if n >= 1 => Ok(n as usize),
                _ => Err(StrategyError::InvalidParameter(format!(
                    "hold_bars 必須是正整數，收到 {}",
                    v
                ))),
            },
        }
    }
}

impl Strategy for BuyAndHold {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn run(&self, candles: &[Candle], params: &serde_json::Value) -> Result<StrategyResult, StrategyError> {
        if candles.len() < 2 {
            return Err(StrategyError::InsufficientData {
                needed: 2,
                got: candles.len(),
            });
        }
        let hold = Self::hold_bars(params, candles.len())?;

        let mut signals = Vec::new();
        let mut returns = Vec::new();
        let mut entry = 0;
        while entry + hold < candles.len() {
            let exit = entry + hold;
            let (buy, sell) = (&candles[entry], &candles[exit]);
            signals.push(Signal {
                timestamp: buy.timestamp,
                side: Side::Buy,
                price: buy.close,
                confidence: 1.0,
            });
            signals.push(Signal {
                timestamp: sell.timestamp,
                side: Side::Sell,
                price: sell.close,
                confidence: 1.0,
            });
            if buy.close > 0.0 {
                returns.push((sell.close - buy.close) / buy.close * 100.0);
            }
            entry = exit + 1;
        }

        Ok(StrategyResult {
            signals,
            metrics: calculate_metrics(&returns, hold as f64),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    fn candles(closes: &[f64]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| Candle {
                timestamp: start + Duration::days(i as i64),
                open: *c,
                high: *c,
                low: *c,
                close: *c,
                volume: 1.0,
            })
            .collect()
    }

    #[test]
    fn test_whole_period() {
        let result = BuyAndHold.run(&candles(&[100.0, 90.0, 110.0]), &json!({})).unwrap();
        assert_eq!(result.samples(), 2);
        assert_eq!(result.metrics.trades, 1);
        assert!((result.metrics.avg_return - 10.0).abs() < 1e-9);
        assert_eq!(result.metrics.win_rate, 1.0);
    }

    #[test]
    fn test_hold_bars() {
        let result = BuyAndHold
            .run(&candles(&[100.0, 110.0, 100.0, 90.0, 95.0]), &json!({"hold_bars": 1}))
            .unwrap();
        // (0→1) +10%，(2→3) -10%，最後一根無法成交
        assert_eq!(result.metrics.trades, 2);
        assert_eq!(result.metrics.win_rate, 0.5);
    }

    #[test]
    fn test_invalid_inputs() {
        assert_eq!(
            BuyAndHold.run(&candles(&[1.0]), &json!({})),
            Err(StrategyError::InsufficientData { needed: 2, got: 1 })
        );
        assert!(matches!(
            BuyAndHold.run(&candles(&[1.0, 2.0]), &json!({"hold_bars": 0})),
            Err(StrategyError::InvalidParameter(_))
        ));
    }
}
