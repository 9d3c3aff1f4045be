use serde::{Deserialize, Serialize};

/// 交易績效指標，報酬以百分比表示
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TradeMetrics {
    pub trades: usize,
    /// 0.0 ~ 1.0
    pub win_rate: f64,
    pub avg_return: f64,
    /// 以正數表示的最大回撤
    pub max_drawdown: f64,
    pub avg_hold_bars: f64,
}

/// 由每筆交易的報酬計算指標，沒有交易時全部為 0
pub fn calculate_metrics(returns: &[f64], avg_hold_bars: f64) -> TradeMetrics {
    if returns.is_empty() {
        return TradeMetrics::default();
    }
    let n = returns.len() as f64;
    let wins = returns.iter().filter(|r| **r > 0.0).count() as f64;

    let mut cumulative = 0.0_f64;
    let mut peak = 0.0_f64;
    let mut max_drawdown = 0.0_f64;
    for r in returns {
        cumulative += r;
        peak = peak.max(cumulative);
        max_drawdown = max_drawdown.max(peak - cumulative);
    }

    TradeMetrics {
        trades: returns.len(),
        win_rate: wins / n,
        avg_return: returns.iter().sum::<f64>() / n,
        max_drawdown,
        avg_hold_bars: avg_hold_bars.max(0.0),
    }
}
