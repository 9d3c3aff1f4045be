use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 擷取工作的觸發來源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    Scheduled,
    Manual,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Scheduled => "scheduled",
            TriggerSource::Manual => "manual",
        }
    }
}

/// 行情擷取工作
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionJob {
    /// 資料代碼，如 `BTC_KRW`
    pub symbols: Vec<String>,
    pub timeframes: Vec<String>,
    /// 回溯天數
    pub days: u32,
    pub overwrite: bool,
    pub trigger: TriggerSource,
}

/// 回測執行工作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestJob {
    pub task_id: Uuid,
    pub strategy: String,
    pub symbols: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub timeframe: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// 佇列中的工作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "job_type", rename_all = "snake_case")]
pub enum JobDescriptor {
    Ingestion(IngestionJob),
    Backtest(BacktestJob),
}

impl JobDescriptor {
    pub fn kind(&self) -> &'static str {
        match self {
            JobDescriptor::Ingestion(_) => "ingestion",
            JobDescriptor::Backtest(_) => "backtest",
        }
    }

    pub fn task_id(&self) -> Option<Uuid> {
        match self {
            JobDescriptor::Backtest(job) => Some(job.task_id),
            JobDescriptor::Ingestion(_) => None,
        }
    }
}
