use crate::error::{OrchestratorError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 回測任務狀態
///
/// `Running` 為初始狀態，`Completed` 與 `Failed` 為終態。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Running)
    }

    /// 唯一合法的轉換是 running → completed | failed
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Running, TaskStatus::Completed) | (TaskStatus::Running, TaskStatus::Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(OrchestratorError::Validation(format!("未知的任務狀態: {}", other))),
        }
    }
}

/// 回測任務記錄
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestTask {
    pub task_id: Uuid,
    pub strategy: String,
    pub symbols: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub timeframe: Option<String>,
    pub status: TaskStatus,
    pub artifact_path: Option<String>,
    pub file_size: Option<i64>,
    pub record_count: Option<i32>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BacktestTask {
    /// 失敗原因，只有 failed 任務才有
    pub fn failure_reason(&self) -> Option<&str> {
        self.metadata.get("error").and_then(|v| v.as_str())
    }
}

/// 資料庫列，狀態以字串儲存
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskRow {
    pub task_id: Uuid,
    pub strategy: String,
    pub symbols: Json<Vec<String>>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub timeframe: Option<String>,
    pub status: String,
    pub artifact_path: Option<String>,
    pub file_size: Option<i64>,
    pub record_count: Option<i32>,
    pub metadata: Json<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for BacktestTask {
    type Error = OrchestratorError;

    fn try_from(row: TaskRow) -> Result<Self> {
        let status = row
            .status
            .parse::<TaskStatus>()
            .map_err(|_| OrchestratorError::Internal(format!("資料庫中的任務狀態無效: {}", row.status)))?;

        Ok(Self {
            task_id: row.task_id,
            strategy: row.strategy,
            symbols: row.symbols.0,
            start_date: row.start_date,
            end_date: row.end_date,
            timeframe: row.timeframe,
            status,
            artifact_path: row.artifact_path,
            file_size: row.file_size,
            record_count: row.record_count,
            metadata: row.metadata.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// 任務插入模型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInsert {
    pub task_id: Uuid,
    pub strategy: String,
    pub symbols: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub timeframe: Option<String>,
    pub metadata: serde_json::Value,
}

impl TaskInsert {
    /// 建立新任務並產生 task_id
    pub fn new(
        strategy: impl Into<String>,
        symbols: Vec<String>,
        start_date: NaiveDate,
        end_date: NaiveDate,
        timeframe: Option<String>,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            strategy: strategy.into(),
            symbols,
            start_date,
            end_date,
            timeframe,
            metadata: serde_json::json!({}),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// 插入前的欄位檢查，與資料表約束一致
    pub fn validate(&self) -> Result<()> {
        let strategy = self.strategy.trim();
        if strategy.is_empty() {
            return Err(OrchestratorError::Validation("strategy 不可為空".into()));
        }
        if strategy.chars().count() > 100 {
            return Err(OrchestratorError::Validation("strategy 長度不可超過 100".into()));
        }
        if self.symbols.is_empty() || self.symbols.iter().any(|s| s.trim().is_empty()) {
            return Err(OrchestratorError::Validation("symbols 至少需要一個非空代碼".into()));
        }
        if self.start_date > self.end_date {
            return Err(OrchestratorError::Validation(format!(
                "start_date {} 晚於 end_date {}",
                self.start_date, self.end_date
            )));
        }
        if let Some(tf) = &self.timeframe {
            if tf.is_empty() || tf.chars().count() > 10 {
                return Err(OrchestratorError::Validation(format!("timeframe 無效: {:?}", tf)));
            }
        }
        if !self.metadata.is_object() {
            return Err(OrchestratorError::Validation("metadata 必須是物件".into()));
        }
        Ok(())
    }
}

/// 終態轉換內容
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalUpdate {
    Completed {
        artifact_path: String,
        file_size: i64,
        record_count: i32,
    },
    Failed {
        reason: String,
    },
}

impl TerminalUpdate {
    pub fn target_status(&self) -> TaskStatus {
        match self {
            TerminalUpdate::Completed { .. } => TaskStatus::Completed,
            TerminalUpdate::Failed { .. } => TaskStatus::Failed,
        }
    }
}

/// 任務查詢條件
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub strategy: Option<String>,
    /// 包含此代碼的任務
    pub symbol: Option<String>,
    /// 回測區間與此範圍重疊的任務
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    pub limit: i64,
    pub offset: i64,
}

impl TaskFilter {
    pub const DEFAULT_LIMIT: i64 = 50;
    pub const MAX_LIMIT: i64 = 500;

    pub fn new() -> Self {
        Self {
            limit: Self::DEFAULT_LIMIT,
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn with_date_range(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.date_range = Some((start, end));
        self
    }

    pub fn paginate(mut self, limit: i64, offset: i64) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    /// 修正分頁參數到合法範圍
    pub fn effective_limit(&self) -> i64 {
        if self.limit <= 0 {
            Self::DEFAULT_LIMIT
        } else {
            self.limit.min(Self::MAX_LIMIT)
        }
    }

    pub fn effective_offset(&self) -> i64 {
        self.offset.max(0)
    }

    /// 記憶體內比對，與 SQL 條件語意相同
    pub fn matches(&self, task: &BacktestTask) -> bool {
        if let Some(status) = self.status {
            if task.status != status {
                return false;
            }
        }
        if let Some(strategy) = &self.strategy {
            if &task.strategy != strategy {
                return false;
            }
        }
        if let Some(symbol) = &self.symbol {
            if !task.symbols.iter().any(|s| s == symbol) {
                return false;
            }
        }
        if let Some((start, end)) = self.date_range {
            if task.end_date < start || task.start_date > end {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_status_transitions() {
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::Running));
        assert!(!TaskStatus::Running.can_transition_to(TaskStatus::Running));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("Completed".parse::<TaskStatus>().unwrap(), TaskStatus::Completed);
        assert_matches!("done".parse::<TaskStatus>(), Err(OrchestratorError::Validation(_)));
    }

    #[test]
    fn test_insert_validation() {
        let ok = TaskInsert::new("buy_and_hold", vec!["BTC_KRW".into()], date("2024-01-01"), date("2024-12-31"), None);
        assert!(ok.validate().is_ok());

        let inverted = TaskInsert::new("buy_and_hold", vec!["BTC_KRW".into()], date("2024-06-01"), date("2024-01-01"), None);
        assert_matches!(inverted.validate(), Err(OrchestratorError::Validation(_)));

        let no_symbols = TaskInsert::new("buy_and_hold", vec![], date("2024-01-01"), date("2024-01-02"), None);
        assert_matches!(no_symbols.validate(), Err(OrchestratorError::Validation(_)));

        let no_strategy = TaskInsert::new("  ", vec!["A".into()], date("2024-01-01"), date("2024-01-02"), None);
        assert_matches!(no_strategy.validate(), Err(OrchestratorError::Validation(_)));

        let same_day = TaskInsert::new("s", vec!["A".into()], date("2024-01-01"), date("2024-01-01"), Some("1D".into()));
        assert!(same_day.validate().is_ok());
    }

    #[test]
    fn test_filter_effective_limit() {
        assert_eq!(TaskFilter::default().effective_limit(), TaskFilter::DEFAULT_LIMIT);
        assert_eq!(TaskFilter::new().paginate(10_000, -5).effective_limit(), TaskFilter::MAX_LIMIT);
        assert_eq!(TaskFilter::new().paginate(10, -5).effective_offset(), 0);
    }
}
