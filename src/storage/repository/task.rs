use crate::error::{OrchestratorError, Result};
use crate::storage::models::task::*;
use crate::storage::repository::{DbExecutor, Page};
use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// 回測任務儲存庫特徵
///
/// 終態轉換必須是原子的比較並設定：只有仍在 `running` 的任務會被更新，
/// 對同一 task_id 的並行呼叫最多只有一個成功。
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 插入一筆 running 任務
    async fn insert(&self, task: TaskInsert) -> Result<BacktestTask>;

    /// 根據ID獲取任務
    async fn get(&self, task_id: Uuid) -> Result<Option<BacktestTask>>;

    /// 依條件列出任務，依建立時間新到舊
    async fn list(&self, filter: &TaskFilter) -> Result<Page<BacktestTask>>;

    /// running → completed | failed
    ///
    /// 未知任務回傳 `NotFound`，已是終態回傳 `InvalidState`，
    /// 產物路徑與其他任務重複回傳 `Conflict`。
    async fn transition(&self, task_id: Uuid, update: TerminalUpdate) -> Result<BacktestTask>;

    /// 儲存層健康檢查
    async fn ping(&self) -> Result<()>;
}

const TASK_COLUMNS: &str = "task_id, strategy, symbols, start_date, end_date, timeframe, status, \
     artifact_path, file_size, record_count, metadata, created_at, updated_at";

/// PostgreSQL 任務儲存庫實現
pub struct PgTaskRepository {
    pool: Arc<PgPool>,
}

impl PgTaskRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// 更新 0 列時判斷是不存在還是已終態
    async fn explain_missed_transition(&self, task_id: Uuid) -> OrchestratorError {
        let status: std::result::Result<Option<String>, sqlx::Error> =
            sqlx::query_scalar("SELECT status FROM backtest_tasks WHERE task_id = $1")
                .bind(task_id)
                .fetch_optional(DbExecutor::get_pool(self))
                .await;

        match status {
            Ok(None) => OrchestratorError::NotFound(format!("任務 {} 不存在", task_id)),
            Ok(Some(status)) => {
                OrchestratorError::InvalidState(format!("任務 {} 已是終態 {}", task_id, status))
            }
            Err(e) => e.into(),
        }
    }

    fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, filter: &TaskFilter) {
        builder.push(" WHERE TRUE");
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(strategy) = &filter.strategy {
            builder.push(" AND strategy = ").push_bind(strategy.clone());
        }
        if let Some(symbol) = &filter.symbol {
            builder
                .push(" AND symbols @> ")
                .push_bind(Json(vec![symbol.clone()]))
                .push("::jsonb");
        }
        if let Some((start, end)) = filter.date_range {
            builder.push(" AND end_date >= ").push_bind(start);
            builder.push(" AND start_date <= ").push_bind(end);
        }
    }
}

impl DbExecutor for PgTaskRepository {
    fn get_pool(&self) -> &PgPool {
        &self.pool
    }
}

/// 唯一約束衝突轉為 Conflict，其餘保留為資料庫錯誤
fn map_write_error(err: sqlx::Error, context: &str) -> OrchestratorError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return OrchestratorError::Conflict(format!("{}: {}", context, db_err.message()));
        }
        if db_err.is_check_violation() {
            return OrchestratorError::Validation(format!("{}: {}", context, db_err.message()));
        }
    }
    OrchestratorError::Database(err)
}

#[async_trait]
impl TaskRepository for PgTaskRepository {
    async fn insert(&self, task: TaskInsert) -> Result<BacktestTask> {
        task.validate()?;

        let query = format!(
            "INSERT INTO backtest_tasks (task_id, strategy, symbols, start_date, end_date, timeframe, status, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6, 'running', $7) RETURNING {}",
            TASK_COLUMNS
        );

        let row = sqlx::query_as::<_, TaskRow>(&query)
            .bind(task.task_id)
            .bind(&task.strategy)
            .bind(Json(&task.symbols))
            .bind(task.start_date)
            .bind(task.end_date)
            .bind(&task.timeframe)
            .bind(Json(&task.metadata))
            .fetch_one(DbExecutor::get_pool(self))
            .await
            .map_err(|e| map_write_error(e, "建立任務失敗"))?;

        debug!(task_id = %task.task_id, "任務已建立");
        row.try_into()
    }

    async fn get(&self, task_id: Uuid) -> Result<Option<BacktestTask>> {
        let query = format!("SELECT {} FROM backtest_tasks WHERE task_id = $1", TASK_COLUMNS);

        let row = sqlx::query_as::<_, TaskRow>(&query)
            .bind(task_id)
            .fetch_optional(DbExecutor::get_pool(self))
            .await?;

        row.map(BacktestTask::try_from).transpose()
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Page<BacktestTask>> {
        let limit = filter.effective_limit();
        let offset = filter.effective_offset();

        let mut count_builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM backtest_tasks");
        Self::push_filters(&mut count_builder, filter);
        let total: i64 = count_builder
            .build_query_scalar::<i64>()
            .fetch_one(DbExecutor::get_pool(self))
            .await?;

        let mut builder = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM backtest_tasks", TASK_COLUMNS));
        Self::push_filters(&mut builder, filter);
        builder
            .push(" ORDER BY created_at DESC, task_id LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows = builder
            .build_query_as::<TaskRow>()
            .fetch_all(DbExecutor::get_pool(self))
            .await?;

        let data = rows
            .into_iter()
            .map(BacktestTask::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok(Page::new(data, total, limit, offset))
    }

    async fn transition(&self, task_id: Uuid, update: TerminalUpdate) -> Result<BacktestTask> {
        // WHERE status = 'running' 即為比較並設定，並行的第二個更新會看到 0 列
        let row = match &update {
            TerminalUpdate::Completed {
                artifact_path,
                file_size,
                record_count,
            } => {
                let query = format!(
                    "UPDATE backtest_tasks \
                     SET status = 'completed', artifact_path = $2, file_size = $3, record_count = $4 \
                     WHERE task_id = $1 AND status = 'running' RETURNING {}",
                    TASK_COLUMNS
                );
                sqlx::query_as::<_, TaskRow>(&query)
                    .bind(task_id)
                    .bind(artifact_path)
                    .bind(file_size)
                    .bind(record_count)
                    .fetch_optional(DbExecutor::get_pool(self))
                    .await
                    .map_err(|e| map_write_error(e, "產物路徑已被其他任務使用"))?
            }
            TerminalUpdate::Failed { reason } => {
                let query = format!(
                    "UPDATE backtest_tasks \
                     SET status = 'failed', \
                         metadata = metadata || jsonb_build_object('error', $2::text, 'failed_at', NOW()) \
                     WHERE task_id = $1 AND status = 'running' RETURNING {}",
                    TASK_COLUMNS
                );
                sqlx::query_as::<_, TaskRow>(&query)
                    .bind(task_id)
                    .bind(reason)
                    .fetch_optional(DbExecutor::get_pool(self))
                    .await
                    .map_err(|e| map_write_error(e, "更新任務失敗"))?
            }
        };

        match row {
            Some(row) => {
                debug!(task_id = %task_id, status = %update.target_status(), "任務已進入終態");
                row.try_into()
            }
            None => Err(self.explain_missed_transition(task_id).await),
        }
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(DbExecutor::get_pool(self)).await?;
        Ok(())
    }
}
