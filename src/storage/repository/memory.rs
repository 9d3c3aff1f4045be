use crate::error::{OrchestratorError, Result};
use crate::storage::models::task::*;
use crate::storage::repository::task::TaskRepository;
use crate::storage::repository::Page;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

/// 記憶體任務儲存庫
///
/// 供測試與不連資料庫的單機執行使用。所有寫入都經過 `mutate_row`，
/// 由它刷新 `updated_at`，與資料庫觸發器行為一致。
#[derive(Default)]
pub struct InMemoryTaskRepository {
    rows: RwLock<HashMap<Uuid, BacktestTask>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// 在寫鎖內套用變更並刷新 updated_at
    fn mutate_row<F>(rows: &mut HashMap<Uuid, BacktestTask>, task_id: Uuid, mutate: F) -> Result<BacktestTask>
    where
        F: FnOnce(&mut BacktestTask),
    {
        let row = rows
            .get_mut(&task_id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("任務 {} 不存在", task_id)))?;
        mutate(row);
        let now = Utc::now();
        row.updated_at = if now > row.updated_at { now } else { row.updated_at };
        Ok(row.clone())
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn insert(&self, task: TaskInsert) -> Result<BacktestTask> {
        task.validate()?;

        let mut rows = self.rows.write();
        if rows.contains_key(&task.task_id) {
            return Err(OrchestratorError::Conflict(format!("任務 {} 已存在", task.task_id)));
        }

        let now = Utc::now();
        let record = BacktestTask {
            task_id: task.task_id,
            strategy: task.strategy,
            symbols: task.symbols,
            start_date: task.start_date,
            end_date: task.end_date,
            timeframe: task.timeframe,
            status: TaskStatus::Running,
            artifact_path: None,
            file_size: None,
            record_count: None,
            metadata: task.metadata,
            created_at: now,
            updated_at: now,
        };
        rows.insert(record.task_id, record.clone());
        Ok(record)
    }

    async fn get(&self, task_id: Uuid) -> Result<Option<BacktestTask>> {
        Ok(self.rows.read().get(&task_id).cloned())
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Page<BacktestTask>> {
        let limit = filter.effective_limit();
        let offset = filter.effective_offset();

        let mut matched: Vec<BacktestTask> = self
            .rows
            .read()
            .values()
            .filter(|task| filter.matches(task))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.task_id.cmp(&b.task_id)));

        let total = matched.len() as i64;
        let data = matched
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();

        Ok(Page::new(data, total, limit, offset))
    }

    async fn transition(&self, task_id: Uuid, update: TerminalUpdate) -> Result<BacktestTask> {
        let mut rows = self.rows.write();

        let current = rows
            .get(&task_id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("任務 {} 不存在", task_id)))?;
        if !current.status.can_transition_to(update.target_status()) {
            return Err(OrchestratorError::InvalidState(format!(
                "任務 {} 已是終態 {}",
                task_id, current.status
            )));
        }

        if let TerminalUpdate::Completed { artifact_path, .. } = &update {
            let taken = rows
                .values()
                .any(|t| t.task_id != task_id && t.artifact_path.as_deref() == Some(artifact_path.as_str()));
            if taken {
                return Err(OrchestratorError::Conflict(format!(
                    "產物路徑已被其他任務使用: {}",
                    artifact_path
                )));
            }
        }

        Self::mutate_row(&mut rows, task_id, |task| match update {
            TerminalUpdate::Completed {
                artifact_path,
                file_size,
                record_count,
            } => {
                task.status = TaskStatus::Completed;
                task.artifact_path = Some(artifact_path);
                task.file_size = Some(file_size);
                task.record_count = Some(record_count);
            }
            TerminalUpdate::Failed { reason } => {
                task.status = TaskStatus::Failed;
                if let Some(obj) = task.metadata.as_object_mut() {
                    obj.insert("error".into(), serde_json::Value::String(reason));
                    obj.insert("failed_at".into(), serde_json::json!(Utc::now()));
                }
            }
        })
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
