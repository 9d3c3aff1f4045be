//! 回測任務狀態機
//!
//! running → completed | failed，每個任務只會成功轉換一次。
//! 序列化點在儲存層的比較並設定，這裡不另外加鎖。
use crate::error::{OrchestratorError, Result};
use crate::storage::{BacktestTask, Page, TaskFilter, TaskInsert, TaskRepository, TerminalUpdate};
use chrono::NaiveDate;
use metrics::counter;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// 回測任務服務
#[derive(Clone)]
pub struct TaskService {
    repo: Arc<dyn TaskRepository>,
}

impl TaskService {
    pub fn new(repo: Arc<dyn TaskRepository>) -> Self {
        Self { repo }
    }

    /// 建立 running 任務並回傳 task_id，不等待任何計算
    pub async fn create(
        &self,
        strategy: &str,
        symbols: Vec<String>,
        start_date: NaiveDate,
        end_date: NaiveDate,
        timeframe: Option<String>,
    ) -> Result<Uuid> {
        let insert = TaskInsert::new(strategy, symbols, start_date, end_date, timeframe);
        self.create_with(insert).await
    }

    /// 以完整插入模型建立任務（可附帶 metadata）
    pub async fn create_with(&self, insert: TaskInsert) -> Result<Uuid> {
        insert.validate()?;
        let task = self.repo.insert(insert).await?;

        counter!("orchestrator.tasks.created", "strategy" => task.strategy.clone()).increment(1);
        info!(task_id = %task.task_id, strategy = %task.strategy, symbols = ?task.symbols, "回測任務已建立");
        Ok(task.task_id)
    }

    /// running → completed
    pub async fn complete(
        &self,
        task_id: Uuid,
        artifact_path: &str,
        file_size: u64,
        record_count: u32,
    ) -> Result<BacktestTask> {
        if artifact_path.trim().is_empty() {
            return Err(OrchestratorError::Validation("artifact_path 不可為空".into()));
        }
        let file_size = i64::try_from(file_size)
            .map_err(|_| OrchestratorError::Validation(format!("file_size 超出範圍: {}", file_size)))?;
        let record_count = i32::try_from(record_count)
            .map_err(|_| OrchestratorError::Validation(format!("record_count 超出範圍: {}", record_count)))?;

        let update = TerminalUpdate::Completed {
            artifact_path: artifact_path.to_string(),
            file_size,
            record_count,
        };
        let result = self.repo.transition(task_id, update).await;
        self.record_transition("completed", &result);
        if result.is_ok() {
            info!(task_id = %task_id, artifact_path, record_count, "回測任務完成");
        }
        result
    }

    /// running → failed，原因寫入 metadata.error
    pub async fn fail(&self, task_id: Uuid, reason: &str) -> Result<BacktestTask> {
        let update = TerminalUpdate::Failed {
            reason: reason.to_string(),
        };
        let result = self.repo.transition(task_id, update).await;
        self.record_transition("failed", &result);
        if result.is_ok() {
            warn!(task_id = %task_id, reason, "回測任務失敗");
        }
        result
    }

    pub async fn get(&self, task_id: Uuid) -> Result<BacktestTask> {
        self.repo
            .get(task_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("任務 {} 不存在", task_id)))
    }

    /// 查詢但不存在時回傳 None
    pub async fn find(&self, task_id: Uuid) -> Result<Option<BacktestTask>> {
        self.repo.get(task_id).await
    }

    pub async fn list(&self, filter: &TaskFilter) -> Result<Page<BacktestTask>> {
        self.repo.list(filter).await
    }

    pub async fn ping(&self) -> Result<()> {
        self.repo.ping().await
    }

    fn record_transition(&self, target: &'static str, result: &Result<BacktestTask>) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(err) => err.kind().as_str(),
        };
        counter!("orchestrator.tasks.transition", "target" => target, "outcome" => outcome).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemoryTaskRepository, TaskStatus};
    use assert_matches::assert_matches;
    use rstest::rstest;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn service() -> TaskService {
        TaskService::new(Arc::new(InMemoryTaskRepository::new()))
    }

    #[tokio::test]
    async fn test_create_then_get_running() {
        let service = service();
        let id = service
            .create("buy_and_hold", vec!["BTC_KRW".into()], date("2024-01-01"), date("2024-12-31"), None)
            .await
            .unwrap();

        let task = service.get(id).await.unwrap();
        assert_eq!(task.task_id, id);
        assert_eq!(task.status, TaskStatus::Running);
    }

    #[rstest]
    #[case::complete_then_fail(true)]
    #[case::fail_then_complete(false)]
    #[tokio::test]
    async fn test_only_one_terminal_transition(#[case] complete_first: bool) {
        let service = service();
        let id = service
            .create("s", vec!["A".into()], date("2024-01-01"), date("2024-01-31"), None)
            .await
            .unwrap();

        if complete_first {
            service.complete(id, "tasks/x/result.json", 10, 31).await.unwrap();
            assert_matches!(service.fail(id, "boom").await, Err(OrchestratorError::InvalidState(_)));
            assert_matches!(
                service.complete(id, "tasks/y/result.json", 10, 31).await,
                Err(OrchestratorError::InvalidState(_))
            );
        } else {
            service.fail(id, "boom").await.unwrap();
            assert_matches!(
                service.complete(id, "tasks/x/result.json", 10, 31).await,
                Err(OrchestratorError::InvalidState(_))
            );
            assert_eq!(service.get(id).await.unwrap().failure_reason(), Some("boom"));
        }
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        assert_matches!(service().get(Uuid::new_v4()).await, Err(OrchestratorError::NotFound(_)));
        assert!(service().find(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_rejects_empty_path() {
        let service = service();
        let id = service
            .create("s", vec!["A".into()], date("2024-01-01"), date("2024-01-31"), None)
            .await
            .unwrap();
        assert_matches!(service.complete(id, " ", 1, 1).await, Err(OrchestratorError::Validation(_)));
        assert_eq!(service.get(id).await.unwrap().status, TaskStatus::Running);
    }
}
