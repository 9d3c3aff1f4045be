//! 對外操作入口
//!
//! 每個操作只做驗證、記錄與放入佇列，回測與擷取一律交給工作者執行。
use crate::artifact::{cleanup_old_results, normalize_symbol, ArtifactStore, CleanupReport};
use crate::config::ApplicationConfig;
use crate::data_ingestion::{has_data, IngestionRunner, UploadRequest, UploadResponse, UploadService, UploadValidator};
use crate::error::{OrchestratorError, Result};
use crate::inventory::{Inventory, InventoryQuery, InventoryResponse};
use crate::market_data::{to_data_symbol, CandleSource, Timeframe};
use crate::messaging::{BacktestJob, JobDescriptor, JobQueue};
use crate::scheduler::{IngestionScheduler, SchedulerStatus, TriggerRequest, TriggerResponse};
use crate::storage::{BacktestTask, Page, TaskFilter, TaskInsert, TaskRepository, TaskStatus};
use crate::strategy::StrategyRegistry;
use crate::task::TaskService;
use crate::worker::{BacktestExecutor, JobHandler, WorkerPool};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

pub const DEFAULT_TIMEFRAME: &str = "1D";

/// 建立回測任務的請求，日期為 `YYYY-MM-DD`
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTaskRequest {
    pub strategy: String,
    pub symbols: Vec<String>,
    pub start_date: String,
    pub end_date: String,
    #[serde(default)]
    pub timeframe: Option<String>,
    #[serde(default)]
    pub params: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateTaskResponse {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub job_id: String,
}

fn parse_date(raw: &str, field: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| OrchestratorError::Validation(format!("{} 必須為 YYYY-MM-DD: {:?}", field, raw)))
}

/// 去除空白、統一為 `BASE_QUOTE` 並去除重複
fn normalize_symbols(raw: &[String]) -> Result<Vec<String>> {
    let mut symbols: Vec<String> = Vec::with_capacity(raw.len());
    for s in raw {
        if s.trim().is_empty() {
            continue;
        }
        let symbol = normalize_symbol(&to_data_symbol(s))?;
        if !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }
    if symbols.is_empty() {
        return Err(OrchestratorError::Validation("symbols 不可為空".into()));
    }
    Ok(symbols)
}

pub struct Orchestrator {
    tasks: TaskService,
    queue: Arc<dyn JobQueue>,
    scheduler: Arc<IngestionScheduler>,
    uploads: UploadService,
    inventory: Inventory,
    store: ArtifactStore,
    strategies: StrategyRegistry,
    result_ttl_days: u32,
}

impl Orchestrator {
    pub fn new(config: &ApplicationConfig, repo: Arc<dyn TaskRepository>, queue: Arc<dyn JobQueue>) -> Self {
        let store = ArtifactStore::new(config.storage.data_root.clone());
        Self {
            tasks: TaskService::new(repo),
            scheduler: Arc::new(IngestionScheduler::new(config.scheduler.clone(), queue.clone())),
            uploads: UploadService::new(UploadValidator::new(config.storage.max_upload_bytes), store.clone()),
            inventory: Inventory::new(store.clone()),
            queue,
            store,
            strategies: StrategyRegistry::with_defaults(),
            result_ttl_days: config.storage.result_ttl_days,
        }
    }

    pub fn tasks(&self) -> &TaskService {
        &self.tasks
    }

    pub fn scheduler(&self) -> &Arc<IngestionScheduler> {
        &self.scheduler
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn strategies(&self) -> &StrategyRegistry {
        &self.strategies
    }

    /// 以同一組儲存與任務服務建立工作者池
    pub fn worker_pool(&self, config: &ApplicationConfig, source: Arc<dyn CandleSource>) -> WorkerPool {
        let handler = JobHandler::new(
            Arc::new(IngestionRunner::new(source, self.store.clone())),
            BacktestExecutor::new(self.store.clone(), self.tasks.clone(), self.strategies.clone()),
        );
        WorkerPool::new(self.queue.clone(), Arc::new(handler), &config.worker, &config.queue)
    }

    /// 驗證請求、建立 running 任務並放入回測工作，不等待執行結果
    pub async fn create_backtest_task(&self, request: CreateTaskRequest) -> Result<CreateTaskResponse> {
        let start_date = parse_date(&request.start_date, "start_date")?;
        let end_date = parse_date(&request.end_date, "end_date")?;
        if start_date > end_date {
            return Err(OrchestratorError::Validation(format!(
                "start_date ({}) 不可晚於 end_date ({})",
                start_date, end_date
            )));
        }
        let strategy = request.strategy.trim().to_string();
        self.strategies.get(&strategy)?;
        let symbols = normalize_symbols(&request.symbols)?;
        let timeframe = request
            .timeframe
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(DEFAULT_TIMEFRAME)
            .parse::<Timeframe>()?
            .label()
            .to_string();

        if !self.any_data(&symbols, &timeframe, start_date, end_date).await? {
            return Err(OrchestratorError::NotFound(format!(
                "{} ~ {} 期間 {} 沒有 {} 行情資料",
                start_date,
                end_date,
                symbols.join(", "),
                timeframe
            )));
        }

        let parameters = request.params.unwrap_or_else(|| serde_json::json!({}));
        let insert = TaskInsert::new(&strategy, symbols.clone(), start_date, end_date, Some(timeframe.clone()))
            .with_metadata(serde_json::json!({ "params": parameters }));
        let task_id = self.tasks.create_with(insert).await?;

        let job = JobDescriptor::Backtest(BacktestJob {
            task_id,
            strategy,
            symbols,
            start_date,
            end_date,
            timeframe,
            parameters,
        });
        match self.queue.enqueue(job).await {
            Ok(job_id) => {
                info!(task_id = %task_id, job_id = %job_id, "回測工作已放入佇列");
                Ok(CreateTaskResponse {
                    task_id,
                    status: TaskStatus::Running,
                    job_id,
                })
            }
            Err(e) => {
                let reason = format!("無法放入回測工作: {}", e);
                if let Err(fail_err) = self.tasks.fail(task_id, &reason).await {
                    error!(task_id = %task_id, error = %fail_err, "無法將任務標記為失敗");
                }
                Err(OrchestratorError::Unavailable(reason))
            }
        }
    }

    async fn any_data(&self, symbols: &[String], timeframe: &str, start: NaiveDate, end: NaiveDate) -> Result<bool> {
        let store = self.store.clone();
        let symbols = symbols.to_vec();
        let timeframe = timeframe.to_string();
        tokio::task::spawn_blocking(move || {
            for symbol in &symbols {
                if has_data(&store, symbol, &timeframe, start, end)? {
                    return Ok(true);
                }
            }
            Ok(false)
        })
        .await
        .map_err(|e| OrchestratorError::Internal(format!("資料檢查中斷: {}", e)))?
    }

    pub async fn scheduler_status(&self) -> SchedulerStatus {
        self.scheduler.status().await
    }

    pub async fn scheduler_trigger(&self, request: TriggerRequest) -> Result<TriggerResponse> {
        self.scheduler.trigger(request).await
    }

    pub async fn upload(&self, request: UploadRequest) -> Result<UploadResponse> {
        self.uploads.upload(request).await
    }

    pub async fn inventory(&self, query: InventoryQuery) -> Result<InventoryResponse> {
        self.inventory.list_async(query).await
    }

    pub async fn get_task(&self, task_id: Uuid) -> Result<BacktestTask> {
        self.tasks.get(task_id).await
    }

    pub async fn list_tasks(&self, filter: &TaskFilter) -> Result<Page<BacktestTask>> {
        self.tasks.list(filter).await
    }

    /// 刪除超過保留天數的結果目錄
    pub async fn cleanup(&self, dry_run: bool) -> Result<CleanupReport> {
        let store = self.store.clone();
        let ttl_days = self.result_ttl_days;
        tokio::task::spawn_blocking(move || cleanup_old_results(&store, ttl_days, dry_run))
            .await
            .map_err(|e| OrchestratorError::Internal(format!("清理中斷: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueBackend;
    use crate::messaging::InMemoryJobQueue;
    use crate::storage::InMemoryTaskRepository;
    use assert_matches::assert_matches;
    use rstest::rstest;

    fn orchestrator(dir: &std::path::Path) -> (Orchestrator, Arc<InMemoryTaskRepository>, Arc<InMemoryJobQueue>) {
        let mut config = ApplicationConfig::default();
        config.storage.data_root = dir.to_path_buf();
        config.queue.backend = QueueBackend::Memory;
        let repo = Arc::new(InMemoryTaskRepository::new());
        let queue = Arc::new(InMemoryJobQueue::new("jobs"));
        (Orchestrator::new(&config, repo.clone(), queue.clone()), repo, queue)
    }

    fn request(strategy: &str, start: &str, end: &str) -> CreateTaskRequest {
        CreateTaskRequest {
            strategy: strategy.into(),
            symbols: vec!["BTC_KRW".into()],
            start_date: start.into(),
            end_date: end.into(),
            timeframe: None,
            params: None,
        }
    }

    #[rstest]
    #[case(request("buy_and_hold", "2024-12-31", "2024-01-01"))]
    #[case(request("buy_and_hold", "2024/01/01", "2024-12-31"))]
    #[case(request("no_such_strategy", "2024-01-01", "2024-12-31"))]
    #[case(CreateTaskRequest { symbols: vec![" ".into()], ..request("buy_and_hold", "2024-01-01", "2024-12-31") })]
    #[case(CreateTaskRequest { symbols: vec!["../BTC".into()], ..request("buy_and_hold", "2024-01-01", "2024-12-31") })]
    #[case(CreateTaskRequest { timeframe: Some("7X".into()), ..request("buy_and_hold", "2024-01-01", "2024-12-31") })]
    #[tokio::test]
    async fn test_invalid_requests_insert_nothing(#[case] req: CreateTaskRequest) {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, repo, queue) = orchestrator(dir.path());
        let result = orchestrator.create_backtest_task(req).await;
        assert_matches!(result, Err(OrchestratorError::Validation(_)));
        assert!(repo.is_empty());
        assert_eq!(queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_no_market_data_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, repo, _) = orchestrator(dir.path());
        let result = orchestrator
            .create_backtest_task(request("buy_and_hold", "2024-01-01", "2024-12-31"))
            .await;
        assert_matches!(result, Err(OrchestratorError::NotFound(_)));
        assert!(repo.is_empty());
    }

    #[test]
    fn test_normalize_symbols() {
        let symbols = normalize_symbols(&["krw-btc".into(), "BTC_KRW".into(), " eth_krw ".into()]).unwrap();
        assert_eq!(symbols, vec!["BTC_KRW", "ETH_KRW"]);
    }

    #[tokio::test]
    async fn test_cleanup_on_empty_root() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, _, _) = orchestrator(dir.path());
        let report = orchestrator.cleanup(true).await.unwrap();
        assert_eq!(report.scanned, 0);
        assert!(report.dry_run);
    }
}
