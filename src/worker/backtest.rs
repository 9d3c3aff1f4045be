//! 回測工作執行
//!
//! 順序固定：先寫結果檔，再把任務轉為 completed，
//! 因此不會出現沒有結果檔的 completed 任務。
use crate::artifact::{task_manifest_path, task_result_path, ArtifactStore, StoredArtifact, WriteOutcome};
use crate::data_ingestion::load_candles;
use crate::error::{OrchestratorError, Result};
use crate::messaging::BacktestJob;
use crate::strategy::{StrategyRegistry, StrategyResult};
use crate::task::TaskService;
use crate::worker::outcome::JobOutcome;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 單一代碼的結果摘要
#[derive(Debug, Clone, Serialize)]
pub struct SymbolResult {
    pub symbol: String,
    pub rows: usize,
    pub signal_count: usize,
    #[serde(flatten)]
    pub result: StrategyResult,
}

/// `result.json` 內容
#[derive(Debug, Clone, Serialize)]
pub struct BacktestResultDocument {
    pub task_id: Uuid,
    pub strategy: String,
    pub params: serde_json::Value,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub timeframe: String,
    pub symbols: Vec<SymbolResult>,
    /// 沒有資料而略過的代碼
    pub skipped_symbols: Vec<String>,
    pub total_signals: usize,
    pub record_count: usize,
    pub execution_time_ms: u64,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestFile {
    pub path: String,
    pub size: u64,
    pub sha256: String,
}

/// `manifest.json` 內容
#[derive(Debug, Clone, Serialize)]
pub struct ResultManifest {
    pub task_id: Uuid,
    pub status: &'static str,
    pub files: Vec<ManifestFile>,
    pub record_count: usize,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&StoredArtifact> for ManifestFile {
    fn from(artifact: &StoredArtifact) -> Self {
        Self {
            path: artifact.relative_path.clone(),
            size: artifact.size,
            sha256: artifact.sha256.clone(),
        }
    }
}

/// 計算階段的錯誤，一律轉為任務失敗
enum ComputeError {
    /// 所有代碼都沒有資料
    NoData(String),
    Failed(String),
}

impl ComputeError {
    fn reason(&self) -> &str {
        match self {
            ComputeError::NoData(r) | ComputeError::Failed(r) => r,
        }
    }
}

#[derive(Clone)]
pub struct BacktestExecutor {
    store: ArtifactStore,
    tasks: TaskService,
    strategies: StrategyRegistry,
}

impl BacktestExecutor {
    pub fn new(store: ArtifactStore, tasks: TaskService, strategies: StrategyRegistry) -> Self {
        Self {
            store,
            tasks,
            strategies,
        }
    }

    /// 執行回測工作；回傳 `Err` 代表基礎設施錯誤，工作應重新投遞
    pub async fn execute(&self, job: &BacktestJob) -> Result<JobOutcome> {
        let started = Instant::now();
        let Some(task) = self.tasks.find(job.task_id).await? else {
            warn!(task_id = %job.task_id, "任務記錄不存在，丟棄工作");
            return Ok(JobOutcome::Failure {
                reason: format!("任務 {} 不存在", job.task_id),
            });
        };
        if task.status.is_terminal() {
            debug!(task_id = %job.task_id, status = %task.status, "任務已是終態");
            return Ok(JobOutcome::AlreadyDone {
                paths: task.artifact_path.into_iter().collect(),
            });
        }

        let document = match self.compute(job, started).await {
            Ok(document) => document,
            Err(e) => return self.fail(job.task_id, e.reason(), started).await,
        };
        let record_count = document.record_count;

        let payload = serde_json::to_vec_pretty(&document)?;
        let result = match self.store.write_if_absent_async(task_result_path(job.task_id), payload).await? {
            WriteOutcome::Written(stored) => stored,
            WriteOutcome::AlreadyExists { existing, .. } => {
                // 先前的投遞已寫入結果但未完成記錄
                info!(task_id = %job.task_id, path = %existing.relative_path, "沿用既有結果檔");
                existing
            }
        };

        let manifest = ResultManifest {
            task_id: job.task_id,
            status: "completed",
            files: vec![ManifestFile::from(&result)],
            record_count,
            duration_ms: started.elapsed().as_millis() as u64,
            error: None,
            created_at: Utc::now(),
        };
        self.write_manifest(job.task_id, &manifest).await?;

        match self
            .tasks
            .complete(job.task_id, &result.relative_path, result.size, record_count as u32)
            .await
        {
            Ok(_) => Ok(JobOutcome::Success {
                paths: vec![result.relative_path],
            }),
            Err(OrchestratorError::InvalidState(_)) => Ok(JobOutcome::AlreadyDone {
                paths: vec![result.relative_path],
            }),
            Err(OrchestratorError::Conflict(reason)) => Ok(JobOutcome::Failure { reason }),
            Err(e) => Err(e),
        }
    }

    async fn compute(&self, job: &BacktestJob, started: Instant) -> std::result::Result<BacktestResultDocument, ComputeError> {
        let strategy = self
            .strategies
            .get(&job.strategy)
            .map_err(|e| ComputeError::Failed(e.to_string()))?;

        let mut symbols = Vec::new();
        let mut skipped = Vec::new();
        for symbol in &job.symbols {
            let candles = {
                let store = self.store.clone();
                let (sym, timeframe) = (symbol.clone(), job.timeframe.clone());
                let (start, end) = (job.start_date, job.end_date);
                tokio::task::spawn_blocking(move || load_candles(&store, &sym, &timeframe, start, end))
                    .await
                    .map_err(|e| ComputeError::Failed(format!("資料載入中斷: {}", e)))?
                    .map_err(|e| ComputeError::Failed(format!("{} 資料載入失敗: {}", symbol, e)))?
            };
            if candles.is_empty() {
                debug!(task_id = %job.task_id, symbol = %symbol, "區間內沒有資料，略過");
                skipped.push(symbol.clone());
                continue;
            }

            let result = strategy
                .run(&candles, &job.parameters)
                .map_err(|e| ComputeError::Failed(format!("{} 策略執行失敗: {}", symbol, e)))?;
            symbols.push(SymbolResult {
                symbol: symbol.clone(),
                rows: candles.len(),
                signal_count: result.samples(),
                result,
            });
        }

        if symbols.is_empty() {
            return Err(ComputeError::NoData(format!(
                "{} ~ {} 期間 {} 沒有任何 {} 資料",
                job.start_date,
                job.end_date,
                job.symbols.join(", "),
                job.timeframe
            )));
        }

        Ok(BacktestResultDocument {
            task_id: job.task_id,
            strategy: job.strategy.clone(),
            params: job.parameters.clone(),
            start_date: job.start_date,
            end_date: job.end_date,
            timeframe: job.timeframe.clone(),
            total_signals: symbols.iter().map(|s| s.signal_count).sum(),
            record_count: symbols.iter().map(|s| s.rows).sum(),
            symbols,
            skipped_symbols: skipped,
            execution_time_ms: started.elapsed().as_millis() as u64,
            generated_at: Utc::now(),
        })
    }

    /// 重新投遞次數用盡時呼叫，直接把任務轉為 failed
    pub async fn give_up(&self, job: &BacktestJob, reason: &str) -> Result<JobOutcome> {
        self.fail(job.task_id, reason, Instant::now()).await
    }

    /// 先完成狀態轉換，成功的一方才寫失敗清單
    async fn fail(&self, task_id: Uuid, reason: &str, started: Instant) -> Result<JobOutcome> {
        match self.tasks.fail(task_id, reason).await {
            Ok(_) => {}
            Err(OrchestratorError::InvalidState(_)) => return Ok(JobOutcome::AlreadyDone { paths: Vec::new() }),
            Err(e) => return Err(e),
        }

        let manifest = ResultManifest {
            task_id,
            status: "failed",
            files: Vec::new(),
            record_count: 0,
            duration_ms: started.elapsed().as_millis() as u64,
            error: Some(reason.to_string()),
            created_at: Utc::now(),
        };
        if let Err(e) = self.write_manifest(task_id, &manifest).await {
            warn!(task_id = %task_id, error = %e, "無法寫入失敗清單");
        }
        Ok(JobOutcome::Failure {
            reason: reason.to_string(),
        })
    }

    async fn write_manifest(&self, task_id: Uuid, manifest: &ResultManifest) -> Result<()> {
        let payload = serde_json::to_vec_pretty(manifest)?;
        self.store
            .write_async(task_manifest_path(task_id), payload, true)
            .await
            .map(|_| ())
    }
}
