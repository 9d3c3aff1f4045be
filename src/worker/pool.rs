//! 工作者池
//!
//! 每個工作者各自輪詢佇列：領取 → 執行 → 確認。執行回傳 `Err` 表示
//! 回報結果時基礎設施出錯，這時把工作放回佇列讓下一位工作者重試。
use crate::config::{QueueConfig, WorkerConfig};
use crate::data_ingestion::{IngestionReport, IngestionRunner, ItemStatus};
use crate::error::Result;
use crate::messaging::{Delivery, JobDescriptor, JobQueue};
use crate::worker::backtest::BacktestExecutor;
use crate::worker::outcome::JobOutcome;
use metrics::{counter, histogram};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// 依工作種類分派
pub struct JobHandler {
    ingestion: Arc<IngestionRunner>,
    backtest: BacktestExecutor,
}

impl JobHandler {
    pub fn new(ingestion: Arc<IngestionRunner>, backtest: BacktestExecutor) -> Self {
        Self { ingestion, backtest }
    }

    pub async fn handle(&self, job: &JobDescriptor) -> Result<JobOutcome> {
        match job {
            JobDescriptor::Ingestion(job) => {
                let report = self.ingestion.run(job).await;
                Ok(ingestion_outcome(&report))
            }
            JobDescriptor::Backtest(job) => self.backtest.execute(job).await,
        }
    }

    /// 不再重試時的收尾：回測任務轉為 failed，擷取工作只回報失敗
    pub async fn give_up(&self, job: &JobDescriptor, reason: &str) -> Result<JobOutcome> {
        match job {
            JobDescriptor::Ingestion(_) => Ok(JobOutcome::Failure {
                reason: reason.to_string(),
            }),
            JobDescriptor::Backtest(job) => self.backtest.give_up(job, reason).await,
        }
    }
}

/// 擷取報告轉為工作結果：有任何項目失敗即為失敗，全部略過視為已完成
pub fn ingestion_outcome(report: &IngestionReport) -> JobOutcome {
    if report.failed > 0 {
        let reasons: Vec<String> = report
            .details
            .iter()
            .filter(|d| d.status == ItemStatus::Failed)
            .map(|d| format!("{}/{}: {}", d.symbol, d.timeframe, d.message.as_deref().unwrap_or_default()))
            .collect();
        return JobOutcome::Failure {
            reason: format!("{}/{} 項失敗: {}", report.failed, report.total, reasons.join("; ")),
        };
    }
    if report.completed > 0 {
        JobOutcome::Success { paths: report.files() }
    } else {
        JobOutcome::AlreadyDone { paths: report.files() }
    }
}

/// 單一工作者的執行環境，可複製到每個 tokio 任務
#[derive(Clone)]
struct Worker {
    queue: Arc<dyn JobQueue>,
    handler: Arc<JobHandler>,
    visibility_timeout: Duration,
    max_redeliveries: u32,
}

impl Worker {
    async fn process_next(&self) -> Result<Option<JobOutcome>> {
        let Some(delivery) = self.queue.claim(self.visibility_timeout).await? else {
            return Ok(None);
        };

        let job = delivery.job();
        let span = info_span!(
            "job",
            job_id = %delivery.job_id(),
            kind = job.kind(),
            task_id = job.task_id().map(|id| id.to_string()).unwrap_or_default(),
            redelivered = delivery.message.redelivered,
        );
        self.process(delivery).instrument(span).await.map(Some)
    }

    async fn process(&self, delivery: Delivery) -> Result<JobOutcome> {
        let kind = delivery.job().kind();
        let started = Instant::now();
        debug!("開始執行工作");

        match self.handler.handle(delivery.job()).await {
            Ok(outcome) => {
                self.queue.ack(&delivery).await?;
                histogram!("orchestrator.jobs.duration_seconds", "kind" => kind).record(started.elapsed().as_secs_f64());
                counter!("orchestrator.jobs.processed", "kind" => kind, "outcome" => outcome.label()).increment(1);
                match &outcome {
                    JobOutcome::Failure { reason } => warn!(reason = %reason, "工作執行失敗"),
                    other => info!(outcome = other.label(), paths = ?other.paths(), "工作完成"),
                }
                Ok(outcome)
            }
            Err(e) if delivery.message.redelivered >= self.max_redeliveries => {
                let reason = format!("重新投遞 {} 次後仍失敗: {}", delivery.message.redelivered, e);
                error!(error = %e, redelivered = delivery.message.redelivered, "重新投遞次數已達上限，放棄工作");
                match self.handler.give_up(delivery.job(), &reason).await {
                    Ok(outcome) => {
                        self.queue.ack(&delivery).await?;
                        counter!("orchestrator.jobs.abandoned", "kind" => kind).increment(1);
                        counter!("orchestrator.jobs.processed", "kind" => kind, "outcome" => outcome.label()).increment(1);
                        Ok(outcome)
                    }
                    Err(give_up_err) => {
                        warn!(error = %give_up_err, "無法將任務標記為失敗，放回佇列");
                        self.requeue(&delivery, kind).await;
                        Err(e)
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "工作回報失敗，放回佇列");
                self.requeue(&delivery, kind).await;
                Err(e)
            }
        }
    }

    async fn requeue(&self, delivery: &Delivery, kind: &'static str) {
        counter!("orchestrator.jobs.requeued", "kind" => kind).increment(1);
        if let Err(nack_err) = self.queue.nack(delivery, true).await {
            // 放回也失敗時交給可見逾時處理
            warn!(error = %nack_err, "放回佇列失敗");
        }
    }

    async fn run(self, id: usize, poll_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(worker = id, "工作者啟動");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let idle = match self.process_next().await {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(e) => {
                    debug!(worker = id, error = %e, "本輪處理失敗");
                    true
                }
            };
            if idle {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        }
        info!(worker = id, "工作者停止");
    }
}

async fn run_reaper(queue: Arc<dyn JobQueue>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                match queue.requeue_expired().await {
                    Ok(0) => {}
                    Ok(n) => {
                        counter!("orchestrator.jobs.expired").increment(n as u64);
                        warn!(count = n, "逾時未確認的工作已放回佇列");
                    }
                    Err(e) => warn!(error = %e, "回收逾時工作失敗"),
                }
            }
        }
    }
    debug!("回收任務停止");
}

pub struct WorkerPool {
    worker: Worker,
    concurrency: usize,
    poll_interval: Duration,
    reaper_interval: Duration,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(queue: Arc<dyn JobQueue>, handler: Arc<JobHandler>, worker: &WorkerConfig, queue_config: &QueueConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            worker: Worker {
                queue,
                handler,
                visibility_timeout: queue_config.visibility_timeout(),
                max_redeliveries: queue_config.max_redeliveries,
            },
            concurrency: worker.concurrency.max(1),
            poll_interval: worker.poll_interval(),
            reaper_interval: queue_config.reaper_interval(),
            shutdown,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// 啟動工作者與回收任務；已啟動時不重複啟動
    pub fn start(&self) {
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            return;
        }
        self.shutdown.send_replace(false);

        for id in 0..self.concurrency {
            let worker = self.worker.clone();
            handles.push(tokio::spawn(worker.run(id, self.poll_interval, self.shutdown.subscribe())));
        }
        handles.push(tokio::spawn(run_reaper(
            self.worker.queue.clone(),
            self.reaper_interval,
            self.shutdown.subscribe(),
        )));
        info!(concurrency = self.concurrency, "工作者池已啟動");
    }

    /// 通知所有工作者在目前工作結束後停止，最多等待 `timeout`
    pub async fn stop(&self, timeout: Duration) {
        self.shutdown.send_replace(true);
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        if handles.is_empty() {
            return;
        }

        let join_all = futures::future::join_all(handles);
        match tokio::time::timeout(timeout, join_all).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        error!(error = %e, "工作者異常結束");
                    }
                }
                info!("工作者池已停止");
            }
            Err(_) => warn!(timeout_secs = timeout.as_secs(), "等待工作者停止逾時，未完成的工作將由可見逾時重新投遞"),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.handles.lock().is_empty()
    }

    /// 領取並處理一個工作；佇列為空時回傳 `None`
    pub async fn process_next(&self) -> Result<Option<JobOutcome>> {
        self.worker.process_next().await
    }

    /// 處理到佇列清空為止，回傳處理的數量
    pub async fn drain(&self) -> Result<usize> {
        let mut processed = 0;
        while self.process_next().await?.is_some() {
            processed += 1;
        }
        Ok(processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactStore;
    use crate::data_ingestion::IngestionItem;
    use crate::market_data::source::MockCandleSource;
    use crate::market_data::{candles_to_parquet, Candle};
    use crate::messaging::{BacktestJob, InMemoryJobQueue};
    use crate::storage::{InMemoryTaskRepository, TaskStatus};
    use crate::strategy::StrategyRegistry;
    use crate::task::TaskService;
    use chrono::{NaiveDate, TimeZone, Utc};
    use std::path::Path;
    use uuid::Uuid;

    fn item(status: ItemStatus, files: &[&str]) -> IngestionItem {
        IngestionItem {
            symbol: "BTC_KRW".into(),
            timeframe: "1D".into(),
            status,
            files: files.iter().map(|f| f.to_string()).collect(),
            rows_written: 0,
            message: (status == ItemStatus::Failed).then(|| "boom".to_string()),
        }
    }

    fn report(items: Vec<IngestionItem>) -> IngestionReport {
        let mut report = IngestionReport::default();
        for item in items {
            report.total += 1;
            match item.status {
                ItemStatus::Completed => report.completed += 1,
                ItemStatus::Skipped => report.skipped += 1,
                ItemStatus::Failed => report.failed += 1,
            }
            report.details.push(item);
        }
        report
    }

    #[test]
    fn test_ingestion_outcome_mapping() {
        let done = ingestion_outcome(&report(vec![item(ItemStatus::Completed, &["BTC_KRW/1D/2024.parquet"])]));
        assert_eq!(done.label(), "success");
        assert_eq!(done.paths(), ["BTC_KRW/1D/2024.parquet".to_string()]);

        let skipped = ingestion_outcome(&report(vec![item(ItemStatus::Skipped, &["BTC_KRW/1D/2024.parquet"])]));
        assert_eq!(skipped.label(), "already_done");

        let failed = ingestion_outcome(&report(vec![
            item(ItemStatus::Completed, &[]),
            item(ItemStatus::Failed, &[]),
        ]));
        assert!(failed.is_failure());
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: ArtifactStore,
        queue: Arc<InMemoryJobQueue>,
        tasks: TaskService,
        executor: BacktestExecutor,
        pool: WorkerPool,
    }

    fn fixture() -> Fixture {
        fixture_with(&QueueConfig::default())
    }

    fn fixture_with(queue_config: &QueueConfig) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let tasks = TaskService::new(Arc::new(InMemoryTaskRepository::new()));
        let mut source = MockCandleSource::new();
        source.expect_name().return_const("mock".to_string());
        let executor = BacktestExecutor::new(store.clone(), tasks.clone(), StrategyRegistry::with_defaults());
        let handler = JobHandler::new(
            Arc::new(IngestionRunner::new(Arc::new(source), store.clone())),
            executor.clone(),
        );
        let queue = Arc::new(InMemoryJobQueue::new("test"));
        let pool = WorkerPool::new(
            queue.clone(),
            Arc::new(handler),
            &WorkerConfig {
                concurrency: 2,
                poll_interval_ms: 10,
            },
            queue_config,
        );
        Fixture {
            _dir: dir,
            store,
            queue,
            tasks,
            executor,
            pool,
        }
    }

    fn seed_daily(store: &ArtifactStore, days: i64) {
        let candles: Vec<Candle> = (0..days)
            .map(|i| {
                let price = 100.0 + i as f64;
                Candle {
                    timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::days(i),
                    open: price,
                    high: price + 1.0,
                    low: price - 1.0,
                    close: price + 0.5,
                    volume: 1.0,
                }
            })
            .collect();
        store
            .write(Path::new("BTC_KRW/1D/2024.parquet"), &candles_to_parquet(&candles).unwrap(), false)
            .unwrap();
    }

    fn backtest_job(task_id: Uuid) -> BacktestJob {
        BacktestJob {
            task_id,
            strategy: "buy_and_hold".into(),
            symbols: vec!["BTC_KRW".into()],
            start_date: date(2024, 1, 1),
            end_date: date(2024, 12, 31),
            timeframe: "1D".into(),
            parameters: serde_json::json!({}),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_backtest_without_data_fails_task_and_acks() {
        let f = fixture();
        let task_id = f
            .tasks
            .create("buy_and_hold", vec!["BTC_KRW".into()], date(2024, 1, 1), date(2024, 12, 31), None)
            .await
            .unwrap();
        f.queue
            .enqueue(JobDescriptor::Backtest(BacktestJob {
                task_id,
                strategy: "buy_and_hold".into(),
                symbols: vec!["BTC_KRW".into()],
                start_date: date(2024, 1, 1),
                end_date: date(2024, 12, 31),
                timeframe: "1D".into(),
                parameters: serde_json::json!({}),
            }))
            .await
            .unwrap();

        let outcome = f.pool.process_next().await.unwrap().unwrap();
        assert!(outcome.is_failure());
        assert_eq!(f.queue.in_flight(), 0);
        assert_eq!(f.queue.depth().await.unwrap(), 0);

        let task = f.tasks.get(task_id).await.unwrap();
        assert!(task.failure_reason().is_some());
        assert!(f.pool.process_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_task_record_is_acked() {
        let f = fixture();
        f.queue
            .enqueue(JobDescriptor::Backtest(BacktestJob {
                task_id: Uuid::new_v4(),
                strategy: "buy_and_hold".into(),
                symbols: vec!["BTC_KRW".into()],
                start_date: date(2024, 1, 1),
                end_date: date(2024, 1, 2),
                timeframe: "1D".into(),
                parameters: serde_json::Value::Null,
            }))
            .await
            .unwrap();
        let outcome = f.pool.process_next().await.unwrap().unwrap();
        assert!(outcome.is_failure());
        assert_eq!(f.queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let f = fixture();
        f.pool.start();
        assert!(f.pool.is_running());
        f.pool.start();
        f.pool.stop(Duration::from_secs(5)).await;
        assert!(!f.pool.is_running());
    }

    #[tokio::test]
    async fn test_persistent_write_error_fails_task_after_redeliveries() {
        let f = fixture_with(&QueueConfig {
            max_redeliveries: 2,
            ..QueueConfig::default()
        });
        seed_daily(&f.store, 30);
        let task_id = f
            .tasks
            .create("buy_and_hold", vec!["BTC_KRW".into()], date(2024, 1, 1), date(2024, 12, 31), None)
            .await
            .unwrap();
        // 結果目錄的位置被一般檔案佔用，寫入永遠失敗
        std::fs::create_dir_all(f.store.root().join("tasks")).unwrap();
        std::fs::write(f.store.root().join(format!("tasks/{}", task_id)), b"occupied").unwrap();
        f.queue.enqueue(JobDescriptor::Backtest(backtest_job(task_id))).await.unwrap();

        assert!(f.pool.process_next().await.is_err());
        assert!(f.pool.process_next().await.is_err());
        assert_eq!(f.tasks.get(task_id).await.unwrap().status, TaskStatus::Running);

        let outcome = f.pool.process_next().await.unwrap().unwrap();
        assert!(outcome.is_failure());
        assert_eq!(f.queue.in_flight(), 0);
        assert_eq!(f.queue.depth().await.unwrap(), 0);

        let task = f.tasks.get(task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.failure_reason().unwrap().starts_with("重新投遞 2 次"));
    }

    #[tokio::test]
    async fn test_late_failure_keeps_completed_manifest() {
        let f = fixture();
        seed_daily(&f.store, 30);
        let task_id = f
            .tasks
            .create("buy_and_hold", vec!["BTC_KRW".into()], date(2024, 1, 1), date(2024, 12, 31), None)
            .await
            .unwrap();
        f.queue.enqueue(JobDescriptor::Backtest(backtest_job(task_id))).await.unwrap();
        let outcome = f.pool.process_next().await.unwrap().unwrap();
        assert_eq!(outcome.label(), "success");

        let manifest_path = crate::artifact::task_manifest_path(task_id);
        let before = f.store.read(&manifest_path).unwrap();

        let late = f.executor.give_up(&backtest_job(task_id), "late duplicate").await.unwrap();
        assert_eq!(late.label(), "already_done");
        assert_eq!(f.store.read(&manifest_path).unwrap(), before);
        assert_eq!(f.tasks.get(task_id).await.unwrap().status, TaskStatus::Completed);
    }
}
