//! 行情擷取排程
//!
//! 每日在設定的 UTC 時間把一個擷取工作放入佇列，本身不執行擷取。
//! 手動觸發與排程走同一條路徑，兩者都記入執行紀錄。
use crate::artifact::normalize_symbol;
use crate::config::SchedulerConfig;
use crate::error::{OrchestratorError, Result};
use crate::market_data::{to_data_symbol, Timeframe};
use crate::messaging::{IngestionJob, JobDescriptor, JobQueue, TriggerSource};
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use metrics::counter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// 保留的執行紀錄數
pub const HISTORY_CAPACITY: usize = 10;
/// 狀態查詢回報的紀錄數
pub const HISTORY_REPORTED: usize = 5;

/// 單次放入佇列的紀錄
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub job_id: Option<String>,
    pub trigger: TriggerSource,
    pub enqueued_at: DateTime<Utc>,
    pub success: bool,
    pub symbols: Vec<String>,
    pub timeframes: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub backend: String,
    pub queue: String,
    pub connected: bool,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub depth: Option<usize>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleConfiguration {
    pub hour: u32,
    pub minute: u32,
    pub symbols: Vec<String>,
    pub timeframes: Vec<String>,
    pub days: u32,
    pub overwrite: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub enabled: bool,
    pub running: bool,
    pub queue: QueueStatus,
    pub configuration: ScheduleConfiguration,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<RunRecord>,
    /// 最近的紀錄，新的在後
    pub history: Vec<RunRecord>,
}

/// 手動觸發參數；未提供或為空時沿用設定值
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TriggerRequest {
    pub symbols: Option<Vec<String>>,
    pub timeframes: Option<Vec<String>>,
    pub days: Option<u32>,
    pub overwrite: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TriggerResponse {
    pub job_id: String,
    pub symbols: Vec<String>,
    pub timeframes: Vec<String>,
    pub days: u32,
    pub overwrite: bool,
}

/// 下一次在 `hour:minute`（UTC）觸發的時間，嚴格晚於 `now`
pub fn next_run_after(now: DateTime<Utc>, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    let at = NaiveTime::from_hms_opt(hour, minute, 0)?;
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        Some(today)
    } else {
        Some(today + ChronoDuration::days(1))
    }
}

fn normalize_list(raw: &[String]) -> Vec<String> {
    raw.iter()
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

pub struct IngestionScheduler {
    config: SchedulerConfig,
    queue: Arc<dyn JobQueue>,
    history: Mutex<VecDeque<RunRecord>>,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl IngestionScheduler {
    pub fn new(config: SchedulerConfig, queue: Arc<dyn JobQueue>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            queue,
            history: Mutex::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
            shutdown,
            handle: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.handle.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// 啟動排程迴圈；停用或已在執行時回傳 false
    pub fn start(self: &Arc<Self>) -> bool {
        if !self.config.enabled {
            warn!("排程已停用，只接受手動觸發");
            return false;
        }
        let mut handle = self.handle.lock();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return false;
        }
        self.shutdown.send_replace(false);

        let scheduler = Arc::clone(self);
        let shutdown = self.shutdown.subscribe();
        *handle = Some(tokio::spawn(async move { scheduler.run_loop(shutdown).await }));
        info!(
            hour = self.config.hour,
            minute = self.config.minute,
            symbols = ?self.config.symbols,
            timeframes = ?self.config.timeframes,
            "排程已啟動 (UTC)"
        );
        true
    }

    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "排程迴圈異常結束");
            }
            info!("排程已停止");
        }
    }

    async fn run_loop(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let now = Utc::now();
            let Some(next) = next_run_after(now, self.config.hour, self.config.minute) else {
                error!(hour = self.config.hour, minute = self.config.minute, "無效的排程時間");
                return;
            };
            let wait = (next - now).to_std().unwrap_or_default();

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
                _ = tokio::time::sleep(wait) => {
                    let job = self.scheduled_job();
                    if let Err(e) = self.enqueue(job, TriggerSource::Scheduled).await {
                        error!(error = %e, "排程擷取工作放入佇列失敗");
                    }
                }
            }
        }
    }

    fn scheduled_job(&self) -> IngestionJob {
        IngestionJob {
            symbols: self.config.symbols.clone(),
            timeframes: self.config.timeframes.clone(),
            days: self.config.days,
            overwrite: self.config.overwrite,
            trigger: TriggerSource::Scheduled,
        }
    }

    /// 立即放入一個擷取工作並回傳工作ID；不等待擷取執行
    pub async fn trigger(&self, request: TriggerRequest) -> Result<TriggerResponse> {
        let symbols = request
            .symbols
            .as_deref()
            .map(normalize_list)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.config.symbols.clone());
        let timeframes = request
            .timeframes
            .as_deref()
            .map(normalize_list)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| self.config.timeframes.clone());
        let days = request.days.unwrap_or(self.config.days);
        let overwrite = request.overwrite.unwrap_or(self.config.overwrite);

        if symbols.is_empty() || timeframes.is_empty() {
            return Err(OrchestratorError::Validation("symbols 與 timeframes 不可為空".into()));
        }
        if !(1..=3650).contains(&days) {
            return Err(OrchestratorError::Validation(format!("days 必須介於 1 與 3650: {}", days)));
        }
        // 擷取端會以資料格式代號組出路徑，放入佇列前先擋下
        for symbol in &symbols {
            normalize_symbol(&to_data_symbol(symbol))?;
        }
        for tf in &timeframes {
            tf.parse::<Timeframe>()?;
        }

        let job = IngestionJob {
            symbols: symbols.clone(),
            timeframes: timeframes.clone(),
            days,
            overwrite,
            trigger: TriggerSource::Manual,
        };
        let job_id = self.enqueue(job, TriggerSource::Manual).await?;
        Ok(TriggerResponse {
            job_id,
            symbols,
            timeframes,
            days,
            overwrite,
        })
    }

    async fn enqueue(&self, job: IngestionJob, trigger: TriggerSource) -> Result<String> {
        let (symbols, timeframes) = (job.symbols.clone(), job.timeframes.clone());
        let result = self.queue.enqueue(JobDescriptor::Ingestion(job)).await;

        let record = RunRecord {
            job_id: result.as_ref().ok().cloned(),
            trigger,
            enqueued_at: Utc::now(),
            success: result.is_ok(),
            symbols,
            timeframes,
            error: result.as_ref().err().map(|e| e.to_string()),
        };
        self.record(record);
        counter!(
            "orchestrator.scheduler.runs",
            "trigger" => trigger.as_str(),
            "success" => if result.is_ok() { "true" } else { "false" }
        )
        .increment(1);

        match result {
            Ok(job_id) => {
                info!(job_id = %job_id, trigger = trigger.as_str(), "擷取工作已放入佇列");
                Ok(job_id)
            }
            Err(e) => Err(OrchestratorError::Unavailable(format!("無法放入擷取工作: {}", e))),
        }
    }

    fn record(&self, record: RunRecord) {
        let mut history = self.history.lock();
        history.push_back(record);
        while history.len() > HISTORY_CAPACITY {
            history.pop_front();
        }
    }

    pub async fn status(&self) -> SchedulerStatus {
        let endpoint = self.queue.endpoint();
        let mut queue = QueueStatus {
            backend: endpoint.backend,
            queue: endpoint.queue,
            connected: false,
            host: endpoint.host,
            port: endpoint.port,
            depth: None,
            error: None,
        };
        match self.queue.ping().await {
            Ok(()) => {
                queue.connected = true;
                match self.queue.depth().await {
                    Ok(depth) => queue.depth = Some(depth),
                    Err(e) => queue.error = Some(e.to_string()),
                }
            }
            Err(e) => queue.error = Some(e.to_string()),
        }

        let running = self.is_running();
        let (last_run, history) = {
            let history = self.history.lock();
            let skip = history.len().saturating_sub(HISTORY_REPORTED);
            (history.back().cloned(), history.iter().skip(skip).cloned().collect())
        };

        SchedulerStatus {
            enabled: self.config.enabled,
            running,
            queue,
            configuration: ScheduleConfiguration {
                hour: self.config.hour,
                minute: self.config.minute,
                symbols: self.config.symbols.clone(),
                timeframes: self.config.timeframes.clone(),
                days: self.config.days,
                overwrite: self.config.overwrite,
            },
            next_run: if running {
                next_run_after(Utc::now(), self.config.hour, self.config.minute)
            } else {
                None
            },
            last_run,
            history,
        }
    }
}
