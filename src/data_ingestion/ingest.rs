//! 行情擷取執行器
//!
//! 每個 (代碼, 週期) 各自從來源取回 `days` 天的 K 線，依 UTC 年份寫入
//! `{SYMBOL}/{TF}/{year}.parquet`。`overwrite=false` 時只追加檔案中還沒有的時間點，
//! 沒有新資料就不寫入，因此重複投遞的同一工作不會改變任何檔案。
use crate::artifact::{ArtifactKey, ArtifactStore, WriteOutcome};
use crate::data_ingestion::loader::read_year;
use crate::error::{OrchestratorError, Result};
use crate::market_data::{
    candles_to_parquet, dedup_sorted, split_by_year, to_data_symbol, to_market_code, Candle, CandleSource, Timeframe,
};
use crate::messaging::IngestionJob;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use metrics::counter;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Completed,
    Skipped,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Completed => "completed",
            ItemStatus::Skipped => "skipped",
            ItemStatus::Failed => "failed",
        }
    }
}

/// 單一 (代碼, 週期) 的結果
#[derive(Debug, Clone, Serialize)]
pub struct IngestionItem {
    pub symbol: String,
    pub timeframe: String,
    pub status: ItemStatus,
    /// 此項目涉及的檔案（含未變動者）
    pub files: Vec<String>,
    pub rows_written: usize,
    pub message: Option<String>,
}

/// 擷取工作的彙總
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestionReport {
    pub total: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub details: Vec<IngestionItem>,
}

impl IngestionReport {
    fn push(&mut self, item: IngestionItem) {
        self.total += 1;
        match item.status {
            ItemStatus::Completed => self.completed += 1,
            ItemStatus::Skipped => self.skipped += 1,
            ItemStatus::Failed => self.failed += 1,
        }
        counter!("orchestrator.ingestion.items", "status" => item.status.as_str()).increment(1);
        self.details.push(item);
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// 本次實際寫入或確認存在的檔案
    pub fn files(&self) -> Vec<String> {
        self.details
            .iter()
            .filter(|d| d.status != ItemStatus::Failed)
            .flat_map(|d| d.files.iter().cloned())
            .collect()
    }
}

enum YearOutcome {
    Written { path: String, rows: usize },
    Unchanged { path: String },
}

pub struct IngestionRunner {
    source: Arc<dyn CandleSource>,
    store: ArtifactStore,
    // 同一行程內對同一路徑的追加依序進行
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl IngestionRunner {
    pub fn new(source: Arc<dyn CandleSource>, store: ArtifactStore) -> Self {
        Self {
            source,
            store,
            locks: DashMap::new(),
        }
    }

    pub async fn run(&self, job: &IngestionJob) -> IngestionReport {
        let mut report = IngestionReport::default();
        for symbol in &job.symbols {
            for timeframe in &job.timeframes {
                let item = self.run_item(symbol, timeframe, job.days, job.overwrite).await;
                report.push(item);
            }
        }
        info!(
            total = report.total,
            completed = report.completed,
            skipped = report.skipped,
            failed = report.failed,
            source = self.source.name(),
            "行情擷取完成"
        );
        report
    }

    async fn run_item(&self, symbol: &str, timeframe: &str, days: u32, overwrite: bool) -> IngestionItem {
        let data_symbol = to_data_symbol(symbol);
        let mut item = IngestionItem {
            symbol: data_symbol.clone(),
            timeframe: timeframe.to_uppercase(),
            status: ItemStatus::Failed,
            files: Vec::new(),
            rows_written: 0,
            message: None,
        };

        let tf = match timeframe.parse::<Timeframe>() {
            Ok(tf) => tf,
            Err(e) => {
                item.message = Some(e.to_string());
                return item;
            }
        };
        item.timeframe = tf.label().to_string();

        let until = Utc::now();
        let since = until - Duration::days(i64::from(days.max(1)));
        let candles = match self
            .source
            .fetch_candles(&to_market_code(symbol), tf, since, until)
            .await
        {
            Ok(candles) => candles,
            Err(e) => {
                warn!(symbol = %data_symbol, timeframe = %tf, error = %e, "行情來源取得失敗");
                item.message = Some(e.to_string());
                return item;
            }
        };
        if candles.is_empty() {
            item.status = ItemStatus::Skipped;
            item.message = Some("來源沒有資料".into());
            return item;
        }

        let mut wrote_any = false;
        for (year, year_candles) in split_by_year(candles) {
            let outcome = match ArtifactKey::new(&data_symbol, tf.label(), year) {
                Ok(key) => self.persist_year(&key, year_candles, overwrite).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(YearOutcome::Written { path, rows }) => {
                    wrote_any = true;
                    item.rows_written += rows;
                    item.files.push(path);
                }
                Ok(YearOutcome::Unchanged { path }) => item.files.push(path),
                Err(e) => {
                    warn!(symbol = %data_symbol, timeframe = %tf, year, error = %e, "寫入行情檔失敗");
                    item.status = ItemStatus::Failed;
                    item.message = Some(e.to_string());
                    return item;
                }
            }
        }

        item.status = if wrote_any {
            ItemStatus::Completed
        } else {
            ItemStatus::Skipped
        };
        item
    }

    async fn persist_year(&self, key: &ArtifactKey, candles: Vec<Candle>, overwrite: bool) -> Result<YearOutcome> {
        let relative = key.relative_path();
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        if overwrite {
            let rows = candles.len();
            let bytes = encode(&candles)?;
            let stored = self.store.write_async(relative, bytes, true).await?;
            return Ok(YearOutcome::Written {
                path: stored.relative_path,
                rows,
            });
        }

        let existing = {
            let store = self.store.clone();
            let key = key.clone();
            tokio::task::spawn_blocking(move || read_year(&store, &key))
                .await
                .map_err(|e| OrchestratorError::Internal(format!("讀取工作中斷: {}", e)))??
        };

        match existing {
            None => {
                let rows = candles.len();
                match self.store.write_if_absent_async(relative, encode(&candles)?).await? {
                    WriteOutcome::Written(stored) => Ok(YearOutcome::Written {
                        path: stored.relative_path,
                        rows,
                    }),
                    WriteOutcome::AlreadyExists { existing, .. } => Ok(YearOutcome::Unchanged {
                        path: existing.relative_path,
                    }),
                }
            }
            Some(existing) => {
                let known: HashSet<i64> = existing.iter().map(|c| c.timestamp.timestamp_millis()).collect();
                let fresh: Vec<Candle> = candles
                    .into_iter()
                    .filter(|c| !known.contains(&c.timestamp.timestamp_millis()))
                    .collect();
                if fresh.is_empty() {
                    return Ok(YearOutcome::Unchanged {
                        path: crate::artifact::to_slash_path(&relative),
                    });
                }
                let rows = fresh.len();
                let merged = dedup_sorted(existing.into_iter().chain(fresh).collect());
                let stored = self.store.write_async(relative, encode(&merged)?, true).await?;
                Ok(YearOutcome::Written {
                    path: stored.relative_path,
                    rows,
                })
            }
        }
    }
}

fn encode(candles: &[Candle]) -> Result<Vec<u8>> {
    candles_to_parquet(candles).map_err(|e| OrchestratorError::Internal(format!("Parquet 編碼失敗: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::source::{MockCandleSource, SourceError};
    use crate::messaging::TriggerSource;
    use chrono::{Datelike, TimeZone};

    fn recent_candles(n: i64) -> Vec<Candle> {
        let today = Utc::now().date_naive();
        (0..n)
            .map(|i| {
                let date = today - Duration::days(i);
                Candle {
                    timestamp: Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap()),
                    open: 1.0,
                    high: 2.0,
                    low: 0.5,
                    close: 1.5,
                    volume: 3.0,
                }
            })
            .collect()
    }

    fn job(overwrite: bool) -> IngestionJob {
        IngestionJob {
            symbols: vec!["KRW-BTC".into()],
            timeframes: vec!["1D".into()],
            days: 1,
            overwrite,
            trigger: TriggerSource::Manual,
        }
    }

    fn runner_with(candles: Vec<Candle>, dir: &std::path::Path) -> IngestionRunner {
        let mut source = MockCandleSource::new();
        source.expect_name().return_const("mock".to_string());
        source
            .expect_fetch_candles()
            .withf(|market, tf, _, _| *market == "KRW-BTC" && *tf == Timeframe::Day1)
            .returning(move |_, _, _, _| Ok(candles.clone()));
        IngestionRunner::new(Arc::new(source), ArtifactStore::new(dir))
    }

    #[tokio::test]
    async fn test_rerun_without_overwrite_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_with(recent_candles(1), dir.path());

        let first = runner.run(&job(false)).await;
        assert_eq!(first.completed, 1);
        let year = Utc::now().year();
        assert_eq!(first.files(), vec![format!("BTC_KRW/1D/{}.parquet", year)]);

        let second = runner.run(&job(false)).await;
        assert_eq!(second.total, 1);
        assert_eq!(second.skipped, 1);
        assert!(second.is_success());
        assert_eq!(second.details[0].rows_written, 0);
    }

    #[tokio::test]
    async fn test_rerun_without_overwrite_appends_new_candles() {
        let dir = tempfile::tempdir().unwrap();
        let wide = IngestionJob { days: 3, ..job(false) };
        runner_with(recent_candles(1), dir.path()).run(&wide).await;

        let runner = runner_with(recent_candles(2), dir.path());
        let report = runner.run(&wide).await;
        assert_eq!(report.completed, 1);
        assert_eq!(report.details[0].rows_written, 1);

        let again = runner.run(&wide).await;
        assert_eq!(again.skipped, 1);
        assert_eq!(again.details[0].rows_written, 0);
    }

    #[tokio::test]
    async fn test_overwrite_rewrites() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_with(recent_candles(1), dir.path());
        runner.run(&job(false)).await;

        let report = runner.run(&job(true)).await;
        assert_eq!(report.completed, 1);
        assert_eq!(report.details[0].rows_written, 1);
    }

    #[tokio::test]
    async fn test_source_failure_and_bad_timeframe_are_collected() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = MockCandleSource::new();
        source.expect_name().return_const("mock".to_string());
        source
            .expect_fetch_candles()
            .returning(|market, _, _, _| Err(SourceError::SymbolNotFound(market.to_string())));
        let runner = IngestionRunner::new(Arc::new(source), ArtifactStore::new(dir.path()));

        let report = runner
            .run(&IngestionJob {
                symbols: vec!["KRW-NOPE".into()],
                timeframes: vec!["1D".into(), "7X".into()],
                days: 1,
                overwrite: false,
                trigger: TriggerSource::Scheduled,
            })
            .await;
        assert_eq!(report.total, 2);
        assert_eq!(report.failed, 2);
        assert!(!report.is_success());
        assert!(report.details[0].message.as_deref().unwrap().contains("KRW-NOPE"));
    }

    #[tokio::test]
    async fn test_empty_source_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_with(Vec::new(), dir.path());
        let report = runner.run(&job(false)).await;
        assert_eq!(report.skipped, 1);
        assert!(report.files().is_empty());
    }
}
