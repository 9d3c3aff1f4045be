//! 產物清單查詢
//!
//! 每次都直接列出檔案系統，不保留任何狀態。
use crate::artifact::{normalize_symbol, normalize_timeframe, ArtifactKey, ArtifactStore};
use crate::error::{OrchestratorError, Result};
use crate::market_data::to_data_symbol;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

pub const DEFAULT_LIMIT: usize = 100;
pub const MAX_LIMIT: usize = 200;

/// 查詢條件
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InventoryQuery {
    pub symbol: Option<String>,
    pub timeframe: Option<String>,
    pub year: Option<i32>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl InventoryQuery {
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InventoryFile {
    pub symbol: String,
    pub timeframe: String,
    pub year: i32,
    /// 相對於資料根目錄
    pub path: String,
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InventoryResponse {
    pub files: Vec<InventoryFile>,
    /// 分頁前符合條件的總數
    pub total_count: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone)]
pub struct Inventory {
    store: ArtifactStore,
}

impl Inventory {
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }

    pub fn list(&self, query: &InventoryQuery) -> Result<InventoryResponse> {
        let symbol = query
            .symbol
            .as_deref()
            .map(|s| normalize_symbol(&to_data_symbol(s)))
            .transpose()?;
        let timeframe = query.timeframe.as_deref().map(normalize_timeframe).transpose()?;

        let mut files: Vec<InventoryFile> = scan(self.store.root())?
            .into_iter()
            .filter(|f| symbol.as_ref().map_or(true, |s| &f.symbol == s))
            .filter(|f| timeframe.as_ref().map_or(true, |t| &f.timeframe == t))
            .filter(|f| query.year.map_or(true, |y| f.year == y))
            .collect();
        files.sort_by(|a, b| b.modified_at.cmp(&a.modified_at).then_with(|| a.path.cmp(&b.path)));

        let total_count = files.len();
        let limit = query.effective_limit();
        let offset = query.offset.unwrap_or(0);
        let files = files.into_iter().skip(offset).take(limit).collect();

        Ok(InventoryResponse {
            files,
            total_count,
            limit,
            offset,
        })
    }

    pub async fn list_async(&self, query: InventoryQuery) -> Result<InventoryResponse> {
        let inventory = self.clone();
        tokio::task::spawn_blocking(move || inventory.list(&query))
            .await
            .map_err(|e| OrchestratorError::Internal(format!("清單查詢中斷: {}", e)))?
    }
}

/// 列出 `{SYMBOL}/{TF}/{year}.parquet`；`tasks/` 與名稱不合規的檔案不列入
fn scan(root: &Path) -> Result<Vec<InventoryFile>> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let pattern = format!("{}/*/*/*.parquet", glob::Pattern::escape(&root.to_string_lossy()));
    let entries = glob::glob(&pattern).map_err(|e| OrchestratorError::Internal(format!("無效的搜尋樣式: {}", e)))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, "無法讀取產物項目");
                continue;
            }
        };
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let Some(key) = ArtifactKey::from_relative_path(relative) else {
            debug!(path = %path.display(), "略過不合規的檔名");
            continue;
        };
        // 列舉與讀取之間檔案可能已被清除
        let meta = match std::fs::metadata(&path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "檔案已不存在，略過");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if !meta.is_file() {
            continue;
        }
        let modified_at = meta.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now());
        files.push(InventoryFile {
            path: format!("{}/{}/{}.parquet", key.symbol, key.timeframe, key.year),
            symbol: key.symbol,
            timeframe: key.timeframe,
            year: key.year,
            size_bytes: meta.len(),
            modified_at,
        });
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn store_with(paths: &[&str]) -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        for p in paths {
            store.write(Path::new(p), b"PAR1....PAR1", false).unwrap();
        }
        (dir, store)
    }

    #[test]
    fn test_lists_market_data_only() {
        let (_dir, store) = store_with(&[
            "BTC_KRW/1D/2023.parquet",
            "BTC_KRW/1D/2024.parquet",
            "ETH_KRW/1H/2024.parquet",
            "tasks/00000000-0000-0000-0000-000000000001/result.json",
            "btc_krw/1D/2024.parquet",
            "BTC_KRW/1D/notes.parquet",
        ]);
        let response = Inventory::new(store).list(&InventoryQuery::default()).unwrap();
        assert_eq!(response.total_count, 3);
        assert!(response.files.iter().all(|f| f.size_bytes == 12));
    }

    #[test]
    fn test_filters_and_pagination() {
        let (_dir, store) = store_with(&[
            "BTC_KRW/1D/2022.parquet",
            "BTC_KRW/1D/2023.parquet",
            "BTC_KRW/1D/2024.parquet",
            "ETH_KRW/1D/2024.parquet",
        ]);
        let inventory = Inventory::new(store);

        let btc = inventory
            .list(&InventoryQuery {
                symbol: Some("krw-btc".into()),
                limit: Some(2),
                offset: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(btc.total_count, 3);
        assert_eq!(btc.files.len(), 2);

        let year = inventory
            .list(&InventoryQuery {
                year: Some(2024),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(year.total_count, 2);
    }

    #[test]
    fn test_traversal_filter_rejected() {
        let (_dir, store) = store_with(&[]);
        let result = Inventory::new(store).list(&InventoryQuery {
            symbol: Some("../etc".into()),
            ..Default::default()
        });
        assert_matches!(result, Err(OrchestratorError::Validation(_)));
    }

    #[test]
    fn test_limit_is_clamped() {
        let query = InventoryQuery {
            limit: Some(10_000),
            ..Default::default()
        };
        assert_eq!(query.effective_limit(), MAX_LIMIT);
        assert_eq!(InventoryQuery::default().effective_limit(), DEFAULT_LIMIT);
    }

    #[test]
    fn test_missing_root_is_empty() {
        let store = ArtifactStore::new("/nonexistent/inventory/root");
        let response = Inventory::new(store).list(&InventoryQuery::default()).unwrap();
        assert_eq!(response.total_count, 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_vanished_entry_is_skipped() {
        let (dir, store) = store_with(&["BTC_KRW/1D/2024.parquet"]);
        // 指向不存在目標的連結，列舉得到但讀不到中繼資料
        std::os::unix::fs::symlink(
            dir.path().join("BTC_KRW/1D/gone.parquet"),
            dir.path().join("BTC_KRW/1D/2023.parquet"),
        )
        .unwrap();

        let response = Inventory::new(store).list(&InventoryQuery::default()).unwrap();
        assert_eq!(response.total_count, 1);
        assert_eq!(response.files[0].path, "BTC_KRW/1D/2024.parquet");
    }
}
