use crate::error::{OrchestratorError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// 代碼與週期只允許大寫英數與底線
static COMPONENT_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z0-9_]+$").expect("固定的正規表示式"));

pub const MAX_SYMBOL_LEN: usize = 20;
pub const MAX_TIMEFRAME_LEN: usize = 10;
pub const MARKET_DATA_EXT: &str = "parquet";
pub const TASKS_DIR: &str = "tasks";

/// 標準化單一路徑元件：去空白、轉大寫、白名單檢查
///
/// 任何可能跳出根目錄的輸入（`..`、分隔符號、空字元等）都不會通過。
fn normalize_component(raw: &str, field: &str, max_len: usize) -> Result<String> {
    let value = raw.trim().to_uppercase();
    if value.is_empty() || value.chars().count() > max_len {
        return Err(OrchestratorError::Validation(format!(
            "{} 長度必須介於 1 到 {} 之間: {:?}",
            field, max_len, raw
        )));
    }
    if !COMPONENT_PATTERN.is_match(&value) {
        return Err(OrchestratorError::Validation(format!(
            "{} 只能包含英數字與底線: {:?}",
            field, raw
        )));
    }
    Ok(value)
}

pub fn normalize_symbol(raw: &str) -> Result<String> {
    normalize_component(raw, "symbol", MAX_SYMBOL_LEN)
}

pub fn normalize_timeframe(raw: &str) -> Result<String> {
    normalize_component(raw, "timeframe", MAX_TIMEFRAME_LEN)
}

/// 年份必須是四位數字
pub fn parse_year(raw: &str) -> Result<i32> {
    let value = raw.trim();
    if value.len() != 4 || !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(OrchestratorError::Validation(format!("year 必須是四位數字: {:?}", raw)));
    }
    value
        .parse::<i32>()
        .map_err(|_| OrchestratorError::Validation(format!("year 無效: {:?}", raw)))
}

/// 確認相對路徑只包含一般元件，回傳根目錄下的絕對路徑
pub fn resolve_under_root(root: &Path, relative: &Path) -> Result<PathBuf> {
    if relative.as_os_str().is_empty() {
        return Err(OrchestratorError::Validation("路徑不可為空".into()));
    }
    for component in relative.components() {
        match component {
            Component::Normal(_) => {}
            _ => {
                return Err(OrchestratorError::Validation(format!(
                    "路徑不可離開儲存根目錄: {}",
                    relative.display()
                )))
            }
        }
    }
    Ok(root.join(relative))
}

/// 以 `/` 分隔的相對路徑字串，跨平台一致
pub fn to_slash_path(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// 行情資料產物鍵：代碼 / 週期 / 年份
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactKey {
    pub symbol: String,
    pub timeframe: String,
    pub year: i32,
}

impl ArtifactKey {
    /// 驗證並標準化後建立
    pub fn new(symbol: &str, timeframe: &str, year: i32) -> Result<Self> {
        if !(1000..=9999).contains(&year) {
            return Err(OrchestratorError::Validation(format!("year 必須是四位數字: {}", year)));
        }
        Ok(Self {
            symbol: normalize_symbol(symbol)?,
            timeframe: normalize_timeframe(timeframe)?,
            year,
        })
    }

    /// `{SYMBOL}/{TF}/{year}.parquet`
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(&self.symbol)
            .join(&self.timeframe)
            .join(format!("{}.{}", self.year, MARKET_DATA_EXT))
    }

    /// 從相對路徑反推鍵，格式不符時回傳 None
    pub fn from_relative_path(relative: &Path) -> Option<Self> {
        let parts: Vec<&str> = relative.iter().filter_map(|p| p.to_str()).collect();
        if parts.len() != 3 {
            return None;
        }
        let stem = parts[2].strip_suffix(&format!(".{}", MARKET_DATA_EXT))?;
        let year = parse_year(stem).ok()?;
        let key = Self::new(parts[0], parts[1], year).ok()?;
        // 目錄名稱必須已是標準形式
        (key.symbol == parts[0] && key.timeframe == parts[1]).then_some(key)
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.symbol, self.timeframe, self.year)
    }
}

/// 回測結果檔 `tasks/{task_id}/result.json`
pub fn task_result_path(task_id: uuid::Uuid) -> PathBuf {
    PathBuf::from(TASKS_DIR).join(task_id.to_string()).join("result.json")
}

/// 回測清單檔 `tasks/{task_id}/manifest.json`
pub fn task_manifest_path(task_id: uuid::Uuid) -> PathBuf {
    PathBuf::from(TASKS_DIR).join(task_id.to_string()).join("manifest.json")
}
