//! 產物儲存
//!
//! 以 (代碼, 週期, 年份) 或 task_id 決定唯一路徑，寫入為原子操作。
pub mod cleanup;
pub mod path;
pub mod store;

pub use cleanup::{cleanup_old_results, CleanupReport};
pub use path::{
    normalize_symbol, normalize_timeframe, parse_year, task_manifest_path, task_result_path, to_slash_path,
    ArtifactKey, TASKS_DIR,
};
pub use store::{sha256_hex, ArtifactStore, StoredArtifact, WriteOutcome};
