use crate::artifact::path::TASKS_DIR;
use crate::artifact::store::{dir_size, ArtifactStore};
use crate::error::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// 清理結果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub scanned: usize,
    pub removed: Vec<String>,
    pub freed_bytes: u64,
    pub dry_run: bool,
}

/// 刪除超過保留天數的 `tasks/<task_id>/` 結果目錄
///
/// 只刪檔案，任務記錄保留。`dry_run` 時只回報會刪除的項目。
pub fn cleanup_old_results(store: &ArtifactStore, ttl_days: u32, dry_run: bool) -> Result<CleanupReport> {
    let cutoff = Utc::now() - Duration::days(i64::from(ttl_days));
    cleanup_before(store, cutoff, dry_run)
}

pub(crate) fn cleanup_before(store: &ArtifactStore, cutoff: DateTime<Utc>, dry_run: bool) -> Result<CleanupReport> {
    let tasks_root = store.root().join(TASKS_DIR);
    let mut report = CleanupReport {
        dry_run,
        ..Default::default()
    };

    let entries = match fs::read_dir(&tasks_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        report.scanned += 1;

        let modified: DateTime<Utc> = entry.metadata()?.modified()?.into();
        if modified >= cutoff {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        let relative = Path::new(TASKS_DIR).join(&name);
        if dry_run {
            report.freed_bytes += dir_size(&entry.path())?;
            report.removed.push(name);
            continue;
        }

        match store.remove_dir(&relative) {
            Ok(freed) => {
                report.freed_bytes += freed;
                report.removed.push(name);
            }
            Err(e) => warn!(task = %name, error = %e, "無法刪除過期結果"),
        }
    }

    info!(
        scanned = report.scanned,
        removed = report.removed.len(),
        freed_bytes = report.freed_bytes,
        dry_run,
        "過期結果清理完成"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_respects_cutoff_and_dry_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.write(Path::new("tasks/old/result.json"), b"1234", false).unwrap();

        // 未來的截止時間讓所有目錄都算過期
        let future = Utc::now() + Duration::days(1);
        let preview = cleanup_before(&store, future, true).unwrap();
        assert_eq!(preview.removed, vec!["old".to_string()]);
        assert_eq!(preview.freed_bytes, 4);
        assert!(dir.path().join("tasks/old").exists());

        let past = Utc::now() - Duration::days(1);
        let kept = cleanup_before(&store, past, false).unwrap();
        assert!(kept.removed.is_empty());
        assert_eq!(kept.scanned, 1);

        let removed = cleanup_before(&store, future, false).unwrap();
        assert_eq!(removed.removed.len(), 1);
        assert!(!dir.path().join("tasks/old").exists());
    }

    #[test]
    fn test_cleanup_without_tasks_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let report = cleanup_old_results(&store, 7, false).unwrap();
        assert_eq!(report.scanned, 0);
    }
}
