use crate::artifact::path::{resolve_under_root, to_slash_path};
use crate::error::{OrchestratorError, Result};
use metrics::counter;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// 已寫入的產物資訊
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredArtifact {
    /// 相對於根目錄、以 `/` 分隔
    pub relative_path: String,
    #[serde(skip)]
    pub absolute_path: PathBuf,
    pub size: u64,
    pub sha256: String,
}

/// 不覆寫寫入的結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written(StoredArtifact),
    /// 路徑已存在；`identical` 表示既有內容與本次內容相同
    AlreadyExists { existing: StoredArtifact, identical: bool },
}

impl WriteOutcome {
    pub fn artifact(&self) -> &StoredArtifact {
        match self {
            WriteOutcome::Written(artifact) => artifact,
            WriteOutcome::AlreadyExists { existing, .. } => existing,
        }
    }
}

/// 檔案系統產物儲存
///
/// 寫入一律先寫同目錄的暫存檔再改名，讀者不會看到寫到一半的檔案。
/// `overwrite=false` 時以不覆蓋的硬連結完成，兩個同時寫入同一路徑的工作者只有一個成功。
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: Arc<PathBuf>,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 取得根目錄下的絕對路徑
    pub fn resolve(&self, relative: &Path) -> Result<PathBuf> {
        resolve_under_root(&self.root, relative)
    }

    pub fn exists(&self, relative: &Path) -> Result<bool> {
        Ok(self.resolve(relative)?.is_file())
    }

    /// 讀取既有產物的資訊，不存在時回傳 None
    pub fn stat(&self, relative: &Path) -> Result<Option<StoredArtifact>> {
        let absolute = self.resolve(relative)?;
        match fs::read(&absolute) {
            Ok(bytes) => Ok(Some(StoredArtifact {
                relative_path: to_slash_path(relative),
                size: bytes.len() as u64,
                sha256: sha256_hex(&bytes),
                absolute_path: absolute,
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn read(&self, relative: &Path) -> Result<Vec<u8>> {
        let absolute = self.resolve(relative)?;
        fs::read(&absolute).map_err(|e| match e.kind() {
            ErrorKind::NotFound => OrchestratorError::NotFound(format!("產物不存在: {}", to_slash_path(relative))),
            _ => e.into(),
        })
    }

    /// 原子寫入
    ///
    /// 路徑已存在且 `overwrite=false` 時回傳 `Conflict`。
    pub fn write(&self, relative: &Path, bytes: &[u8], overwrite: bool) -> Result<StoredArtifact> {
        let target = self.resolve(relative)?;
        let display = to_slash_path(relative);

        if !overwrite && target.exists() {
            counter!("orchestrator.artifacts.conflict").increment(1);
            return Err(OrchestratorError::Conflict(format!("產物已存在: {}", display)));
        }

        let parent = target
            .parent()
            .ok_or_else(|| OrchestratorError::Internal(format!("產物路徑沒有上層目錄: {}", display)))?;
        fs::create_dir_all(parent)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".tmp-")
            .suffix(".partial")
            .tempfile_in(parent)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;

        self.commit(tmp, &target, overwrite, &display)?;

        counter!("orchestrator.artifacts.written").increment(1);
        let path = display.as_str();
        info!(path = %path, size = bytes.len(), overwrite, "產物已寫入");

        Ok(StoredArtifact {
            relative_path: display,
            absolute_path: target,
            size: bytes.len() as u64,
            sha256: sha256_hex(bytes),
        })
    }

    fn commit(&self, tmp: NamedTempFile, target: &Path, overwrite: bool, display: &str) -> Result<()> {
        let persisted = if overwrite {
            tmp.persist(target)
        } else {
            tmp.persist_noclobber(target)
        };

        match persisted {
            Ok(_) => Ok(()),
            // 暫存檔隨 PersistError 內的 NamedTempFile 一併刪除
            Err(err) if err.error.kind() == ErrorKind::AlreadyExists => {
                counter!("orchestrator.artifacts.conflict").increment(1);
                Err(OrchestratorError::Conflict(format!("產物已存在: {}", display)))
            }
            Err(err) => Err(err.error.into()),
        }
    }

    /// 不覆寫寫入，路徑已存在時視為已完成並比對內容
    pub fn write_if_absent(&self, relative: &Path, bytes: &[u8]) -> Result<WriteOutcome> {
        match self.write(relative, bytes, false) {
            Ok(artifact) => Ok(WriteOutcome::Written(artifact)),
            Err(OrchestratorError::Conflict(_)) => {
                let existing = self.stat(relative)?.ok_or_else(|| {
                    OrchestratorError::Internal(format!("產物在衝突後消失: {}", to_slash_path(relative)))
                })?;
                let identical = existing.sha256 == sha256_hex(bytes);
                debug!(path = %existing.relative_path, identical, "產物已存在，略過寫入");
                Ok(WriteOutcome::AlreadyExists { existing, identical })
            }
            Err(e) => Err(e),
        }
    }

    /// 非同步包裝，檔案 IO 在阻塞執行緒池執行
    pub async fn write_async(&self, relative: PathBuf, bytes: Vec<u8>, overwrite: bool) -> Result<StoredArtifact> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.write(&relative, &bytes, overwrite))
            .await
            .map_err(|e| OrchestratorError::Internal(format!("寫入工作中斷: {}", e)))?
    }

    pub async fn write_if_absent_async(&self, relative: PathBuf, bytes: Vec<u8>) -> Result<WriteOutcome> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.write_if_absent(&relative, &bytes))
            .await
            .map_err(|e| OrchestratorError::Internal(format!("寫入工作中斷: {}", e)))?
    }

    /// 刪除根目錄下的整個子目錄，回傳釋放的位元組數
    pub fn remove_dir(&self, relative: &Path) -> Result<u64> {
        let absolute = self.resolve(relative)?;
        let freed = dir_size(&absolute)?;
        fs::remove_dir_all(&absolute)?;
        Ok(freed)
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// 目錄下所有檔案大小總和
pub fn dir_size(path: &Path) -> Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        total += if meta.is_dir() { dir_size(&entry.path())? } else { meta.len() };
    }
    Ok(total)
}
