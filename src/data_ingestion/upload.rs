use crate::artifact::ArtifactStore;
use crate::data_ingestion::validator::{UploadFormat, UploadRequest, UploadValidator};
use crate::error::Result;
use metrics::counter;
use serde::Serialize;
use tracing::info;

/// 上傳回應
#[derive(Debug, Clone, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    /// 相對於資料根目錄的路徑
    pub file_path: String,
    pub size_bytes: u64,
    pub row_count: usize,
    pub format: UploadFormat,
}

/// 外部上傳流程：驗證通過後才寫入產物儲存
#[derive(Debug, Clone)]
pub struct UploadService {
    validator: UploadValidator,
    store: ArtifactStore,
}

impl UploadService {
    pub fn new(validator: UploadValidator, store: ArtifactStore) -> Self {
        Self { validator, store }
    }

    pub async fn upload(&self, request: UploadRequest) -> Result<UploadResponse> {
        let validated = match self.validator.validate(&request) {
            Ok(v) => v,
            Err(e) => {
                counter!("orchestrator.uploads.rejected", "kind" => e.kind().as_str()).increment(1);
                return Err(e);
            }
        };

        let stored = self
            .store
            .write_async(validated.key.relative_path(), validated.parquet_bytes, request.overwrite)
            .await?;

        counter!("orchestrator.uploads.accepted").increment(1);
        info!(path = %stored.relative_path, rows = validated.row_count, overwrite = request.overwrite, "上傳完成");

        Ok(UploadResponse {
            success: true,
            file_path: stored.relative_path,
            size_bytes: stored.size,
            row_count: validated.row_count,
            format: validated.format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchestratorError;
    use assert_matches::assert_matches;

    const CSV: &[u8] = b"timestamp,open,high,low,close,volume\n2024-01-01,1,2,0.5,1.5,10\n";

    fn request(symbol: &str, overwrite: bool) -> UploadRequest {
        UploadRequest {
            bytes: CSV.to_vec(),
            symbol: symbol.into(),
            timeframe: "1D".into(),
            year: "2024".into(),
            overwrite,
        }
    }

    #[tokio::test]
    async fn test_double_upload_conflicts_then_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let service = UploadService::new(UploadValidator::new(1024), ArtifactStore::new(dir.path()));

        let first = service.upload(request("BTC_KRW", false)).await.unwrap();
        assert!(first.success);
        assert_eq!(first.file_path, "BTC_KRW/1D/2024.parquet");

        assert_matches!(
            service.upload(request("BTC_KRW", false)).await,
            Err(OrchestratorError::Conflict(_))
        );
        assert!(service.upload(request("BTC_KRW", true)).await.unwrap().success);
    }

    #[tokio::test]
    async fn test_rejected_upload_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let service = UploadService::new(UploadValidator::new(1024), ArtifactStore::new(dir.path()));

        assert_matches!(
            service.upload(request("../../../ETC", false)).await,
            Err(OrchestratorError::Validation(_))
        );
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
