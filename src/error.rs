//! 協調核心的錯誤分類
//!
//! 每個錯誤類別對應呼叫端可觀察的不同處理方式，
//! `status_code()` 提供給 HTTP 層的對應狀態碼。
use crate::messaging::QueueError;
use serde::Serialize;
use thiserror::Error;

/// 協調核心錯誤
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// 格式錯誤或不安全的輸入，在任何副作用之前拒絕
    #[error("輸入驗證失敗: {0}")]
    Validation(String),

    /// 上傳資料缺少必要欄位或無法解析
    #[error("資料結構錯誤: {0}")]
    Schema(String),

    /// 產物路徑重複或重複的終態轉換
    #[error("資源衝突: {0}")]
    Conflict(String),

    /// 未知的任務或回測資料不足
    #[error("找不到資源: {0}")]
    NotFound(String),

    /// 任務已處於終態
    #[error("狀態不允許此操作: {0}")]
    InvalidState(String),

    /// 佇列後端無法連線
    #[error("後端服務不可用: {0}")]
    Unavailable(String),

    #[error("資料庫錯誤: {0}")]
    Database(#[from] sqlx::Error),

    #[error("佇列錯誤: {0}")]
    Queue(#[from] QueueError),

    #[error("IO 錯誤: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化錯誤: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("內部錯誤: {0}")]
    Internal(String),
}

/// 錯誤類別，用於跨邊界回報
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Schema,
    Conflict,
    NotFound,
    InvalidState,
    Unavailable,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::Schema => "schema_error",
            ErrorKind::Conflict => "conflict_error",
            ErrorKind::NotFound => "not_found_error",
            ErrorKind::InvalidState => "invalid_state_error",
            ErrorKind::Unavailable => "unavailable_error",
            ErrorKind::Internal => "internal_error",
        }
    }
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::Validation(_) => ErrorKind::Validation,
            OrchestratorError::Schema(_) => ErrorKind::Schema,
            OrchestratorError::Conflict(_) => ErrorKind::Conflict,
            OrchestratorError::NotFound(_) => ErrorKind::NotFound,
            OrchestratorError::InvalidState(_) => ErrorKind::InvalidState,
            OrchestratorError::Unavailable(_) | OrchestratorError::Queue(_) => ErrorKind::Unavailable,
            OrchestratorError::Database(_)
            | OrchestratorError::Io(_)
            | OrchestratorError::Serialization(_)
            | OrchestratorError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// 對應的 HTTP 狀態碼
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 400,
            ErrorKind::Schema => 415,
            ErrorKind::Conflict | ErrorKind::InvalidState => 409,
            ErrorKind::NotFound => 404,
            ErrorKind::Unavailable => 503,
            ErrorKind::Internal => 500,
        }
    }

    /// 核心不會自動重試；只有基礎設施類錯誤值得呼叫端稍後重試
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Unavailable(_)
                | OrchestratorError::Queue(_)
                | OrchestratorError::Database(_)
                | OrchestratorError::Io(_)
        )
    }

    /// 轉為回報用的錯誤內容
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.kind().as_str().to_string(),
            message: self.to_string(),
        }
    }
}

/// 標準錯誤回應
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
