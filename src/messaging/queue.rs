//! 工作佇列抽象
//!
//! 至少一次投遞：被領取但未確認的工作在可見逾時後重新投遞，
//! 因此執行端必須在產物儲存層做到冪等。
use crate::messaging::models::JobDescriptor;
use crate::messaging::protocol::Message;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// 佇列錯誤
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue backend unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown delivery: {0}")]
    UnknownDelivery(String),

    #[error("Queue error: {0}")]
    Other(String),
}

/// 工作信封
pub type JobMessage = Message<JobDescriptor>;

/// 包裝成信封；回測工作以 task_id 作為相關ID
pub fn envelope(job: JobDescriptor) -> JobMessage {
    let task_id = job.task_id();
    let message = Message::new(job.kind(), job);
    match task_id {
        Some(id) => message.with_correlation(id.to_string()),
        None => message,
    }
}

/// 已領取的工作
#[derive(Debug, Clone)]
pub struct Delivery {
    /// 後端用來確認這次投遞的識別
    pub receipt: String,
    pub message: JobMessage,
}

impl Delivery {
    pub fn job_id(&self) -> &str {
        &self.message.message_id
    }

    pub fn job(&self) -> &JobDescriptor {
        &self.message.payload
    }
}

/// 佇列後端位址，供狀態查詢使用
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueEndpoint {
    pub backend: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub queue: String,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    fn endpoint(&self) -> QueueEndpoint;

    /// 放入工作，回傳工作ID
    async fn enqueue(&self, job: JobDescriptor) -> Result<String, QueueError>;

    /// 領取一個工作；`visibility_timeout` 內未確認即重新投遞
    async fn claim(&self, visibility_timeout: Duration) -> Result<Option<Delivery>, QueueError>;

    /// 確認完成，工作自佇列移除
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// 放棄這次投遞；`requeue` 為 true 時立即可被再次領取
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError>;

    /// 將逾時未確認的工作放回佇列，回傳數量
    async fn requeue_expired(&self) -> Result<usize, QueueError>;

    /// 等待中的工作數
    async fn depth(&self) -> Result<usize, QueueError>;

    async fn ping(&self) -> Result<(), QueueError>;
}
