use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 消息封裝，所有佇列內容都以此格式傳遞
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message<T> {
    /// 唯一消息ID，同時作為工作ID回傳給呼叫端
    pub message_id: String,
    /// 消息類型
    pub message_type: String,
    /// 相關ID
    pub correlation_id: Option<String>,
    /// 發送時間
    pub timestamp: DateTime<Utc>,
    /// 已被重新投遞的次數
    #[serde(default)]
    pub redelivered: u32,
    /// 消息載荷
    pub payload: T,
}

impl<T> Message<T> {
    /// 創建新消息
    pub fn new(message_type: &str, payload: T) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            message_type: message_type.to_string(),
            correlation_id: None,
            timestamp: Utc::now(),
            redelivered: 0,
            payload,
        }
    }

    /// 設置相關ID
    pub fn with_correlation(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// 重新投遞前呼叫
    pub fn mark_redelivered(&mut self) {
        self.redelivered = self.redelivered.saturating_add(1);
    }
}

impl<T: Serialize> Message<T> {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl<T: DeserializeOwned> Message<T> {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
