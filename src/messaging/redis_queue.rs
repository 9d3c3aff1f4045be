//! Redis 工作佇列
//!
//! - `{name}:pending`     待領取清單（LPUSH 進、RPOP 出）
//! - `{name}:processing`  已領取內容，receipt → payload
//! - `{name}:deadlines`   可見逾時，receipt → 到期毫秒
//! - `{name}:redelivered` 重新投遞次數，message_id → 次數
//!
//! 領取與回收都以 Lua 腳本完成，工作不會在兩個結構之間遺失。
use crate::messaging::models::JobDescriptor;
use crate::messaging::protocol::Message;
use crate::messaging::queue::{envelope, Delivery, JobMessage, JobQueue, QueueEndpoint, QueueError};
use crate::redis::{ConnectionPool, RedisPoolError};
use async_trait::async_trait;
use chrono::Utc;
use deadpool_redis::redis::{AsyncCommands, ConnectionAddr, IntoConnectionInfo, RedisError, Script};
use once_cell::sync::Lazy;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

static CLAIM_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
        local payload = redis.call('RPOP', KEYS[1])
        if not payload then
            return false
        end
        redis.call('HSET', KEYS[2], ARGV[1], payload)
        redis.call('ZADD', KEYS[3], ARGV[2], ARGV[1])
        return payload
        ",
    )
});

static ACK_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
        local removed = redis.call('HDEL', KEYS[1], ARGV[1])
        redis.call('ZREM', KEYS[2], ARGV[1])
        redis.call('HDEL', KEYS[3], ARGV[2])
        return removed
        ",
    )
});

// ARGV[1] receipt, ARGV[2] message_id, ARGV[3] 是否放回
static NACK_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
        local payload = redis.call('HGET', KEYS[1], ARGV[1])
        if not payload then
            return 0
        end
        redis.call('HDEL', KEYS[1], ARGV[1])
        redis.call('ZREM', KEYS[2], ARGV[1])
        if ARGV[3] == '1' then
            redis.call('HINCRBY', KEYS[4], ARGV[2], 1)
            redis.call('RPUSH', KEYS[3], payload)
        else
            redis.call('HDEL', KEYS[4], ARGV[2])
        end
        return 1
        ",
    )
});

static REQUEUE_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
        local expired = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
        local moved = 0
        for _, receipt in ipairs(expired) do
            local payload = redis.call('HGET', KEYS[1], receipt)
            redis.call('ZREM', KEYS[2], receipt)
            if payload then
                redis.call('HDEL', KEYS[1], receipt)
                local ok, decoded = pcall(cjson.decode, payload)
                if ok and decoded['message_id'] then
                    redis.call('HINCRBY', KEYS[4], decoded['message_id'], 1)
                end
                redis.call('RPUSH', KEYS[3], payload)
                moved = moved + 1
            end
        end
        return moved
        ",
    )
});

fn map_redis_error(error: RedisError) -> QueueError {
    if error.is_io_error() || error.is_connection_refusal() || error.is_connection_dropped() || error.is_timeout() {
        QueueError::Unavailable(error.to_string())
    } else {
        QueueError::Other(error.to_string())
    }
}

impl From<RedisPoolError> for QueueError {
    fn from(error: RedisPoolError) -> Self {
        match error {
            RedisPoolError::NativeRedisError(e) => map_redis_error(e),
            other => QueueError::Unavailable(other.to_string()),
        }
    }
}

/// 以 Redis 清單實作的至少一次佇列
pub struct RedisJobQueue {
    pool: ConnectionPool,
    name: String,
    endpoint: QueueEndpoint,
}

impl RedisJobQueue {
    pub fn new(pool: ConnectionPool, name: impl Into<String>) -> Self {
        let name = name.into();
        let endpoint = redis_endpoint(pool.url(), &name);
        Self { pool, name, endpoint }
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.name, suffix)
    }
}

/// 由連線字串取出主機與埠
pub fn redis_endpoint(url: &str, queue: &str) -> QueueEndpoint {
    let (host, port) = match url.into_connection_info().map(|info| info.addr) {
        Ok(ConnectionAddr::Tcp(host, port)) => (Some(host), Some(port)),
        Ok(ConnectionAddr::TcpTls { host, port, .. }) => (Some(host), Some(port)),
        Ok(_) => (None, None),
        Err(e) => {
            warn!(error = %e, "無法解析 Redis 連線字串");
            (None, None)
        }
    };
    QueueEndpoint {
        backend: "redis".into(),
        host,
        port,
        queue: queue.to_string(),
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    fn endpoint(&self) -> QueueEndpoint {
        self.endpoint.clone()
    }

    async fn enqueue(&self, job: JobDescriptor) -> Result<String, QueueError> {
        let message = envelope(job);
        let payload = String::from_utf8(message.to_bytes()?).map_err(|e| QueueError::Other(e.to_string()))?;
        let mut conn = self.pool.get_conn().await?;
        let _: i64 = conn
            .lpush(self.key("pending"), payload)
            .await
            .map_err(map_redis_error)?;
        debug!(job_id = %message.message_id, queue = %self.name, "job enqueued");
        Ok(message.message_id)
    }

    async fn claim(&self, visibility_timeout: Duration) -> Result<Option<Delivery>, QueueError> {
        let receipt = Uuid::new_v4().to_string();
        let deadline = Utc::now().timestamp_millis() + visibility_timeout.as_millis() as i64;
        let mut conn = self.pool.get_conn().await?;

        let payload: Option<String> = CLAIM_SCRIPT
            .key(self.key("pending"))
            .key(self.key("processing"))
            .key(self.key("deadlines"))
            .arg(&receipt)
            .arg(deadline)
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        let Some(payload) = payload else {
            return Ok(None);
        };

        let mut message: JobMessage = match Message::from_bytes(payload.as_bytes()) {
            Ok(message) => message,
            Err(e) => {
                // 無法解析的內容不會有人處理，直接丟棄
                warn!(error = %e, "discarding malformed job payload");
                let _: i64 = conn
                    .hdel(self.key("processing"), &receipt)
                    .await
                    .map_err(map_redis_error)?;
                let _: i64 = conn.zrem(self.key("deadlines"), &receipt).await.map_err(map_redis_error)?;
                return Err(QueueError::Serialization(e));
            }
        };
        let redelivered: Option<u32> = conn
            .hget(self.key("redelivered"), &message.message_id)
            .await
            .map_err(map_redis_error)?;
        message.redelivered = redelivered.unwrap_or(0);

        Ok(Some(Delivery { receipt, message }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.pool.get_conn().await?;
        let removed: i64 = ACK_SCRIPT
            .key(self.key("processing"))
            .key(self.key("deadlines"))
            .key(self.key("redelivered"))
            .arg(&delivery.receipt)
            .arg(delivery.job_id())
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        if removed == 0 {
            return Err(QueueError::UnknownDelivery(delivery.receipt.clone()));
        }
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError> {
        let mut conn = self.pool.get_conn().await?;
        let found: i64 = NACK_SCRIPT
            .key(self.key("processing"))
            .key(self.key("deadlines"))
            .key(self.key("pending"))
            .key(self.key("redelivered"))
            .arg(&delivery.receipt)
            .arg(delivery.job_id())
            .arg(if requeue { "1" } else { "0" })
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        if found == 0 {
            return Err(QueueError::UnknownDelivery(delivery.receipt.clone()));
        }
        Ok(())
    }

    async fn requeue_expired(&self) -> Result<usize, QueueError> {
        let mut conn = self.pool.get_conn().await?;
        let moved: i64 = REQUEUE_SCRIPT
            .key(self.key("processing"))
            .key(self.key("deadlines"))
            .key(self.key("pending"))
            .key(self.key("redelivered"))
            .arg(Utc::now().timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(moved.max(0) as usize)
    }

    async fn depth(&self) -> Result<usize, QueueError> {
        let mut conn = self.pool.get_conn().await?;
        let len: usize = conn.llen(self.key("pending")).await.map_err(map_redis_error)?;
        Ok(len)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        self.pool.ping().await.map_err(QueueError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RedisConfig;
    use crate::messaging::models::{IngestionJob, TriggerSource};

    #[test]
    fn test_redis_endpoint_parsing() {
        let endpoint = redis_endpoint("redis://cache.internal:6380/0", "jobs");
        assert_eq!(endpoint.backend, "redis");
        assert_eq!(endpoint.host.as_deref(), Some("cache.internal"));
        assert_eq!(endpoint.port, Some(6380));
        assert_eq!(endpoint.queue, "jobs");
    }

    #[test]
    fn test_unparseable_url_has_no_host() {
        let endpoint = redis_endpoint("not a url", "jobs");
        assert_eq!(endpoint.host, None);
        assert_eq!(endpoint.port, None);
    }

    #[tokio::test]
    #[ignore = "需要 REDIS_URL 指向可用的 Redis"]
    async fn test_redelivery_after_visibility_timeout() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379/".into());
        let pool = ConnectionPool::new(&RedisConfig {
            url,
            ..RedisConfig::default()
        })
        .unwrap();
        let queue = RedisJobQueue::new(pool, format!("test_jobs_{}", Uuid::new_v4().simple()));

        let id = queue
            .enqueue(JobDescriptor::Ingestion(IngestionJob {
                symbols: vec!["BTC_KRW".into()],
                timeframes: vec!["1D".into()],
                days: 1,
                overwrite: false,
                trigger: TriggerSource::Manual,
            }))
            .await
            .unwrap();

        let first = queue.claim(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(first.job_id(), id);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(queue.requeue_expired().await.unwrap(), 1);

        let second = queue.claim(Duration::from_secs(60)).await.unwrap().unwrap();
        assert_eq!(second.job_id(), id);
        assert_eq!(second.message.redelivered, 1);
        queue.ack(&second).await.unwrap();
        assert_eq!(queue.depth().await.unwrap(), 0);
    }
}
