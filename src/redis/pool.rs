use crate::config::types::RedisConfig;
use deadpool::managed::QueueMode;
use deadpool_redis::{
    redis::{cmd, RedisError},
    Config, Connection, CreatePoolError, Pool, PoolConfig, PoolError, Runtime, Timeouts,
};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

/// Redis連接池錯誤
#[derive(Error, Debug)]
pub enum RedisPoolError {
    /// 連接池初始化錯誤
    #[error("Redis連接池初始化錯誤: {0}")]
    PoolInitError(String),

    /// 無法獲取連接
    #[error("無法從連接池獲取連接: {0}")]
    GetConnectionError(String),

    /// Redis原生錯誤
    #[error("Redis原生錯誤: {0}")]
    NativeRedisError(#[from] RedisError),
}

impl From<PoolError> for RedisPoolError {
    fn from(error: PoolError) -> Self {
        RedisPoolError::GetConnectionError(error.to_string())
    }
}

impl From<CreatePoolError> for RedisPoolError {
    fn from(error: CreatePoolError) -> Self {
        RedisPoolError::PoolInitError(error.to_string())
    }
}

/// Redis連接池
#[derive(Clone)]
pub struct ConnectionPool {
    pool: Pool,
    url: String,
}

impl ConnectionPool {
    /// 建立連接池，不會立即連線
    pub fn new(config: &RedisConfig) -> Result<Self, RedisPoolError> {
        let mut cfg = Config::from_url(&config.url);
        let timeout = Duration::from_secs(config.connection_timeout_secs);

        cfg.pool = Some(PoolConfig {
            max_size: config.pool_size as usize,
            timeouts: Timeouts {
                wait: Some(timeout),
                create: Some(timeout),
                recycle: Some(Duration::from_secs(60)),
            },
            queue_mode: QueueMode::Fifo,
        });

        let pool = cfg.create_pool(Some(Runtime::Tokio1))?;
        info!("Redis連接池初始化完成，大小: {}", config.pool_size);

        Ok(Self {
            pool,
            url: config.url.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn get_conn(&self) -> Result<Connection, RedisPoolError> {
        match self.pool.get().await {
            Ok(conn) => {
                debug!("從Redis連接池獲取連接成功");
                Ok(conn)
            }
            Err(e) => {
                error!("無法從Redis連接池獲取連接: {}", e);
                Err(e.into())
            }
        }
    }

    /// 送出 PING
    pub async fn ping(&self) -> Result<(), RedisPoolError> {
        let mut conn = self.get_conn().await?;
        let pong: String = cmd("PING").query_async(&mut conn).await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(RedisPoolError::GetConnectionError(format!("unexpected PING reply: {}", pong)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_creation_is_lazy() {
        let config = RedisConfig {
            url: "redis://127.0.0.1:1/".into(),
            pool_size: 2,
            connection_timeout_secs: 1,
        };
        let pool = ConnectionPool::new(&config).unwrap();
        assert_eq!(pool.url(), "redis://127.0.0.1:1/");
    }

    #[tokio::test]
    #[ignore = "需要 REDIS_URL 指向可用的 Redis"]
    async fn test_connection_pool_ping() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379/".into());
        let pool = ConnectionPool::new(&RedisConfig {
            url,
            ..RedisConfig::default()
        })
        .unwrap();
        pool.ping().await.unwrap();
    }
}
