use crate::config::types::RabbitMQConfig;
use deadpool_lapin::{Manager, Object, Pool, PoolError};
use lapin::ConnectionProperties;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

pub type RabbitMQPool = Pool;

#[derive(Error, Debug)]
pub enum RabbitMQConnectionError {
    #[error("Failed to build connection pool: {0}")]
    Build(String),

    #[error("Failed to get connection: {0}")]
    Pool(#[from] PoolError),
}

/// RabbitMQ 連接池
#[derive(Clone)]
pub struct RabbitMQConnection {
    pool: RabbitMQPool,
    url: String,
}

impl RabbitMQConnection {
    /// 創建新的連接池，不會立即連線
    pub fn new(config: &RabbitMQConfig) -> Result<Self, RabbitMQConnectionError> {
        info!("Creating RabbitMQ connection pool, size {}", config.pool_size);

        let properties =
            ConnectionProperties::default().with_executor(tokio_executor_trait::Tokio::current());
        let manager = Manager::new(config.url.clone(), properties);
        let pool = Pool::builder(manager)
            .max_size(config.pool_size as usize)
            .wait_timeout(Some(Duration::from_secs(config.connection_timeout_secs)))
            .create_timeout(Some(Duration::from_secs(config.connection_timeout_secs)))
            .runtime(deadpool_lapin::Runtime::Tokio1)
            .build()
            .map_err(|e| RabbitMQConnectionError::Build(e.to_string()))?;

        Ok(Self {
            pool,
            url: config.url.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// 從連接池取得連線
    pub async fn get(&self) -> Result<Object, RabbitMQConnectionError> {
        self.pool.get().await.map_err(|e| {
            error!("Failed to get RabbitMQ connection: {}", e);
            RabbitMQConnectionError::Pool(e)
        })
    }
}
