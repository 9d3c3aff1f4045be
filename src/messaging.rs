// 消息系統模組
// 工作佇列抽象與其 Redis、RabbitMQ、行程內後端

pub mod memory;
pub mod models;
pub mod protocol;
pub mod queue;
pub mod rabbitmq;
pub mod redis_queue;

use crate::config::{ApplicationConfig, QueueBackend};
use crate::redis::ConnectionPool;
use std::sync::Arc;
use tracing::info;

pub use memory::InMemoryJobQueue;
pub use models::{BacktestJob, IngestionJob, JobDescriptor, TriggerSource};
pub use protocol::Message;
pub use queue::{Delivery, JobMessage, JobQueue, QueueEndpoint, QueueError};
pub use rabbitmq::{RabbitMQConnection, RabbitMQJobQueue};
pub use redis_queue::RedisJobQueue;

/// 依設定建立佇列後端；建立時不要求後端可連線
pub fn build_queue(config: &ApplicationConfig) -> Result<Arc<dyn JobQueue>, QueueError> {
    let name = config.queue.name.clone();
    let queue: Arc<dyn JobQueue> = match config.queue.backend {
        QueueBackend::Redis => {
            let pool = ConnectionPool::new(&config.redis).map_err(|e| QueueError::Unavailable(e.to_string()))?;
            Arc::new(RedisJobQueue::new(pool, name))
        }
        QueueBackend::RabbitMQ => {
            let connection = RabbitMQConnection::new(&config.rabbitmq)?;
            Arc::new(RabbitMQJobQueue::new(connection, name, config.queue.prefetch_count))
        }
        QueueBackend::Memory => Arc::new(InMemoryJobQueue::new(name)),
    };
    let endpoint = queue.endpoint();
    info!(
        backend = %endpoint.backend,
        host = endpoint.host.as_deref().unwrap_or("-"),
        queue = %endpoint.queue,
        "job queue configured"
    );
    Ok(queue)
}
