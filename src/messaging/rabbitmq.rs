// RabbitMQ 模組
// 以持久化佇列與手動確認提供至少一次投遞

pub mod connection;
pub mod queue;

pub use connection::{RabbitMQConnection, RabbitMQConnectionError};
pub use queue::{amqp_endpoint, RabbitMQJobQueue};
