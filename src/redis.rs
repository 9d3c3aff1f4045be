//! Redis 連接池
//!
//! 佇列的 Redis 後端透過此連接池取得連線。

pub mod pool;

pub use pool::{ConnectionPool, RedisPoolError};
