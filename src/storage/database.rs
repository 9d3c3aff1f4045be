use crate::config::DatabaseConfig;
use anyhow::{Context, Result};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::ConnectOptions;
use std::str::FromStr;
use tracing::info;


/// 依配置初始化任務資料庫連接池
pub async fn init_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let options = PgConnectOptions::from_str(&config.connection_url())
        .context("無法解析資料庫連線字串")?
        .disable_statement_logging();

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .max_lifetime(config.max_lifetime())
        .acquire_timeout(config.acquire_timeout())
        .idle_timeout(config.idle_timeout())
        .connect_with(options)
        .await
        .context("無法連線到資料庫")?;

    // 測試連接
    sqlx::query("SELECT 1").execute(&pool).await?;
    info!(max_connections = config.max_connections, "資料庫連接池初始化完成");

    Ok(pool)
}
