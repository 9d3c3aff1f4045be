use anyhow::Result;
use sqlx::{migrate::Migrator, PgPool};
use tracing::info;

// 靜態嵌入遷移目錄（此目錄應放在專案根目錄）
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// 執行數據庫遷移
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    info!("開始執行數據庫遷移...");
    MIGRATOR.run(pool).await?;
    info!("數據庫遷移完成");
    Ok(())
}

/// 已嵌入的遷移版本與描述
pub fn embedded_migrations() -> Vec<(i64, String)> {
    MIGRATOR
        .iter()
        .map(|m| (m.version, m.description.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_table_migration_is_embedded() {
        let migrations = embedded_migrations();
        assert!(!migrations.is_empty());
        assert!(migrations.iter().any(|(_, d)| d.contains("backtest tasks")));
    }
}
