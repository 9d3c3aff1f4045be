use anyhow::{Context, Result};
use backtest_orchestrator::config;
use backtest_orchestrator::storage::{self, embedded_migrations};
use clap::{Parser, Subcommand};
use sqlx::Row;
use std::collections::HashMap;
use tracing::{info, warn};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "migrate", about = "回測任務資料庫遷移工具")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 運行所有未應用的遷移
    Run,

    /// 列出遷移與套用狀態
    Info,

    /// 刪除任務表後重新遷移（資料會全部遺失）
    Reset {
        /// 確認執行
        #[arg(long)]
        yes: bool,
    },
}

const RESET_SQL: &[&str] = &[
    "DROP TABLE IF EXISTS backtest_tasks CASCADE",
    "DROP FUNCTION IF EXISTS update_backtest_tasks_timestamp() CASCADE",
    "DROP FUNCTION IF EXISTS guard_backtest_tasks_terminal() CASCADE",
    "DROP TABLE IF EXISTS _sqlx_migrations",
];

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日誌系統
    tracing_subscriber::fmt()
        .with_env_filter("backtest_orchestrator=info,migrate=info")
        .with_span_events(FmtSpan::CLOSE)
        .init();

    // 解析命令行參數
    let cli = Cli::parse();

    let app_config = config::init_config().context("無法載入配置")?;
    let pool = storage::init_pool(&app_config.database)
        .await
        .context("無法初始化任務資料庫連接池")?;

    match cli.command {
        Commands::Run => {
            info!("開始運行任務資料庫遷移...");
            storage::run_migrations(&pool).await.context("任務資料庫遷移執行失敗")?;
            info!("任務資料庫遷移完成！");
        }
        Commands::Info => {
            let applied: HashMap<i64, bool> = match sqlx::query("SELECT version, success FROM _sqlx_migrations")
                .fetch_all(&pool)
                .await
            {
                Ok(rows) => rows
                    .iter()
                    .map(|row| (row.get::<i64, _>("version"), row.get::<bool, _>("success")))
                    .collect(),
                Err(e) => {
                    warn!("尚未建立遷移紀錄表: {}", e);
                    HashMap::new()
                }
            };

            for (version, description) in embedded_migrations() {
                let state = match applied.get(&version) {
                    Some(true) => "已套用",
                    Some(false) => "失敗",
                    None => "未套用",
                };
                println!("{:>14}  {:<6}  {}", version, state, description);
            }
        }
        Commands::Reset { yes } => {
            if !yes {
                anyhow::bail!("重設會刪除所有任務記錄，請加上 --yes 確認");
            }
            warn!("刪除任務資料表...");
            for statement in RESET_SQL {
                sqlx::query(statement)
                    .execute(&pool)
                    .await
                    .with_context(|| format!("執行失敗: {}", statement))?;
            }
            storage::run_migrations(&pool).await.context("任務資料庫遷移執行失敗")?;
            info!("任務資料庫已重設");
        }
    }

    Ok(())
}
