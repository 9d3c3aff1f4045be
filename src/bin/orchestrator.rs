use anyhow::{Context, Result};
use backtest_orchestrator::config::{self, ApplicationConfig};
use backtest_orchestrator::data_ingestion::UploadRequest;
use backtest_orchestrator::inventory::InventoryQuery;
use backtest_orchestrator::logging::init_cli_logging;
use backtest_orchestrator::messaging::build_queue;
use backtest_orchestrator::scheduler::TriggerRequest;
use backtest_orchestrator::service::CreateTaskRequest;
use backtest_orchestrator::storage::{init_pool, InMemoryTaskRepository, PgTaskRepository, TaskFilter, TaskRepository};
use backtest_orchestrator::{Orchestrator, OrchestratorError};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "orchestrator", about = "回測任務協調命令列工具")]
struct Cli {
    /// 日誌等級
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 建立回測任務並放入佇列
    Submit {
        #[arg(long)]
        strategy: String,
        /// 逗號分隔，如 BTC_KRW,ETH_KRW
        #[arg(long, value_delimiter = ',', required = true)]
        symbols: Vec<String>,
        /// YYYY-MM-DD
        #[arg(long)]
        start: String,
        /// YYYY-MM-DD
        #[arg(long)]
        end: String,
        #[arg(long)]
        timeframe: Option<String>,
        /// 策略參數 (JSON)
        #[arg(long)]
        params: Option<String>,
    },

    /// 查詢任務記錄
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },

    /// 立即放入一個擷取工作
    Trigger {
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        timeframes: Vec<String>,
        #[arg(long)]
        days: Option<u32>,
        #[arg(long)]
        overwrite: bool,
    },

    /// 排程與佇列狀態
    Status,

    /// 上傳 Parquet 或 CSV 行情檔
    Upload {
        file: PathBuf,
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        timeframe: String,
        #[arg(long)]
        year: String,
        #[arg(long)]
        overwrite: bool,
    },

    /// 列出已儲存的行情檔
    Inventory {
        #[arg(long)]
        symbol: Option<String>,
        #[arg(long)]
        timeframe: Option<String>,
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        offset: Option<usize>,
    },

    /// 刪除超過保留天數的回測結果
    Cleanup {
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum TaskCommands {
    Get {
        task_id: Uuid,
    },
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        strategy: Option<String>,
        #[arg(long)]
        symbol: Option<String>,
        #[arg(long, default_value_t = TaskFilter::DEFAULT_LIMIT)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
}

impl Commands {
    /// 只有任務相關的指令需要連線資料庫
    fn needs_database(&self) -> bool {
        matches!(self, Commands::Submit { .. } | Commands::Task { .. })
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn build(app_config: &ApplicationConfig, needs_database: bool) -> Result<Orchestrator> {
    let repo: Arc<dyn TaskRepository> = if needs_database {
        let pool = init_pool(&app_config.database).await.context("無法連線任務資料庫")?;
        Arc::new(PgTaskRepository::new(Arc::new(pool)))
    } else {
        Arc::new(InMemoryTaskRepository::new())
    };
    let queue = build_queue(app_config)?;
    Ok(Orchestrator::new(app_config, repo, queue))
}

async fn run(cli: Cli) -> Result<()> {
    let app_config = config::init_config().context("無法載入配置")?;
    let orchestrator = build(&app_config, cli.command.needs_database()).await?;

    match cli.command {
        Commands::Submit {
            strategy,
            symbols,
            start,
            end,
            timeframe,
            params,
        } => {
            let params = params
                .map(|raw| serde_json::from_str(&raw))
                .transpose()
                .context("--params 不是有效的 JSON")?;
            let response = orchestrator
                .create_backtest_task(CreateTaskRequest {
                    strategy,
                    symbols,
                    start_date: start,
                    end_date: end,
                    timeframe,
                    params,
                })
                .await?;
            print_json(&response)?;
        }
        Commands::Task {
            command: TaskCommands::Get { task_id },
        } => print_json(&orchestrator.get_task(task_id).await?)?,
        Commands::Task {
            command:
                TaskCommands::List {
                    status,
                    strategy,
                    symbol,
                    limit,
                    offset,
                },
        } => {
            let mut filter = TaskFilter::new().paginate(limit, offset);
            if let Some(status) = status {
                filter = filter.with_status(status.parse()?);
            }
            if let Some(strategy) = strategy {
                filter = filter.with_strategy(strategy);
            }
            if let Some(symbol) = symbol {
                filter = filter.with_symbol(symbol.trim().to_uppercase());
            }
            print_json(&orchestrator.list_tasks(&filter).await?)?;
        }
        Commands::Trigger {
            symbols,
            timeframes,
            days,
            overwrite,
        } => {
            let response = orchestrator
                .scheduler_trigger(TriggerRequest {
                    symbols: Some(symbols),
                    timeframes: Some(timeframes),
                    days,
                    overwrite: overwrite.then_some(true),
                })
                .await?;
            print_json(&response)?;
        }
        Commands::Status => print_json(&orchestrator.scheduler_status().await)?,
        Commands::Upload {
            file,
            symbol,
            timeframe,
            year,
            overwrite,
        } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("無法讀取 {}", file.display()))?;
            let response = orchestrator
                .upload(UploadRequest {
                    bytes,
                    symbol,
                    timeframe,
                    year,
                    overwrite,
                })
                .await?;
            print_json(&response)?;
        }
        Commands::Inventory {
            symbol,
            timeframe,
            year,
            limit,
            offset,
        } => {
            let response = orchestrator
                .inventory(InventoryQuery {
                    symbol,
                    timeframe,
                    year,
                    limit,
                    offset,
                })
                .await?;
            print_json(&response)?;
        }
        Commands::Cleanup { dry_run } => print_json(&orchestrator.cleanup(dry_run).await?)?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_cli_logging(&cli.log_level);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<OrchestratorError>() {
                Some(e) => {
                    // 錯誤類別輸出為 JSON，方便腳本判斷
                    let body = serde_json::to_string_pretty(&e.to_response()).unwrap_or_else(|_| e.to_string());
                    eprintln!("{}", body);
                }
                None => eprintln!("錯誤: {:#}", err),
            }
            ExitCode::FAILURE
        }
    }
}
