use anyhow::{anyhow, Context, Result};
use backtest_orchestrator::config;
use backtest_orchestrator::logging::{init_logging, init_metrics};
use backtest_orchestrator::market_data::UpbitCandleSource;
use backtest_orchestrator::messaging::build_queue;
use backtest_orchestrator::storage::{init_pool, run_migrations, PgTaskRepository};
use backtest_orchestrator::Orchestrator;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化配置
    let app_config = config::init_config()?;

    // 初始化日誌系統，guard 需存活到程序結束
    let _log_guard = init_logging(&app_config.log)?;
    init_metrics(app_config.server.metrics_addr.as_deref())?;

    // 任務資料庫
    let db_pool = init_pool(&app_config.database).await?;
    if app_config.database.auto_migrate {
        run_migrations(&db_pool).await?;
    }
    let repo = Arc::new(PgTaskRepository::new(Arc::new(db_pool)));

    // 工作佇列
    let queue = build_queue(&app_config)?;
    if let Err(e) = queue.ping().await {
        // 佇列暫時無法連線時仍啟動，工作者會持續重試
        warn!(error = %e, "工作佇列目前無法連線");
    }

    std::fs::create_dir_all(&app_config.storage.data_root)
        .with_context(|| format!("無法建立資料目錄: {}", app_config.storage.data_root.display()))?;

    let orchestrator = Orchestrator::new(&app_config, repo, queue);
    let source = Arc::new(UpbitCandleSource::new(&app_config.market_data).map_err(|e| anyhow!("無法建立行情來源: {}", e))?);
    let workers = orchestrator.worker_pool(&app_config, source);

    orchestrator.scheduler().start();
    workers.start();

    info!(
        data_root = %app_config.storage.data_root.display(),
        queue = %app_config.queue.name,
        backend = app_config.queue.backend.as_str(),
        concurrency = app_config.worker.concurrency,
        "協調服務初始化完成"
    );

    // 等待關閉信號
    let result = match signal::ctrl_c().await {
        Ok(()) => {
            info!("接收到關閉信號，正在退出...");
            Ok(())
        }
        Err(err) => {
            error!("無法監聽關閉信號: {}", err);
            Err(anyhow!("無法監聽關閉信號: {}", err))
        }
    };

    orchestrator.scheduler().stop().await;
    workers
        .stop(Duration::from_secs(app_config.server.shutdown_timeout_secs))
        .await;
    info!("協調服務已停止");
    result
}
