//! 日誌與指標初始化
use crate::config::LogConfig;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use thiserror::Error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Error, Debug)]
pub enum ObservabilityError {
    #[error("設置日誌系統失敗: {0}")]
    Logging(String),

    #[error("無效的指標監聽位址: {0}")]
    InvalidAddress(String),

    #[error("安裝 Prometheus 匯出器失敗: {0}")]
    Metrics(String),
}

/// 持有檔案日誌的背景寫入執行緒，drop 時把緩衝寫完
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// `RUST_LOG` 優先，否則使用設定的等級
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("backtest_orchestrator={0},{0}", level.to_lowercase())))
}

/// 初始化日誌：主控台為 pretty 或 json，設定目錄時另寫每日輪替的 json 檔
pub fn init_logging(config: &LogConfig) -> Result<LogGuard, ObservabilityError> {
    let json = config.format.eq_ignore_ascii_case("json");
    let console_json = json.then(|| fmt::layer().json().with_current_span(true).with_span_list(false));
    let console_pretty = (!json).then(|| fmt::layer().with_target(true));

    let (file_layer, guard) = match &config.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter(&config.level))
        .with(console_json)
        .with(console_pretty)
        .with(file_layer)
        .try_init()
        .map_err(|e| ObservabilityError::Logging(e.to_string()))?;

    info!(level = %config.level, format = %config.format, directory = ?config.directory, "日誌系統初始化完成");
    Ok(LogGuard { _file: guard })
}

/// 命令列工具用的精簡日誌，只輸出到 stderr
pub fn init_cli_logging(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// 在 `addr` 啟動 Prometheus 抓取端點；未設定時不安裝任何記錄器
pub fn init_metrics(addr: Option<&str>) -> Result<bool, ObservabilityError> {
    let Some(addr) = addr else {
        return Ok(false);
    };
    let addr: SocketAddr = addr
        .parse()
        .map_err(|_| ObservabilityError::InvalidAddress(addr.to_string()))?;

    PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Prefix("orchestrator.jobs.duration".to_string()),
            &[0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0],
        )
        .map_err(|e| ObservabilityError::Metrics(e.to_string()))?
        .with_http_listener(addr)
        .install()
        .map_err(|e| ObservabilityError::Metrics(e.to_string()))?;

    info!(%addr, "Prometheus 指標端點已啟動");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_disabled_without_addr() {
        assert!(!init_metrics(None).unwrap());
    }

    #[test]
    fn test_metrics_rejects_bad_addr() {
        assert!(matches!(
            init_metrics(Some("not-an-addr")),
            Err(ObservabilityError::InvalidAddress(_))
        ));
    }
}
