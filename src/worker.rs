//! 工作執行：擷取與回測兩種工作的處理，以及輪詢佇列的工作者池
pub mod backtest;
pub mod outcome;
pub mod pool;

pub use backtest::{BacktestExecutor, BacktestResultDocument, ResultManifest};
pub use outcome::JobOutcome;
pub use pool::{ingestion_outcome, JobHandler, WorkerPool};
