// 模組定義
pub mod artifact;
pub mod config;
pub mod data_ingestion;
pub mod error;
pub mod inventory;
pub mod logging;
pub mod market_data;
pub mod messaging;
pub mod redis;
pub mod scheduler;
pub mod service;
pub mod storage;
pub mod strategy;
pub mod task;
pub mod worker;

pub use error::{OrchestratorError, Result};
pub use service::Orchestrator;
