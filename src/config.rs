//! 配置管理模組
//!
//! 負責加載、驗證配置。配置值在啟動時加載一次，
//! 之後以 `ApplicationConfig` 的明確值傳入各元件，不使用全域實例。
pub mod loader;
pub mod manager;
pub mod types;
pub mod validation;

pub use loader::{ConfigLoader, Environment};
pub use manager::{init_config, parse_csv_list};
pub use types::*;
pub use validation::{ValidationError, ValidationUtils, Validator};
