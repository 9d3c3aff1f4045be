use crate::config::loader::{ConfigLoader, Environment};
use crate::config::types::ApplicationConfig;
use crate::config::validation::Validator;
use config::ConfigError;
use std::path::Path;
use tracing::debug;

/// 載入並驗證當前環境的配置（在應用程序啟動時調用）
///
/// 回傳的值由呼叫端持有並傳入各元件。
pub fn init_config() -> Result<ApplicationConfig, ConfigError> {
    let app_config = ApplicationConfig::load_from_env()?;
    debug!("配置初始化成功，環境：{:?}", Environment::from_env());
    Ok(app_config)
}

/// 解析逗號分隔的清單：去除空白、轉大寫、略過空項目
pub fn parse_csv_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().to_uppercase())
        .filter(|item| !item.is_empty())
        .collect()
}

/// ApplicationConfig 加載方法實現
impl ApplicationConfig {
    /// 從環境變數指定的環境加載配置
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let env = Environment::from_env();
        debug!("從環境加載配置: {:?}", env);
        Self::load(env)
    }

    /// 從指定環境加載配置
    pub fn load(env: Environment) -> Result<Self, ConfigError> {
        Self::from_source(ConfigLoader::load(env)?)
    }

    /// 從指定目錄加載配置
    pub fn load_from_dir(dir: impl AsRef<Path>, env: Environment) -> Result<Self, ConfigError> {
        Self::from_source(ConfigLoader::load_from_dir(dir, env)?)
    }

    fn from_source(source: config::Config) -> Result<Self, ConfigError> {
        let mut app_config: ApplicationConfig = source.try_deserialize()?;
        app_config.normalize();

        app_config
            .validate()
            .map_err(|err| ConfigError::Message(format!("配置驗證失敗: {}", err)))?;
        debug!("配置驗證通過");

        Ok(app_config)
    }

    /// 統一排程清單格式
    fn normalize(&mut self) {
        let joined = self.scheduler.symbols.join(",");
        self.scheduler.symbols = parse_csv_list(&joined);
        let joined = self.scheduler.timeframes.join(",");
        self.scheduler.timeframes = parse_csv_list(&joined);
    }
}
