use config::{Config, ConfigError, Environment as ConfigEnvironment, File};
use std::env;
use std::path::Path;

/// 環境類型枚舉
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    /// 從環境變數取得當前環境設定
    pub fn from_env() -> Self {
        match env::var("BACKTEST_ENV")
            .unwrap_or_else(|_| "development".into())
            .to_lowercase()
            .as_str()
        {
            "production" => Environment::Production,
            _ => Environment::Development,
        }
    }

    /// 轉換為配置文件名
    pub fn as_filename(&self) -> &'static str {
        match self {
            Environment::Development => "development.toml",
            Environment::Production => "production.toml",
        }
    }
}

/// 配置加載器，負責根據環境加載適當的配置
///
/// 優先順序（後者覆蓋前者）：`default.toml` → 環境檔 → `BACKTEST__*` 環境變數。
/// 檔案皆為可選，缺少的欄位由各區段的 `Default` 補上。
pub struct ConfigLoader;

impl ConfigLoader {
    /// 從指定目錄載入指定環境的配置
    pub fn load_from_dir(dir: impl AsRef<Path>, env: Environment) -> Result<Config, ConfigError> {
        let dir = dir.as_ref();

        Config::builder()
            .add_source(File::from(dir.join("default.toml")).required(false))
            .add_source(File::from(dir.join(env.as_filename())).required(false))
            // 從環境變數加載配置（優先級高於文件配置）
            .add_source(
                ConfigEnvironment::with_prefix("BACKTEST")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("scheduler.symbols")
                    .with_list_parse_key("scheduler.timeframes")
                    .try_parsing(true),
            )
            .build()
    }

    /// 載入指定環境的配置，目錄由 `CONFIG_DIR` 決定
    pub fn load(env: Environment) -> Result<Config, ConfigError> {
        let config_dir = env::var("CONFIG_DIR").unwrap_or_else(|_| "config".into());
        Self::load_from_dir(config_dir, env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_environment_from_env() {
        env::remove_var("BACKTEST_ENV");
        assert_eq!(Environment::from_env(), Environment::Development);

        env::set_var("BACKTEST_ENV", "production");
        assert_eq!(Environment::from_env(), Environment::Production);

        env::set_var("BACKTEST_ENV", "development");
        assert_eq!(Environment::from_env(), Environment::Development);

        env::remove_var("BACKTEST_ENV");
    }

    #[test]
    fn test_environment_as_filename() {
        assert_eq!(Environment::Development.as_filename(), "development.toml");
        assert_eq!(Environment::Production.as_filename(), "production.toml");
    }

    #[test]
    #[serial]
    fn test_load_from_dir_with_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("development.toml"),
            "[scheduler]\nhour = 3\nminute = 30\n",
        )
        .unwrap();

        let config = ConfigLoader::load_from_dir(dir.path(), Environment::Development).unwrap();
        let hour: u32 = config.get("scheduler.hour").unwrap();
        assert_eq!(hour, 3);
    }
}
