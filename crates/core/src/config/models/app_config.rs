use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    api::{ApiConfig, StorageConfig},
    cluster::ClusterConfig,
    database::DatabaseConfig,
    executor::ExecutorConfig,
};

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub executor: ExecutorConfig,
    pub cluster: ClusterConfig,
    pub api: ApiConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Built-in defaults
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: SCRAPER_)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults =
            ConfigBuilder::try_from(&AppConfig::default()).context("构建默认配置失败")?;
        let mut builder = ConfigBuilder::builder().add_source(defaults);

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else {
            let default_paths = ["config/scraper.toml", "scraper.toml", "/etc/scraper/config.toml"];

            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("SCRAPER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;
        self.storage.validate().context("存储配置验证失败")?;
        self.executor.validate().context("执行器配置验证失败")?;
        self.api.validate().context("API配置验证失败")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::RateLimit;
    use crate::models::ScraperType;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.executor.poll_interval_ms, 1000);
        assert_eq!(config.cluster.callback_retry.max_attempts, 6);
    }

    #[test]
    fn test_from_toml_partial_sections() {
        let config = AppConfig::from_toml(
            r#"
            [database]
            url = "sqlite::memory:"

            [executor.rate_limits]
            browser = "unbounded"

            [cluster]
            node_name = "node-a"
            expected_replicas = 2
            nodes = [
                { name = "w1", url = "http://w1:8000" },
                { name = "w2", url = "http://w2:8000" },
            ]
            "#,
        )
        .unwrap();

        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.executor.rate_limits.get(ScraperType::Browser), RateLimit::Unbounded);
        assert_eq!(config.executor.rate_limits.get(ScraperType::Request), RateLimit::Bounded(30));
        assert!(config.cluster.validate_master().is_ok());
        assert_eq!(config.storage.root_dir, "output");
    }

    #[test]
    fn test_invalid_database_url_rejected() {
        let result = AppConfig::from_toml(
            r#"
            [database]
            url = "postgresql://localhost/db"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_toml_round_trip_keeps_unbounded() {
        let mut config = AppConfig::default();
        config.executor.rate_limits.task = RateLimit::Unbounded;
        let text = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.executor.rate_limits.task, RateLimit::Unbounded);
    }
}
