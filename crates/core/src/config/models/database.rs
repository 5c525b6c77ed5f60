use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::retry::BackoffPolicy;

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// 瞬时错误的最大尝试次数
    pub retry_attempts: u32,
    /// 固定重试间隔（毫秒）
    pub retry_delay_ms: u64,
    /// 重试耗尽时终止进程，交由外部守护重启（集群/虚拟机部署）
    pub fatal_on_exhaustion: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/tasks.db".to_string(),
            max_connections: 5,
            retry_attempts: 3,
            retry_delay_ms: 500,
            fatal_on_exhaustion: false,
        }
    }
}

impl DatabaseConfig {
    /// Validate database configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.url.is_empty() {
            return Err(anyhow::anyhow!("数据库URL不能为空"));
        }

        if !self.url.starts_with("sqlite:") {
            return Err(anyhow::anyhow!("数据库URL必须是SQLite格式"));
        }

        if self.max_connections == 0 {
            return Err(anyhow::anyhow!("最大连接数必须大于0"));
        }

        if self.retry_attempts == 0 {
            return Err(anyhow::anyhow!("重试次数必须大于0"));
        }

        Ok(())
    }

    pub fn retry_policy(&self) -> BackoffPolicy {
        BackoffPolicy::fixed(self.retry_attempts, Duration::from_millis(self.retry_delay_ms))
    }
}
