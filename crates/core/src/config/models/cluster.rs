use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::retry::BackoffPolicy;

/// 集群中的一个 Worker 节点
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    pub name: String,
    pub url: String,
}

/// Worker 回报 Master 的重试配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackRetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
}

impl Default for CallbackRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 60_000,
            jitter_factor: 0.1,
        }
    }
}

impl CallbackRetryConfig {
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            multiplier: self.multiplier,
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter_factor: self.jitter_factor,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// 本节点名称，Worker 回报时携带
    pub node_name: String,
    /// Worker 模式下 Master 的地址
    pub master_url: Option<String>,
    /// Master 启动前必须就绪的副本数
    pub expected_replicas: usize,
    pub nodes: Vec<NodeConfig>,
    pub readiness_timeout_seconds: u64,
    pub readiness_poll_ms: u64,
    /// Master 派发任务的HTTP超时
    pub dispatch_timeout_seconds: u64,
    /// Worker 回报单次请求的HTTP超时
    pub callback_timeout_seconds: u64,
    pub callback_retry: CallbackRetryConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_name: "local".to_string(),
            master_url: None,
            expected_replicas: 1,
            nodes: Vec::new(),
            readiness_timeout_seconds: 300,
            readiness_poll_ms: 1000,
            dispatch_timeout_seconds: 30,
            callback_timeout_seconds: 30,
            callback_retry: CallbackRetryConfig::default(),
        }
    }
}

impl ClusterConfig {
    /// Master 模式的额外校验
    pub fn validate_master(&self) -> anyhow::Result<()> {
        if self.expected_replicas == 0 {
            return Err(anyhow::anyhow!("期望副本数必须大于0"));
        }

        if self.nodes.len() < self.expected_replicas {
            return Err(anyhow::anyhow!(
                "配置的节点数 {} 少于期望副本数 {}",
                self.nodes.len(),
                self.expected_replicas
            ));
        }

        Ok(())
    }

    /// Worker 模式的额外校验
    pub fn validate_worker(&self) -> anyhow::Result<()> {
        if self.node_name.is_empty() {
            return Err(anyhow::anyhow!("节点名称不能为空"));
        }

        if self.master_url.as_deref().unwrap_or_default().is_empty() {
            return Err(anyhow::anyhow!("Worker模式必须配置master_url"));
        }

        if self.callback_retry.max_attempts == 0 {
            return Err(anyhow::anyhow!("回报重试次数必须大于0"));
        }

        Ok(())
    }
}
