//! 集群 Worker 节点：执行 Master 派发的任务并回报结果

pub mod executor;
pub mod master_client;

pub use executor::WorkerExecutor;
pub use master_client::MasterClient;

use tracing::warn;

/// 节点名：配置为空或为默认值 `local` 时使用主机名
pub fn resolve_node_name(configured: &str) -> String {
    if !configured.is_empty() && configured != "local" {
        return configured.to_string();
    }

    match hostname::get() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            warn!("获取主机名失败，使用默认节点名: {}", e);
            "worker".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_name_wins() {
        assert_eq!(resolve_node_name("worker-3"), "worker-3");
        assert!(!resolve_node_name("").is_empty());
    }
}
