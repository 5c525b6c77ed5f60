use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use scrape_core::config::models::NodeConfig;
use scrape_core::{SchedulerError, SchedulerResult};

/// 集群中的一个 Worker 节点
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerNode {
    pub name: String,
    pub url: String,
}

impl From<&NodeConfig> for WorkerNode {
    fn from(config: &NodeConfig) -> Self {
        Self {
            name: config.name.clone(),
            url: config.url.trim_end_matches('/').to_string(),
        }
    }
}

/// 节点发现：返回当前已就绪的节点
#[async_trait]
pub trait NodeDiscovery: Send + Sync {
    async fn ready_nodes(&self) -> SchedulerResult<Vec<WorkerNode>>;
}

/// 配置文件中的静态节点列表，通过 `GET /health` 探测就绪
pub struct StaticNodeDiscovery {
    nodes: Vec<WorkerNode>,
    client: reqwest::Client,
}

impl StaticNodeDiscovery {
    pub fn new(nodes: &[NodeConfig], probe_timeout: Duration) -> SchedulerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(probe_timeout)
            .build()
            .map_err(|e| SchedulerError::Network(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self {
            nodes: nodes.iter().map(WorkerNode::from).collect(),
            client,
        })
    }

    async fn probe(&self, node: &WorkerNode) -> bool {
        let url = format!("{}/health", node.url);
        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                debug!("节点 {} 未就绪: HTTP {}", node.name, response.status());
                false
            }
            Err(e) => {
                debug!("节点 {} 探测失败: {}", node.name, e);
                false
            }
        }
    }
}

#[async_trait]
impl NodeDiscovery for StaticNodeDiscovery {
    async fn ready_nodes(&self) -> SchedulerResult<Vec<WorkerNode>> {
        let probes = self.nodes.iter().map(|node| async move { (node, self.probe(node).await) });
        let results = futures::future::join_all(probes).await;

        Ok(results
            .into_iter()
            .filter(|(_, ready)| *ready)
            .map(|(node, _)| node.clone())
            .collect())
    }
}

/// 阻塞直到就绪节点数达到期望副本数
pub async fn wait_for_replicas(
    discovery: &dyn NodeDiscovery,
    expected: usize,
    timeout: Duration,
    poll_interval: Duration,
) -> SchedulerResult<Vec<WorkerNode>> {
    let deadline = Instant::now() + timeout;

    loop {
        let ready = discovery.ready_nodes().await?;
        if ready.len() >= expected {
            info!("集群就绪: {}/{} 个节点", ready.len(), expected);
            return Ok(ready);
        }

        if Instant::now() >= deadline {
            return Err(SchedulerError::ClusterNotReady(format!(
                "等待 {:?} 后只有 {}/{} 个节点就绪",
                timeout,
                ready.len(),
                expected
            )));
        }

        warn!("等待集群就绪: {}/{} 个节点", ready.len(), expected);
        tokio::time::sleep(poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 第 n 次查询时就绪 n 个节点
    struct GrowingDiscovery {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl NodeDiscovery for GrowingDiscovery {
        async fn ready_nodes(&self) -> SchedulerResult<Vec<WorkerNode>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok((0..n)
                .map(|i| WorkerNode {
                    name: format!("w{i}"),
                    url: format!("http://w{i}"),
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_waits_until_expected_replicas() {
        let discovery = GrowingDiscovery {
            calls: AtomicUsize::new(0),
        };
        let nodes = wait_for_replicas(&discovery, 3, Duration::from_secs(5), Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(nodes.len(), 3);
    }

    #[tokio::test]
    async fn test_unreachable_static_nodes_time_out() {
        let nodes = vec![NodeConfig {
            name: "w1".to_string(),
            url: "http://127.0.0.1:9/".to_string(),
        }];
        let discovery = StaticNodeDiscovery::new(&nodes, Duration::from_millis(200)).unwrap();
        let err = wait_for_replicas(&discovery, 1, Duration::from_millis(50), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::ClusterNotReady(_)));
    }
}
