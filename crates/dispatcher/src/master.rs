use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use scrape_core::{
    config::models::RateLimits,
    models::{RunWorkerTaskRequest, ScraperType, Task, TaskFailureReport, TaskSuccessReport},
    records::normalize_records,
    traits::{ClusterCallbackHandler, TaskRepository},
    ScrapeOutcome, SchedulerError, SchedulerResult,
};

use crate::capacity::CapacityTracker;
use crate::completion::TaskFinalizer;
use crate::discovery::WorkerNode;
use crate::executor::mark_parents_started;
use crate::strategies::{NodeLoad, NodeSelectionStrategy};

/// 一个节点及其容量计数
struct NodeSlot {
    node: WorkerNode,
    capacity: CapacityTracker,
    /// 已派发、尚未回报的任务
    in_flight: Mutex<HashSet<i64>>,
}

impl NodeSlot {
    fn in_flight(&self) -> MutexGuard<'_, HashSet<i64>> {
        self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// 集群执行器：把任务派发到负载最低的 Worker 节点
///
/// 节点与集群的容量在派发时即计入，而不是等远端确认；
/// 回调到达时归还，派发失败时立即走失败流程归还。
/// 每个任务只归还、终结一次：重复回调以及派发失败后迟到的回调都会被忽略。
pub struct MasterExecutor {
    repo: Arc<dyn TaskRepository>,
    finalizer: Arc<TaskFinalizer>,
    nodes: Vec<NodeSlot>,
    cluster_capacity: CapacityTracker,
    strategy: Box<dyn NodeSelectionStrategy>,
    client: reqwest::Client,
    poll_interval: Duration,
}

impl MasterExecutor {
    /// `limits` 为单副本上限，集群总上限按节点数放大
    pub fn new(
        repo: Arc<dyn TaskRepository>,
        finalizer: Arc<TaskFinalizer>,
        nodes: Vec<WorkerNode>,
        limits: &RateLimits,
        strategy: Box<dyn NodeSelectionStrategy>,
        dispatch_timeout: Duration,
        poll_interval: Duration,
    ) -> SchedulerResult<Self> {
        if nodes.is_empty() {
            return Err(SchedulerError::ClusterNotReady("没有可用的Worker节点".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(dispatch_timeout)
            .build()
            .map_err(|e| SchedulerError::Network(format!("创建HTTP客户端失败: {e}")))?;

        let cluster_capacity = CapacityTracker::new(limits.scaled(nodes.len()));
        let nodes = nodes
            .into_iter()
            .map(|node| NodeSlot {
                node,
                capacity: CapacityTracker::new(limits.clone()),
                in_flight: Mutex::new(HashSet::new()),
            })
            .collect::<Vec<_>>();

        info!(
            "Master执行器初始化: {} 个节点，策略 {}",
            nodes.len(),
            strategy.name()
        );

        Ok(Self {
            repo,
            finalizer,
            nodes,
            cluster_capacity,
            strategy,
            client,
            poll_interval,
        })
    }

    pub fn cluster_current(&self, scraper_type: ScraperType) -> usize {
        self.cluster_capacity.current(scraper_type)
    }

    pub fn node_current(&self, node_name: &str, scraper_type: ScraperType) -> Option<usize> {
        self.nodes
            .iter()
            .find(|slot| slot.node.name == node_name)
            .map(|slot| slot.capacity.current(scraper_type))
    }

    pub fn in_flight(&self, node_name: &str) -> Option<usize> {
        self.nodes
            .iter()
            .find(|slot| slot.node.name == node_name)
            .map(|slot| slot.in_flight().len())
    }

    /// 按最低负载选择节点并立即计入容量
    fn place(&self, task_id: i64, scraper_type: ScraperType) -> Option<&WorkerNode> {
        let loads: Vec<NodeLoad<'_>> = self
            .nodes
            .iter()
            .map(|slot| NodeLoad {
                name: &slot.node.name,
                current: slot.capacity.current(scraper_type),
            })
            .collect();

        let index = self.strategy.select(scraper_type, &loads)?;
        let slot = self.nodes.get(index)?;
        slot.in_flight().insert(task_id);
        slot.capacity.increment(scraper_type);
        self.cluster_capacity.increment(scraper_type);
        Some(&slot.node)
    }

    /// 归还任务占用的容量；任务不在该节点的在途集合中时返回 `false`
    fn release(&self, node_name: &str, task_id: i64, scraper_type: ScraperType) -> bool {
        let Some(slot) = self.nodes.iter().find(|slot| slot.node.name == node_name) else {
            warn!("任务 {} 的回报来自未知节点 {}", task_id, node_name);
            return false;
        };
        if !slot.in_flight().remove(&task_id) {
            debug!("任务 {} 不在节点 {} 的在途列表中，忽略重复回报", task_id, node_name);
            return false;
        }
        slot.capacity.decrement(scraper_type);
        self.cluster_capacity.decrement(scraper_type);
        true
    }

    /// 一次准入：按集群剩余容量认领并派发
    pub async fn tick(self: &Arc<Self>, scraper_type: ScraperType) -> SchedulerResult<Vec<JoinHandle<()>>> {
        let remaining = self.cluster_capacity.remaining(scraper_type);
        if remaining == Some(0) {
            return Ok(Vec::new());
        }

        let claimed = self.repo.claim_pending(scraper_type, remaining).await?;
        if claimed.is_empty() {
            return Ok(Vec::new());
        }
        mark_parents_started(self.repo.as_ref(), &claimed).await?;

        let mut handles = Vec::with_capacity(claimed.len());
        for task in claimed {
            match self.place(task.id, scraper_type) {
                Some(node) => {
                    let node = node.clone();
                    let master = Arc::clone(self);
                    handles.push(tokio::spawn(async move { master.dispatch(task, node).await }));
                }
                None => {
                    // 节点列表在构造时已校验非空，这里只做兜底
                    error!("任务 {} 找不到可派发的节点", task.id);
                }
            }
        }
        Ok(handles)
    }

    #[instrument(skip(self, task, node), fields(task_id = %task.id, node = %node.name))]
    async fn dispatch(&self, task: Task, node: WorkerNode) {
        let url = format!("{}/k8s/run-worker-task", node.url);
        let task_id = task.id;
        let scraper_type = task.scraper_type;
        let request = RunWorkerTaskRequest::new(task, node.name.clone());

        let result = match self.client.post(&url).json(&request).send().await {
            Ok(response) if response.status().is_success() => Ok(()),
            Ok(response) => Err(format!("worker returned HTTP {}", response.status())),
            Err(e) => Err(format!("dispatch to {} failed: {}", node.name, e)),
        };

        match result {
            Ok(()) => debug!("任务 {} 已派发到节点 {}", task_id, node.name),
            Err(message) => {
                warn!("任务 {} 派发失败，直接按失败处理: {}", task_id, message);
                let report = TaskFailureReport {
                    task_id,
                    task_type: scraper_type,
                    task_result: Value::String(message),
                    node_name: node.name.clone(),
                };
                if let Err(e) = self.handle_failure(report).await {
                    error!("任务 {} 失败处理出错: {}", task_id, e);
                }
            }
        }
    }

    pub fn start(self: &Arc<Self>, scraper_types: &[ScraperType], shutdown_tx: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        scraper_types
            .iter()
            .map(|scraper_type| {
                let master = Arc::clone(self);
                let scraper_type = *scraper_type;
                let shutdown_rx = shutdown_tx.subscribe();
                tokio::spawn(async move { master.run_poll_loop(scraper_type, shutdown_rx).await })
            })
            .collect()
    }

    async fn run_poll_loop(self: Arc<Self>, scraper_type: ScraperType, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "{} 类型集群轮询启动，集群并发上限 {}",
            scraper_type,
            self.cluster_capacity.max(scraper_type)
        );
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(scraper_type).await {
                        warn!("{} 类型集群轮询失败: {}", scraper_type, e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("{} 类型集群轮询收到关闭信号", scraper_type);
                    break;
                }
            }
        }
    }

    async fn finalize_by_id(&self, task_id: i64, outcome: ScrapeOutcome) -> SchedulerResult<()> {
        match self.repo.get_by_id(task_id).await? {
            Some(task) => {
                self.finalizer.finalize(&task, outcome).await?;
            }
            None => debug!("任务 {} 已被删除，忽略回报", task_id),
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterCallbackHandler for MasterExecutor {
    async fn handle_success(&self, report: TaskSuccessReport) -> SchedulerResult<()> {
        if !self.release(&report.node_name, report.task_id, report.task_type) {
            return Ok(());
        }
        let records = normalize_records(report.task_result);
        self.finalize_by_id(report.task_id, ScrapeOutcome::Success(records)).await
    }

    async fn handle_failure(&self, report: TaskFailureReport) -> SchedulerResult<()> {
        if !self.release(&report.node_name, report.task_id, report.task_type) {
            return Ok(());
        }
        let trace = match report.task_result {
            Value::String(trace) => trace,
            other => other.to_string(),
        };
        self.finalize_by_id(report.task_id, ScrapeOutcome::Failure(trace)).await
    }
}
