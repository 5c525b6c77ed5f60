use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, Instrument};

use scrape_core::{
    invoke_scraper,
    models::{RunWorkerTaskRequest, TaskFailureReport, TaskSuccessReport},
    traits::WorkerTaskReceiver,
    ScrapeOutcome, ScraperRegistry, SchedulerResult,
};

use crate::master_client::MasterClient;

/// 集群节点上的执行器
///
/// 不访问任务表：收到任务后在本地运行抓取器，把结果原样回报给 Master，
/// 由 Master 负责写结果与终结任务行。
pub struct WorkerExecutor {
    node_name: String,
    registry: ScraperRegistry,
    master: Arc<MasterClient>,
    running: Arc<AtomicUsize>,
}

impl WorkerExecutor {
    pub fn new(node_name: impl Into<String>, registry: ScraperRegistry, master: Arc<MasterClient>) -> Self {
        Self {
            node_name: node_name.into(),
            registry,
            master,
            running: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// 正在执行或回报中的任务数
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// 在后台执行任务并回报
    pub fn spawn(&self, request: RunWorkerTaskRequest) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let master = Arc::clone(&self.master);
        let running = Arc::clone(&self.running);
        // 以 Master 分配的节点名回报，确保归还的是同一个节点的容量
        let node_name = if request.node_name.is_empty() {
            self.node_name.clone()
        } else {
            request.node_name
        };
        let task = request.task;
        let span = info_span!("worker_task", task_id = task.id, scraper = %task.scraper_name);

        running.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(
            async move {
                let outcome = match registry.get(&task.scraper_name).await {
                    Some(scraper) => invoke_scraper(scraper, task.data.clone(), task.meta_data.clone()).await,
                    None => ScrapeOutcome::Failure(format!("scraper not registered: {}", task.scraper_name)),
                };

                let reported = match outcome {
                    ScrapeOutcome::Success(records) => {
                        info!("任务 {} 执行成功，{} 条记录", task.id, records.len());
                        let report = TaskSuccessReport {
                            task_id: task.id,
                            task_type: task.scraper_type,
                            task_result: Value::Array(records),
                            scraper_name: task.scraper_name.clone(),
                            data: task.data.clone(),
                            node_name,
                        };
                        master.report_success(&report).await
                    }
                    ScrapeOutcome::Failure(trace) => {
                        info!("任务 {} 执行失败", task.id);
                        let report = TaskFailureReport {
                            task_id: task.id,
                            task_type: task.scraper_type,
                            task_result: Value::String(trace),
                            node_name,
                        };
                        master.report_failure(&report).await
                    }
                };

                if let Err(e) = reported {
                    error!("任务 {} 的结果未能送达 Master: {}", task.id, e);
                }
                running.fetch_sub(1, Ordering::SeqCst);
            }
            .instrument(span),
        )
    }
}

#[async_trait]
impl WorkerTaskReceiver for WorkerExecutor {
    async fn accept(&self, request: RunWorkerTaskRequest) -> SchedulerResult<()> {
        info!(
            "节点 {} 接收任务 {} ({})",
            self.node_name, request.task.id, request.task.scraper_name
        );
        self.spawn(request);
        Ok(())
    }
}
