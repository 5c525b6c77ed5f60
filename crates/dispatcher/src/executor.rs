use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, info_span, warn, Instrument};

use scrape_core::{
    invoke_scraper,
    models::{ScraperType, Task},
    traits::TaskRepository,
    ScrapeOutcome, ScraperRegistry, SchedulerResult,
};

use crate::capacity::{CapacityPermit, CapacityTracker};
use crate::completion::TaskFinalizer;

/// 认领后把子任务的父任务标记为开始
pub(crate) async fn mark_parents_started(repo: &dyn TaskRepository, claimed: &[Task]) -> SchedulerResult<()> {
    let parents: HashSet<i64> = claimed.iter().filter_map(|task| task.parent_task_id).collect();
    let now = Utc::now();
    for parent_id in parents {
        if repo.mark_parent_started(parent_id, now).await? {
            debug!("父任务 {} 开始执行", parent_id);
        }
    }
    Ok(())
}

/// 单进程执行器：轮询、准入、在本地线程上运行
pub struct TaskExecutor {
    repo: Arc<dyn TaskRepository>,
    registry: ScraperRegistry,
    capacity: Arc<CapacityTracker>,
    finalizer: Arc<TaskFinalizer>,
    poll_interval: Duration,
}

impl TaskExecutor {
    pub fn new(
        repo: Arc<dyn TaskRepository>,
        registry: ScraperRegistry,
        capacity: Arc<CapacityTracker>,
        finalizer: Arc<TaskFinalizer>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            repo,
            registry,
            capacity,
            finalizer,
            poll_interval,
        }
    }

    pub fn capacity(&self) -> &Arc<CapacityTracker> {
        &self.capacity
    }

    /// 一次准入：按剩余容量认领任务并逐个启动
    pub async fn tick(&self, scraper_type: ScraperType) -> SchedulerResult<Vec<JoinHandle<()>>> {
        let remaining = self.capacity.remaining(scraper_type);
        if remaining == Some(0) {
            return Ok(Vec::new());
        }

        let claimed = self.repo.claim_pending(scraper_type, remaining).await?;
        if claimed.is_empty() {
            return Ok(Vec::new());
        }
        mark_parents_started(self.repo.as_ref(), &claimed).await?;

        debug!("{} 类型本轮启动 {} 个任务", scraper_type, claimed.len());
        let handles = claimed
            .into_iter()
            .map(|task| {
                let permit = self.capacity.acquire(scraper_type);
                self.spawn_task(task, permit)
            })
            .collect();
        Ok(handles)
    }

    fn spawn_task(&self, task: Task, permit: CapacityPermit) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let finalizer = Arc::clone(&self.finalizer);
        let span = info_span!("run_task", task_id = task.id, scraper = %task.scraper_name);

        tokio::spawn(
            async move {
                let _permit = permit;
                let outcome = match registry.get(&task.scraper_name).await {
                    Some(scraper) => invoke_scraper(scraper, task.data.clone(), task.meta_data.clone()).await,
                    None => ScrapeOutcome::Failure(format!("scraper not registered: {}", task.scraper_name)),
                };

                if let Err(e) = finalizer.finalize(&task, outcome).await {
                    error!("任务 {} 终结失败: {}", task.id, e);
                }
            }
            .instrument(span),
        )
    }

    /// 为每个抓取器类型启动一个轮询循环
    pub fn start(self: &Arc<Self>, scraper_types: &[ScraperType], shutdown_tx: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        scraper_types
            .iter()
            .map(|scraper_type| {
                let executor = Arc::clone(self);
                let scraper_type = *scraper_type;
                let shutdown_rx = shutdown_tx.subscribe();
                tokio::spawn(async move { executor.run_poll_loop(scraper_type, shutdown_rx).await })
            })
            .collect()
    }

    async fn run_poll_loop(&self, scraper_type: ScraperType, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "{} 类型轮询启动，并发上限 {}，间隔 {:?}",
            scraper_type,
            self.capacity.max(scraper_type),
            self.poll_interval
        );
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(scraper_type).await {
                        warn!("{} 类型轮询失败: {}", scraper_type, e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("{} 类型轮询收到关闭信号", scraper_type);
                    break;
                }
            }
        }
    }
}
