use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use scrape_core::{
    models::{Task, TaskStatus, TaskUpdate},
    traits::TaskRepository,
    ScrapeOutcome, ScraperRegistry, SchedulerResult,
};
use scrape_infrastructure::{ResultCache, ResultStore};

use crate::aggregator::Aggregator;

/// 任务终结：单进程执行器与 Master 回调共用同一套逻辑
pub struct TaskFinalizer {
    repo: Arc<dyn TaskRepository>,
    results: Arc<ResultStore>,
    cache: Arc<ResultCache>,
    registry: ScraperRegistry,
    aggregator: Arc<Aggregator>,
}

impl TaskFinalizer {
    pub fn new(
        repo: Arc<dyn TaskRepository>,
        results: Arc<ResultStore>,
        cache: Arc<ResultCache>,
        registry: ScraperRegistry,
        aggregator: Arc<Aggregator>,
    ) -> Self {
        Self {
            repo,
            results,
            cache,
            registry,
            aggregator,
        }
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    /// 写结果、写缓存、条件终结任务行，再推进父任务聚合
    ///
    /// 返回任务行是否真的被终结。只有仍在运行的任务才会写结果；
    /// 已被中止或删除的任务丢弃本次结果，已由其他路径终结的任务保持原结果不变。
    #[instrument(skip(self, task, outcome), fields(task_id = %task.id, success = outcome.is_success()))]
    pub async fn finalize(&self, task: &Task, outcome: ScrapeOutcome) -> SchedulerResult<bool> {
        match self.repo.get_by_id(task.id).await? {
            Some(current) if current.status == TaskStatus::InProgress => {}
            Some(current) => {
                debug!("任务 {} 当前状态为 {}，丢弃本次结果", task.id, current.status);
                self.notify_parent(task, Vec::new()).await?;
                return Ok(false);
            }
            None => {
                debug!("任务 {} 已被删除，丢弃本次结果", task.id);
                self.notify_parent(task, Vec::new()).await?;
                return Ok(false);
            }
        }

        let (status, records) = match outcome {
            ScrapeOutcome::Success(records) => {
                self.results.write_records(task.id, &records).await?;
                self.store_in_cache(task, &records).await;
                (TaskStatus::Completed, records)
            }
            ScrapeOutcome::Failure(trace) => {
                self.results.write_trace(task.id, &trace).await?;
                (TaskStatus::Failed, Vec::new())
            }
        };

        let count = records.len() as i64;
        let applied = self
            .repo
            .update(task.id, &TaskUpdate::finished(status, count), Some(&[TaskStatus::InProgress]))
            .await?;

        if applied {
            info!("任务 {} 结束: {}，{} 条记录", task.id, status, count);
        } else {
            self.discard_if_abandoned(task.id).await?;
        }

        let child_records = if applied && status == TaskStatus::Completed {
            records
        } else {
            Vec::new()
        };
        self.notify_parent(task, child_records).await?;

        Ok(applied)
    }

    /// 写入结果后条件更新落空：任务在此期间被中止或删除时才删除结果文件
    async fn discard_if_abandoned(&self, task_id: i64) -> SchedulerResult<()> {
        match self.repo.get_by_id(task_id).await? {
            Some(current) if current.status != TaskStatus::Aborted => {
                warn!("任务 {} 已被其他流程终结为 {}", task_id, current.status);
            }
            _ => {
                debug!("任务 {} 已被中止或删除，丢弃本次结果", task_id);
                self.results.delete(task_id).await?;
            }
        }
        Ok(())
    }

    async fn notify_parent(&self, task: &Task, records: Vec<Value>) -> SchedulerResult<()> {
        if let Some(parent_id) = task.parent_task_id {
            self.aggregator.on_child_finished(parent_id, records).await?;
        }
        Ok(())
    }

    async fn store_in_cache(&self, task: &Task, records: &[Value]) {
        let Some(scraper) = self.registry.get(&task.scraper_name).await else {
            return;
        };
        if !scraper.cache_enabled() {
            return;
        }
        if let Err(e) = self.cache.put(&task.scraper_name, &task.data, records).await {
            warn!("写入缓存失败，任务 {}: {}", task.id, e);
        }
    }
}
