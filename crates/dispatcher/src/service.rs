use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use scrape_core::{
    models::{Task, TaskFilter, TaskStatus, TaskUpdate},
    traits::{Scraper, TaskPage, TaskRepository},
    ScraperRegistry, SchedulerError, SchedulerResult,
};
use scrape_infrastructure::{ResultCache, ResultStore, StoredResult};

use crate::aggregator::Aggregator;

/// 创建任务请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub scraper_name: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub task_name: Option<String>,
    #[serde(default)]
    pub is_sync: bool,
}

/// 任务结果分页
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultPage {
    pub items: Vec<Value>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
    /// 失败任务的错误堆栈
    pub trace: Option<String>,
}

/// 同步等待的参数
#[derive(Debug, Clone, Copy)]
pub struct SyncWaitOptions {
    pub poll_interval: Duration,
    /// `None` 表示一直等待
    pub timeout: Option<Duration>,
}

impl Default for SyncWaitOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            timeout: None,
        }
    }
}

/// 面向调用方的任务操作：创建、查询、中止、删除
pub struct TaskService {
    repo: Arc<dyn TaskRepository>,
    results: Arc<ResultStore>,
    cache: Arc<ResultCache>,
    registry: ScraperRegistry,
    aggregator: Arc<Aggregator>,
    sync_wait: SyncWaitOptions,
}

impl TaskService {
    pub fn new(
        repo: Arc<dyn TaskRepository>,
        results: Arc<ResultStore>,
        cache: Arc<ResultCache>,
        registry: ScraperRegistry,
        aggregator: Arc<Aggregator>,
        sync_wait: SyncWaitOptions,
    ) -> Self {
        Self {
            repo,
            results,
            cache,
            registry,
            aggregator,
            sync_wait,
        }
    }

    pub fn registry(&self) -> &ScraperRegistry {
        &self.registry
    }

    async fn cached_records(&self, scraper: &dyn Scraper, data: &Value) -> Option<Vec<Value>> {
        if !scraper.cache_enabled() {
            return None;
        }
        self.cache.get(scraper.name(), data).await
    }

    /// 创建任务
    ///
    /// 抓取器提供拆分函数且拆出多个输入时，父任务与子任务在同一事务中创建；
    /// 命中缓存的任务直接以 `COMPLETED` 状态创建。返回顶层任务在前、
    /// 子任务在后的全部新建行。
    #[instrument(skip(self, request), fields(scraper_name = %request.scraper_name))]
    pub async fn create(&self, request: CreateTaskRequest) -> SchedulerResult<Vec<Task>> {
        let scraper = self.registry.require(&request.scraper_name).await?;
        let task_name = request
            .task_name
            .clone()
            .unwrap_or_else(|| request.scraper_name.clone());

        let payloads = match scraper.split_task(&request.data) {
            Some(payloads) if payloads.is_empty() => {
                return Err(SchedulerError::InvalidTaskParams(format!(
                    "抓取器 {} 拆分后没有任何子任务",
                    request.scraper_name
                )));
            }
            Some(payloads) if payloads.len() > 1 => payloads,
            Some(mut payloads) => vec![payloads.remove(0)],
            None => vec![request.data.clone()],
        };

        if payloads.len() == 1 {
            let data = payloads.into_iter().next().unwrap_or(Value::Null);
            let task = self.create_single(scraper.as_ref(), &request, task_name, data).await?;
            return Ok(vec![task]);
        }

        self.create_batch(scraper.as_ref(), &request, task_name, payloads).await
    }

    async fn create_single(
        &self,
        scraper: &dyn Scraper,
        request: &CreateTaskRequest,
        task_name: String,
        data: Value,
    ) -> SchedulerResult<Task> {
        let mut task = Task::new(scraper.name(), scraper.scraper_type(), data)
            .with_task_name(task_name)
            .with_meta_data(request.metadata.clone())
            .sync(request.is_sync);

        let cached = self.cached_records(scraper, &task.data).await;
        if let Some(records) = &cached {
            task = task.completed_from_cache(records.len() as i64);
        }

        let created = self.repo.create(&task).await?;
        if let Some(records) = cached {
            self.results.write_records(created.id, &records).await?;
            info!("任务 {} 命中缓存，直接完成", created.id);
        } else {
            info!("创建任务 {}: {}", created.id, created.task_name);
        }
        Ok(created)
    }

    async fn create_batch(
        &self,
        scraper: &dyn Scraper,
        request: &CreateTaskRequest,
        task_name: String,
        payloads: Vec<Value>,
    ) -> SchedulerResult<Vec<Task>> {
        let parent_template = Task::new(scraper.name(), scraper.scraper_type(), request.data.clone())
            .with_task_name(task_name.clone())
            .with_meta_data(request.metadata.clone())
            .sync(request.is_sync)
            .as_all_task();

        let mut children = Vec::with_capacity(payloads.len());
        let mut hits = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let mut child = Task::new(scraper.name(), scraper.scraper_type(), payload)
                .with_task_name(task_name.clone())
                .with_meta_data(request.metadata.clone())
                .sync(request.is_sync);

            let cached = self.cached_records(scraper, &child.data).await;
            if let Some(records) = &cached {
                child = child.completed_from_cache(records.len() as i64);
            }
            children.push(child);
            hits.push(cached);
        }

        let (parent, created_children) = self.repo.create_with_children(&parent_template, &children).await?;

        let mut hit_records = Vec::new();
        for (child, cached) in created_children.iter().zip(hits) {
            if let Some(records) = cached {
                self.results.write_records(child.id, &records).await?;
                hit_records.push(records);
            }
        }

        let hit_count = hit_records.len();
        if hit_count > 0 {
            let key = scraper.dedup_key();
            let mut count = 0;
            for records in hit_records {
                count = self.results.append(parent.id, records, key).await?;
            }
            self.repo
                .update(
                    parent.id,
                    &TaskUpdate::default().with_result_count(count as i64),
                    Some(&TaskStatus::UNFINISHED),
                )
                .await?;
        }

        info!(
            "创建批量任务 {}: {} 个子任务，{} 个命中缓存",
            parent.id,
            created_children.len(),
            hit_count
        );

        if hit_count == created_children.len() {
            self.aggregator.evaluate(parent.id).await?;
        }

        let parent = self.get(parent.id).await?;
        let mut created = Vec::with_capacity(created_children.len() + 1);
        created.push(parent);
        created.extend(created_children);
        Ok(created)
    }

    /// 轮询等待任务进入终态
    pub async fn wait_for_terminal(&self, id: i64) -> SchedulerResult<Task> {
        let deadline = self.sync_wait.timeout.map(|timeout| Instant::now() + timeout);

        loop {
            let task = self.get(id).await?;
            if task.is_terminal() {
                return Ok(task);
            }

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    warn!("同步任务 {} 等待超时", id);
                    return Err(SchedulerError::TaskExecution(format!("等待任务 {id} 完成超时")));
                }
            }
            tokio::time::sleep(self.sync_wait.poll_interval).await;
        }
    }

    pub async fn get(&self, id: i64) -> SchedulerResult<Task> {
        self.repo
            .get_by_id(id)
            .await?
            .ok_or(SchedulerError::TaskNotFound { id })
    }

    pub async fn list(&self, filter: &TaskFilter) -> SchedulerResult<TaskPage> {
        self.repo.list(filter).await
    }

    pub async fn children(&self, id: i64) -> SchedulerResult<Vec<Task>> {
        self.repo.get_children(id).await
    }

    /// 分页读取结果；缺失或损坏的结果文件视为无结果
    pub async fn results(&self, id: i64, page: usize, per_page: usize) -> SchedulerResult<ResultPage> {
        self.get(id).await?;
        let page = page.max(1);
        let per_page = per_page.max(1);

        if let Some(StoredResult::Trace(trace)) = self.results.read(id).await {
            return Ok(ResultPage {
                items: Vec::new(),
                total: 0,
                page,
                per_page,
                trace: Some(trace),
            });
        }

        let (items, total) = self.results.page(id, page, per_page).await;
        Ok(ResultPage {
            items,
            total,
            page,
            per_page,
            trace: None,
        })
    }

    /// 全部结果记录
    pub async fn all_results(&self, id: i64) -> Vec<Value> {
        self.results.read_records(id).await
    }

    pub async fn is_updated(&self, id: i64, since: DateTime<Utc>) -> SchedulerResult<bool> {
        Ok(self.get(id).await?.is_updated_since(since))
    }

    /// 中止任务
    ///
    /// 只改任务行，不打断正在运行的线程。中止父任务会一并中止未结束的子任务；
    /// 中止子任务后会重新检测父任务是否已可终结。
    #[instrument(skip(self), fields(task_id = %id))]
    pub async fn abort(&self, id: i64) -> SchedulerResult<bool> {
        let task = self.get(id).await?;
        let update = TaskUpdate {
            status: Some(TaskStatus::Aborted),
            finished_at: Some(Utc::now()),
            ..TaskUpdate::default()
        };

        let applied = self
            .repo
            .update(id, &update, Some(&TaskStatus::UNFINISHED))
            .await?;

        if task.is_all_task {
            let child_ids: Vec<i64> = self
                .repo
                .get_children(id)
                .await?
                .into_iter()
                .filter(|child| !child.is_terminal())
                .map(|child| child.id)
                .collect();
            let aborted = self
                .repo
                .update_many(&child_ids, &update, Some(&TaskStatus::UNFINISHED))
                .await?;
            debug!("父任务 {} 中止，连带中止 {} 个子任务", id, aborted);
        } else if let Some(parent_id) = task.parent_task_id {
            if applied {
                self.aggregator.evaluate(parent_id).await?;
            }
        }

        if applied {
            info!("任务 {} 已中止", id);
        }
        Ok(applied)
    }

    /// 批量中止，返回实际被中止的顶层请求数
    pub async fn bulk_abort(&self, ids: &[i64]) -> SchedulerResult<usize> {
        let mut aborted = 0;
        for id in ids {
            match self.abort(*id).await {
                Ok(true) => aborted += 1,
                Ok(false) | Err(SchedulerError::TaskNotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(aborted)
    }

    /// 删除任务、其子任务以及全部结果文件
    ///
    /// 删掉父任务的最后一个子任务时，父任务也随之删除。
    #[instrument(skip(self), fields(task_id = %id))]
    pub async fn delete(&self, id: i64) -> SchedulerResult<bool> {
        let parent_id = self.repo.get_by_id(id).await?.and_then(|task| task.parent_task_id);

        let deleted = self.repo.delete(id).await?;
        if deleted.is_empty() {
            return Ok(false);
        }
        self.results.delete_many(&deleted).await?;
        info!("删除任务 {}，共 {} 行", id, deleted.len());

        if let Some(parent_id) = parent_id.filter(|parent_id| !deleted.contains(parent_id)) {
            self.aggregator.evaluate(parent_id).await?;
        }
        Ok(true)
    }

    pub async fn bulk_delete(&self, ids: &[i64]) -> SchedulerResult<usize> {
        let mut deleted = 0;
        for id in ids {
            if self.delete(*id).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}
