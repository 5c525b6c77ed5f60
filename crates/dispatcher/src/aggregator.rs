use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument};

use scrape_core::{
    models::{Task, TaskStatus, TaskUpdate},
    records::append_records,
    traits::TaskRepository,
    ScraperRegistry, SchedulerResult,
};
use scrape_infrastructure::ResultStore;

/// 父任务聚合
///
/// 每个结束的子任务都会独立触发一次完成检测，没有单一协调者。
/// 最终合并只依赖子任务的持久化结果，重复执行得到相同的结果，
/// 父任务行的终态写入是带状态守卫的条件更新，多余的尝试自然落空。
pub struct Aggregator {
    repo: Arc<dyn TaskRepository>,
    results: Arc<ResultStore>,
    registry: ScraperRegistry,
    /// 按父任务串行化追加与最终合并，不同父任务互不阻塞
    locks: StdMutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl Aggregator {
    pub fn new(repo: Arc<dyn TaskRepository>, results: Arc<ResultStore>, registry: ScraperRegistry) -> Self {
        Self {
            repo,
            results,
            registry,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    async fn lock_parent(&self, parent_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(locks.entry(parent_id).or_default())
        };
        lock.lock_owned().await
    }

    /// 父任务已终结或被删除后，后续调用都是空操作，锁可以丢弃
    fn forget_parent(&self, parent_id: i64) {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.remove(&parent_id);
    }

    pub fn tracked_parents(&self) -> usize {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    async fn dedup_key(&self, parent: &Task) -> Option<String> {
        self.registry
            .get(&parent.scraper_name)
            .await
            .and_then(|scraper| scraper.dedup_key().map(str::to_string))
    }

    /// 子任务结束：追加结果到父任务，然后做完成检测
    ///
    /// 失败或被中止的子任务传入空记录。
    #[instrument(skip(self, records), fields(parent_id = %parent_id, records = records.len()))]
    pub async fn on_child_finished(&self, parent_id: i64, records: Vec<Value>) -> SchedulerResult<Option<TaskStatus>> {
        let _guard = self.lock_parent(parent_id).await;

        let Some(parent) = self.repo.get_by_id(parent_id).await? else {
            debug!("父任务 {} 已被删除，跳过聚合", parent_id);
            self.forget_parent(parent_id);
            return Ok(None);
        };

        if !parent.is_terminal() && !records.is_empty() {
            let key = self.dedup_key(&parent).await;
            let count = self.results.append(parent_id, records, key.as_deref()).await?;
            self.repo
                .update(
                    parent_id,
                    &TaskUpdate::default().with_result_count(count as i64),
                    Some(&TaskStatus::UNFINISHED),
                )
                .await?;
        }

        self.evaluate_locked(parent).await
    }

    /// 完成检测，返回本次写入的父任务终态
    pub async fn evaluate(&self, parent_id: i64) -> SchedulerResult<Option<TaskStatus>> {
        let _guard = self.lock_parent(parent_id).await;

        match self.repo.get_by_id(parent_id).await? {
            Some(parent) => self.evaluate_locked(parent).await,
            None => {
                self.forget_parent(parent_id);
                Ok(None)
            }
        }
    }

    async fn evaluate_locked(&self, parent: Task) -> SchedulerResult<Option<TaskStatus>> {
        if parent.is_terminal() {
            self.forget_parent(parent.id);
            return Ok(None);
        }

        let children = self.repo.get_children(parent.id).await?;
        if children.is_empty() || children.iter().any(|child| !child.is_terminal()) {
            return Ok(None);
        }

        let status = if children.iter().any(|child| child.status == TaskStatus::Failed) {
            TaskStatus::Failed
        } else {
            TaskStatus::Completed
        };

        // 子任务按创建顺序返回
        let key = self.dedup_key(&parent).await;
        let mut merged = Vec::new();
        for child in children.iter().filter(|child| child.status == TaskStatus::Completed) {
            let records = self.results.read_records(child.id).await;
            merged = append_records(merged, records, key.as_deref());
        }
        self.results.replace(parent.id, &merged).await?;

        let now = Utc::now();
        let update = TaskUpdate {
            status: Some(status),
            started_at: Some(parent.started_at.unwrap_or(now)),
            finished_at: Some(now),
            result_count: Some(merged.len() as i64),
        };
        let applied = self
            .repo
            .update(parent.id, &update, Some(&TaskStatus::UNFINISHED))
            .await?;

        self.forget_parent(parent.id);
        if applied {
            info!(
                "父任务 {} 聚合完成: {}，共 {} 条记录（{} 个子任务）",
                parent.id,
                status,
                merged.len(),
                children.len()
            );
            Ok(Some(status))
        } else {
            debug!("父任务 {} 已被其他流程终结", parent.id);
            Ok(None)
        }
    }
}
