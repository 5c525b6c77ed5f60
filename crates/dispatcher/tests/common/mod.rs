#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use scrape_core::{
    config::models::RateLimits,
    models::{ScraperType, Task, TaskFilter},
    traits::{Scraper, TaskRepository},
    ScraperRegistry,
};
use scrape_dispatcher::{
    Aggregator, CapacityTracker, SyncWaitOptions, TaskExecutor, TaskFinalizer, TaskService,
};
use scrape_infrastructure::{DatabaseManager, ResultCache, ResultStore, SqliteTaskRepository};
use tempfile::TempDir;

pub struct Harness {
    pub dir: TempDir,
    pub repo: Arc<dyn TaskRepository>,
    pub results: Arc<ResultStore>,
    pub cache: Arc<ResultCache>,
    pub registry: ScraperRegistry,
    pub aggregator: Arc<Aggregator>,
    pub finalizer: Arc<TaskFinalizer>,
    pub service: Arc<TaskService>,
}

impl Harness {
    pub async fn new(scrapers: Vec<Arc<dyn Scraper>>) -> Self {
        let dir = TempDir::new().unwrap();
        let manager = DatabaseManager::in_memory().await.unwrap();
        let repo: Arc<dyn TaskRepository> = Arc::new(SqliteTaskRepository::new(manager.pool().clone()));
        let results = Arc::new(ResultStore::new(dir.path().join("tasks")));
        let cache = Arc::new(ResultCache::new(dir.path().join("cache")));

        let registry = ScraperRegistry::new();
        registry.register_batch(scrapers).await;

        let aggregator = Arc::new(Aggregator::new(repo.clone(), results.clone(), registry.clone()));
        let finalizer = Arc::new(TaskFinalizer::new(
            repo.clone(),
            results.clone(),
            cache.clone(),
            registry.clone(),
            aggregator.clone(),
        ));
        let service = Arc::new(TaskService::new(
            repo.clone(),
            results.clone(),
            cache.clone(),
            registry.clone(),
            aggregator.clone(),
            SyncWaitOptions {
                poll_interval: Duration::from_millis(10),
                timeout: Some(Duration::from_secs(10)),
            },
        ));

        Self {
            dir,
            repo,
            results,
            cache,
            registry,
            aggregator,
            finalizer,
            service,
        }
    }

    pub fn executor(&self, limits: RateLimits) -> Arc<TaskExecutor> {
        Arc::new(TaskExecutor::new(
            self.repo.clone(),
            self.registry.clone(),
            Arc::new(CapacityTracker::new(limits)),
            self.finalizer.clone(),
            Duration::from_millis(10),
        ))
    }

    pub async fn task(&self, id: i64) -> Task {
        self.repo.get_by_id(id).await.unwrap().unwrap()
    }

    pub async fn all_tasks(&self) -> Vec<Task> {
        self.repo
            .list(&TaskFilter {
                per_page: 1000,
                ..TaskFilter::default()
            })
            .await
            .unwrap()
            .items
    }

    /// 反复准入直到没有未结束的任务
    pub async fn drain(&self, executor: &TaskExecutor, scraper_type: ScraperType) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            for handle in executor.tick(scraper_type).await.unwrap() {
                handle.await.unwrap();
            }
            let unfinished = self
                .all_tasks()
                .await
                .iter()
                .filter(|t| !t.is_all_task && !t.is_terminal())
                .count();
            if unfinished == 0 {
                return;
            }
            assert!(tokio::time::Instant::now() < deadline, "tasks did not drain");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
