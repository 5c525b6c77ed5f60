use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::{models::ScraperType, traits::Scraper, SchedulerError, SchedulerResult};

/// 按名称注册的抓取器表
#[derive(Clone, Default)]
pub struct ScraperRegistry {
    scrapers: Arc<RwLock<HashMap<String, Arc<dyn Scraper>>>>,
}

impl ScraperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, scraper: Arc<dyn Scraper>) {
        let mut registry = self.scrapers.write().await;
        registry.insert(scraper.name().to_string(), scraper);
    }

    pub async fn register_batch(&self, scrapers: Vec<Arc<dyn Scraper>>) {
        let mut registry = self.scrapers.write().await;
        for scraper in scrapers {
            registry.insert(scraper.name().to_string(), scraper);
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Scraper>> {
        let registry = self.scrapers.read().await;
        registry.get(name).cloned()
    }

    /// 获取抓取器，未注册时返回错误
    pub async fn require(&self, name: &str) -> SchedulerResult<Arc<dyn Scraper>> {
        self.get(name)
            .await
            .ok_or_else(|| SchedulerError::ScraperNotFound {
                name: name.to_string(),
            })
    }

    pub async fn list_scrapers(&self) -> Vec<String> {
        let registry = self.scrapers.read().await;
        let mut names: Vec<String> = registry.keys().cloned().collect();
        names.sort();
        names
    }

    /// 已注册抓取器涉及的全部类型，每个类型对应一个轮询循环
    pub async fn scraper_types(&self) -> Vec<ScraperType> {
        let registry = self.scrapers.read().await;
        let mut types: Vec<ScraperType> = registry.values().map(|s| s.scraper_type()).collect();
        types.sort();
        types.dedup();
        types
    }

    pub async fn contains(&self, name: &str) -> bool {
        let registry = self.scrapers.read().await;
        registry.contains_key(name)
    }

    pub async fn count(&self) -> usize {
        let registry = self.scrapers.read().await;
        registry.len()
    }
}
