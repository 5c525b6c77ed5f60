use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use scrape_core::config::models::{RateLimit, RateLimits};
use scrape_core::models::ScraperType;
use tracing::warn;

/// 按抓取器类型统计并发数
///
/// 计数器只存在于进程内存中，进程重启后从零开始。
#[derive(Debug)]
pub struct CapacityTracker {
    limits: RateLimits,
    counters: Mutex<HashMap<ScraperType, usize>>,
}

impl CapacityTracker {
    pub fn new(limits: RateLimits) -> Self {
        Self {
            limits,
            counters: Mutex::new(HashMap::new()),
        }
    }

    fn counters(&self) -> MutexGuard<'_, HashMap<ScraperType, usize>> {
        self.counters.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn current(&self, scraper_type: ScraperType) -> usize {
        self.counters().get(&scraper_type).copied().unwrap_or(0)
    }

    pub fn max(&self, scraper_type: ScraperType) -> RateLimit {
        self.limits.get(scraper_type)
    }

    /// 本轮还能接纳的任务数，`None` 表示不限
    pub fn remaining(&self, scraper_type: ScraperType) -> Option<usize> {
        let current = self.current(scraper_type);
        self.max(scraper_type)
            .as_option()
            .map(|max| max.saturating_sub(current))
    }

    pub fn increment(&self, scraper_type: ScraperType) -> usize {
        let mut counters = self.counters();
        let counter = counters.entry(scraper_type).or_insert(0);
        *counter += 1;
        *counter
    }

    pub fn decrement(&self, scraper_type: ScraperType) -> usize {
        let mut counters = self.counters();
        let counter = counters.entry(scraper_type).or_insert(0);
        if *counter == 0 {
            warn!("{} 类型的并发计数已为0，忽略多余的归还", scraper_type);
        } else {
            *counter -= 1;
        }
        *counter
    }

    /// 占用一个名额，返回的许可在释放时自动归还
    pub fn acquire(self: &Arc<Self>, scraper_type: ScraperType) -> CapacityPermit {
        self.increment(scraper_type);
        CapacityPermit {
            tracker: Arc::clone(self),
            scraper_type,
        }
    }

    pub fn snapshot(&self) -> HashMap<ScraperType, usize> {
        self.counters().clone()
    }
}

/// 运行中任务占用的并发名额
#[derive(Debug)]
pub struct CapacityPermit {
    tracker: Arc<CapacityTracker>,
    scraper_type: ScraperType,
}

impl Drop for CapacityPermit {
    fn drop(&mut self) {
        self.tracker.decrement(self.scraper_type);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(browser: RateLimit) -> RateLimits {
        RateLimits {
            browser,
            ..RateLimits::default()
        }
    }

    #[test]
    fn test_remaining_tracks_current() {
        let tracker = CapacityTracker::new(limits(RateLimit::Bounded(2)));
        assert_eq!(tracker.remaining(ScraperType::Browser), Some(2));
        tracker.increment(ScraperType::Browser);
        tracker.increment(ScraperType::Browser);
        assert_eq!(tracker.remaining(ScraperType::Browser), Some(0));
        tracker.decrement(ScraperType::Browser);
        assert_eq!(tracker.current(ScraperType::Browser), 1);
        assert_eq!(tracker.remaining(ScraperType::Request), Some(30));
    }

    #[test]
    fn test_unbounded_and_underflow() {
        let tracker = CapacityTracker::new(limits(RateLimit::Unbounded));
        assert_eq!(tracker.remaining(ScraperType::Browser), None);
        assert_eq!(tracker.decrement(ScraperType::Browser), 0);
    }

    #[test]
    fn test_permit_releases_on_drop() {
        let tracker = Arc::new(CapacityTracker::new(RateLimits::default()));
        {
            let _a = tracker.acquire(ScraperType::Request);
            let _b = tracker.acquire(ScraperType::Request);
            assert_eq!(tracker.current(ScraperType::Request), 2);
        }
        assert_eq!(tracker.current(ScraperType::Request), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_release_stays_balanced() {
        let tracker = Arc::new(CapacityTracker::new(RateLimits::default()));
        let handles: Vec<_> = (0..200)
            .map(|_| {
                let tracker = tracker.clone();
                tokio::spawn(async move {
                    let _permit = tracker.acquire(ScraperType::Task);
                    tokio::task::yield_now().await;
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(tracker.current(ScraperType::Task), 0);
    }
}
