use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scrape_core::{
    models::{ScraperType, Task, TaskFilter, TaskStatus, TaskUpdate},
    retry::{retry_with_backoff, BackoffPolicy},
    traits::{TaskPage, TaskRepository},
    SchedulerError, SchedulerResult,
};
use tracing::error;

/// 瞬时错误重试装饰器
///
/// 对连接池超时、SQLite 忙/锁等错误按固定间隔重试。重试耗尽时，
/// `fatal_on_exhaustion` 打开则直接终止进程，交给外部守护进程重启。
pub struct RetryingTaskRepository {
    inner: Arc<dyn TaskRepository>,
    policy: BackoffPolicy,
    fatal_on_exhaustion: bool,
}

impl RetryingTaskRepository {
    pub fn new(inner: Arc<dyn TaskRepository>, policy: BackoffPolicy, fatal_on_exhaustion: bool) -> Self {
        Self {
            inner,
            policy,
            fatal_on_exhaustion,
        }
    }

    async fn run<T, F, Fut>(&self, operation: &str, f: F) -> SchedulerResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SchedulerResult<T>>,
    {
        let result = retry_with_backoff(&self.policy, operation, SchedulerError::is_transient, f).await;

        if let Err(e) = &result {
            if self.fatal_on_exhaustion && e.is_transient() {
                error!("存储操作 {} 重试耗尽，进程退出: {}", operation, e);
                std::process::exit(1);
            }
        }
        result
    }
}

#[async_trait]
impl TaskRepository for RetryingTaskRepository {
    async fn create(&self, task: &Task) -> SchedulerResult<Task> {
        let inner = &*self.inner;
        self.run("create", move || inner.create(task)).await
    }

    async fn create_with_children(&self, parent: &Task, children: &[Task]) -> SchedulerResult<(Task, Vec<Task>)> {
        let inner = &*self.inner;
        self.run("create_with_children", move || inner.create_with_children(parent, children))
            .await
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Task>> {
        let inner = &*self.inner;
        self.run("get_by_id", move || inner.get_by_id(id)).await
    }

    async fn update(
        &self,
        id: i64,
        update: &TaskUpdate,
        in_status: Option<&[TaskStatus]>,
    ) -> SchedulerResult<bool> {
        let inner = &*self.inner;
        self.run("update", move || inner.update(id, update, in_status)).await
    }

    async fn update_many(
        &self,
        ids: &[i64],
        update: &TaskUpdate,
        in_status: Option<&[TaskStatus]>,
    ) -> SchedulerResult<u64> {
        let inner = &*self.inner;
        self.run("update_many", move || inner.update_many(ids, update, in_status)).await
    }

    async fn list(&self, filter: &TaskFilter) -> SchedulerResult<TaskPage> {
        let inner = &*self.inner;
        self.run("list", move || inner.list(filter)).await
    }

    async fn claim_pending(
        &self,
        scraper_type: ScraperType,
        limit: Option<usize>,
    ) -> SchedulerResult<Vec<Task>> {
        let inner = &*self.inner;
        self.run("claim_pending", move || inner.claim_pending(scraper_type, limit)).await
    }

    async fn mark_parent_started(&self, parent_id: i64, at: DateTime<Utc>) -> SchedulerResult<bool> {
        let inner = &*self.inner;
        self.run("mark_parent_started", move || inner.mark_parent_started(parent_id, at)).await
    }

    async fn get_children(&self, parent_id: i64) -> SchedulerResult<Vec<Task>> {
        let inner = &*self.inner;
        self.run("get_children", move || inner.get_children(parent_id)).await
    }

    async fn delete(&self, id: i64) -> SchedulerResult<Vec<i64>> {
        let inner = &*self.inner;
        self.run("delete", move || inner.delete(id)).await
    }

    async fn reset_in_progress(&self) -> SchedulerResult<u64> {
        let inner = &*self.inner;
        self.run("reset_in_progress", move || inner.reset_in_progress()).await
    }

    async fn find_unfinished_sync(&self) -> SchedulerResult<Vec<i64>> {
        let inner = &*self.inner;
        self.run("find_unfinished_sync", move || inner.find_unfinished_sync()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// 前 `failures` 次查询返回连接池超时
    struct FlakyRepository {
        calls: AtomicU32,
        failures: u32,
    }

    #[async_trait]
    impl TaskRepository for FlakyRepository {
        async fn create(&self, task: &Task) -> SchedulerResult<Task> {
            Ok(task.clone())
        }
        async fn create_with_children(&self, parent: &Task, children: &[Task]) -> SchedulerResult<(Task, Vec<Task>)> {
            Ok((parent.clone(), children.to_vec()))
        }
        async fn get_by_id(&self, _id: i64) -> SchedulerResult<Option<Task>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(SchedulerError::Database(sqlx::Error::PoolTimedOut))
            } else {
                Ok(None)
            }
        }
        async fn update(&self, _: i64, _: &TaskUpdate, _: Option<&[TaskStatus]>) -> SchedulerResult<bool> {
            Err(SchedulerError::Internal("bad update".to_string()))
        }
        async fn update_many(&self, _: &[i64], _: &TaskUpdate, _: Option<&[TaskStatus]>) -> SchedulerResult<u64> {
            Ok(0)
        }
        async fn list(&self, _: &TaskFilter) -> SchedulerResult<TaskPage> {
            Ok(TaskPage::default())
        }
        async fn claim_pending(&self, _: ScraperType, _: Option<usize>) -> SchedulerResult<Vec<Task>> {
            Ok(Vec::new())
        }
        async fn mark_parent_started(&self, _: i64, _: DateTime<Utc>) -> SchedulerResult<bool> {
            Ok(false)
        }
        async fn get_children(&self, _: i64) -> SchedulerResult<Vec<Task>> {
            Ok(Vec::new())
        }
        async fn delete(&self, _: i64) -> SchedulerResult<Vec<i64>> {
            Ok(Vec::new())
        }
        async fn reset_in_progress(&self) -> SchedulerResult<u64> {
            Ok(0)
        }
        async fn find_unfinished_sync(&self) -> SchedulerResult<Vec<i64>> {
            Ok(Vec::new())
        }
    }

    fn wrap(failures: u32) -> (Arc<FlakyRepository>, RetryingTaskRepository) {
        let flaky = Arc::new(FlakyRepository {
            calls: AtomicU32::new(0),
            failures,
        });
        let repo = RetryingTaskRepository::new(
            flaky.clone(),
            BackoffPolicy::fixed(3, Duration::from_millis(1)),
            false,
        );
        (flaky, repo)
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let (flaky, repo) = wrap(2);
        assert!(repo.get_by_id(1).await.unwrap().is_none());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_error_when_not_fatal() {
        let (flaky, repo) = wrap(10);
        assert!(repo.get_by_id(1).await.is_err());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let (_, repo) = wrap(0);
        let err = repo
            .update(1, &TaskUpdate::status(TaskStatus::Aborted), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Internal(_)));
    }
}
