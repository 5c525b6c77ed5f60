use std::sync::Arc;

use tracing::info;

use scrape_core::{traits::TaskRepository, SchedulerResult};
use scrape_infrastructure::ResultStore;

/// 启动对账结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveryReport {
    /// 被删除的同步任务行（含子任务）
    pub deleted_sync_tasks: Vec<i64>,
    /// 重置回 `PENDING` 的任务数
    pub reset_tasks: u64,
}

/// 进程启动时修复上次崩溃留下的状态
///
/// 同步任务的调用方已经不在了，未完成的直接删除；其余运行中的任务重新排队。
pub struct StartupRecovery {
    repo: Arc<dyn TaskRepository>,
    results: Arc<ResultStore>,
}

impl StartupRecovery {
    pub fn new(repo: Arc<dyn TaskRepository>, results: Arc<ResultStore>) -> Self {
        Self { repo, results }
    }

    pub async fn recover(&self) -> SchedulerResult<RecoveryReport> {
        let mut report = RecoveryReport::default();

        for id in self.repo.find_unfinished_sync().await? {
            let deleted = self.repo.delete(id).await?;
            self.results.delete_many(&deleted).await?;
            report.deleted_sync_tasks.extend(deleted);
        }

        report.reset_tasks = self.repo.reset_in_progress().await?;

        info!(
            "启动对账完成: 删除 {} 个未完成的同步任务行，重置 {} 个运行中任务",
            report.deleted_sync_tasks.len(),
            report.reset_tasks
        );
        Ok(report)
    }
}
