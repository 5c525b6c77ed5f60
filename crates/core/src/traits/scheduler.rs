use async_trait::async_trait;

use crate::models::{RunWorkerTaskRequest, TaskFailureReport, TaskSuccessReport};
use crate::SchedulerResult;

/// Master 端：处理 Worker 回报的执行结果
///
/// 回报到达时同步完成容量归还与任务终结后才返回。
#[async_trait]
pub trait ClusterCallbackHandler: Send + Sync {
    async fn handle_success(&self, report: TaskSuccessReport) -> SchedulerResult<()>;

    async fn handle_failure(&self, report: TaskFailureReport) -> SchedulerResult<()>;
}

/// Worker 端：接收 Master 派发的任务
///
/// 立即返回，任务在后台执行。
#[async_trait]
pub trait WorkerTaskReceiver: Send + Sync {
    async fn accept(&self, request: RunWorkerTaskRequest) -> SchedulerResult<()>;
}
