use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use scrape_core::traits::{ClusterCallbackHandler, WorkerTaskReceiver};
use scrape_dispatcher::TaskService;

use crate::error::{ApiError, ApiResult};
use crate::handlers::{
    cluster::{run_worker_task, task_fail, task_success},
    health::health_check,
    tasks::{
        abort_task, bulk_abort_tasks, bulk_delete_tasks, create_task, delete_task, get_task,
        get_task_children, get_task_results, is_task_updated, list_tasks,
    },
};
use crate::middleware::timeout_layer;

/// API应用状态
///
/// 各角色只挂载自己需要的那部分：单进程与 Master 提供任务接口，
/// Master 额外接收回报，Worker 只接收派发。
#[derive(Clone)]
pub struct AppState {
    pub mode: &'static str,
    pub node_name: String,
    pub task_service: Option<Arc<TaskService>>,
    pub callbacks: Option<Arc<dyn ClusterCallbackHandler>>,
    pub worker: Option<Arc<dyn WorkerTaskReceiver>>,
}

impl AppState {
    pub fn tasks(&self) -> ApiResult<&Arc<TaskService>> {
        self.task_service
            .as_ref()
            .ok_or_else(|| ApiError::NotFound(format!("{} 模式不提供任务接口", self.mode)))
    }

    pub fn callbacks(&self) -> ApiResult<&Arc<dyn ClusterCallbackHandler>> {
        self.callbacks
            .as_ref()
            .ok_or_else(|| ApiError::NotFound(format!("{} 模式不接收任务回报", self.mode)))
    }

    pub fn worker(&self) -> ApiResult<&Arc<dyn WorkerTaskReceiver>> {
        self.worker
            .as_ref()
            .ok_or_else(|| ApiError::NotFound(format!("{} 模式不接收任务派发", self.mode)))
    }
}

/// 创建API路由
pub fn create_routes(state: AppState, request_timeout_seconds: u64) -> Router {
    let mut timed = Router::new().route("/health", get(health_check));
    let mut untimed = Router::new();

    if state.task_service.is_some() {
        // 同步创建会一直等到任务结束，不设超时
        untimed = untimed.route("/api/tasks", get(list_tasks).post(create_task));
        timed = timed
            .route("/api/tasks/bulk-abort", post(bulk_abort_tasks))
            .route("/api/tasks/bulk-delete", post(bulk_delete_tasks))
            .route("/api/tasks/{id}", get(get_task).delete(delete_task))
            .route("/api/tasks/{id}/children", get(get_task_children))
            .route("/api/tasks/{id}/results", get(get_task_results))
            .route("/api/tasks/{id}/is-updated", get(is_task_updated))
            .route("/api/tasks/{id}/abort", post(abort_task));
    }

    if state.callbacks.is_some() {
        timed = timed
            .route("/k8s/success", post(task_success))
            .route("/k8s/fail", post(task_fail));
    }

    if state.worker.is_some() {
        timed = timed.route("/k8s/run-worker-task", post(run_worker_task));
    }

    if request_timeout_seconds > 0 {
        timed = timed.layer(timeout_layer(request_timeout_seconds));
    }

    timed.merge(untimed).with_state(state)
}
