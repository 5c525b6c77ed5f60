use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

use scrape_core::models::{RunWorkerTaskRequest, TaskFailureReport, TaskSuccessReport};

use crate::{error::ApiResult, response::success, routes::AppState};

/// Worker 端：接收任务后立即确认，执行在后台进行
pub async fn run_worker_task(
    State(state): State<AppState>,
    Json(request): Json<RunWorkerTaskRequest>,
) -> ApiResult<impl IntoResponse> {
    let task_id = request.task.id;
    state.worker()?.accept(request).await?;
    Ok(success(json!({ "task_id": task_id, "accepted": true })))
}

/// Master 端：归还容量并终结任务后才返回
pub async fn task_success(
    State(state): State<AppState>,
    Json(report): Json<TaskSuccessReport>,
) -> ApiResult<impl IntoResponse> {
    let task_id = report.task_id;
    state.callbacks()?.handle_success(report).await?;
    Ok(success(json!({ "task_id": task_id })))
}

pub async fn task_fail(
    State(state): State<AppState>,
    Json(report): Json<TaskFailureReport>,
) -> ApiResult<impl IntoResponse> {
    let task_id = report.task_id;
    state.callbacks()?.handle_failure(report).await?;
    Ok(success(json!({ "task_id": task_id })))
}
