use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use scrape_core::models::{Task, TaskFilter, TaskStatus};
use scrape_dispatcher::CreateTaskRequest;

use crate::{
    error::{ApiError, ApiResult},
    response::{created, success, PaginatedResponse},
    routes::AppState,
};

/// 任务查询参数
#[derive(Debug, Deserialize)]
pub struct TaskQueryParams {
    pub status: Option<String>,
    pub scraper_name: Option<String>,
    /// 指定后只列出该父任务的子任务
    pub parent_task_id: Option<i64>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ResultQueryParams {
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct IsUpdatedParams {
    pub since: String,
}

#[derive(Debug, Deserialize)]
pub struct BulkTaskRequest {
    pub task_ids: Vec<i64>,
}

/// 同步创建的返回：全部任务的最终状态与顶层任务的结果
#[derive(Debug, Serialize)]
pub struct SyncCreateResponse {
    pub tasks: Vec<Task>,
    pub results: Vec<Value>,
    pub trace: Option<String>,
}

/// 创建任务
///
/// `is_sync` 为真时阻塞到顶层任务（父任务意味着全部子任务）进入终态。
pub async fn create_task(
    State(state): State<AppState>,
    Json(request): Json<CreateTaskRequest>,
) -> ApiResult<axum::response::Response> {
    let service = state.tasks()?;
    let is_sync = request.is_sync;
    let created_tasks = service.create(request).await?;

    let Some(top) = created_tasks.first() else {
        return Err(ApiError::Internal("创建任务没有返回任何行".to_string()));
    };

    if !is_sync {
        return Ok(created(created_tasks).into_response());
    }

    let top_id = top.id;
    service.wait_for_terminal(top_id).await?;

    let mut tasks = Vec::with_capacity(created_tasks.len());
    for task in &created_tasks {
        tasks.push(service.get(task.id).await?);
    }
    let trace = service.results(top_id, 1, 1).await?.trace;
    let results = service.all_results(top_id).await;
    info!("同步任务 {} 已结束，返回 {} 条结果", top_id, results.len());

    Ok(success(SyncCreateResponse { tasks, results, trace }).into_response())
}

/// 获取任务列表，按 sort_id 倒序
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<TaskQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let service = state.tasks()?;
    let status = params
        .status
        .as_deref()
        .map(str::parse::<TaskStatus>)
        .transpose()?;

    let filter = TaskFilter {
        status,
        scraper_name: params.scraper_name,
        parent_task_id: params.parent_task_id,
        top_level_only: params.parent_task_id.is_none(),
        page: params.page.unwrap_or(1).max(1),
        per_page: params.per_page.unwrap_or(100).clamp(1, 1000),
    };

    let page = service.list(&filter).await?;
    Ok(success(PaginatedResponse::new(
        page.items,
        page.total,
        filter.page,
        filter.per_page,
    )))
}

pub async fn get_task(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    let task = state.tasks()?.get(id).await?;
    Ok(success(task))
}

pub async fn get_task_children(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let service = state.tasks()?;
    service.get(id).await?;
    Ok(success(service.children(id).await?))
}

/// 分页读取任务结果；失败任务返回错误堆栈
pub async fn get_task_results(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<ResultQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let page = state
        .tasks()?
        .results(id, params.page.unwrap_or(1), params.per_page.unwrap_or(100))
        .await?;
    Ok(success(page))
}

pub async fn is_task_updated(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<IsUpdatedParams>,
) -> ApiResult<impl IntoResponse> {
    let since = DateTime::parse_from_rfc3339(&params.since)
        .map_err(|e| ApiError::BadRequest(format!("since 不是合法的 RFC3339 时间: {e}")))?
        .with_timezone(&Utc);

    let updated = state.tasks()?.is_updated(id, since).await?;
    Ok(success(json!({ "updated": updated })))
}

pub async fn abort_task(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    let aborted = state.tasks()?.abort(id).await?;
    Ok(success(json!({ "task_id": id, "aborted": aborted })))
}

pub async fn delete_task(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    if !state.tasks()?.delete(id).await? {
        return Err(ApiError::Scheduler(scrape_core::SchedulerError::TaskNotFound { id }));
    }
    Ok(success(json!({ "task_id": id, "deleted": true })))
}

pub async fn bulk_abort_tasks(
    State(state): State<AppState>,
    Json(request): Json<BulkTaskRequest>,
) -> ApiResult<impl IntoResponse> {
    let aborted = state.tasks()?.bulk_abort(&request.task_ids).await?;
    Ok(success(json!({ "requested": request.task_ids.len(), "aborted": aborted })))
}

pub async fn bulk_delete_tasks(
    State(state): State<AppState>,
    Json(request): Json<BulkTaskRequest>,
) -> ApiResult<impl IntoResponse> {
    let deleted = state.tasks()?.bulk_delete(&request.task_ids).await?;
    Ok(success(json!({ "requested": request.task_ids.len(), "deleted": deleted })))
}
