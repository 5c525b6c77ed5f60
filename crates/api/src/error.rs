use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use scrape_core::SchedulerError;
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("调度器错误: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("未找到资源: {0}")]
    NotFound(String),

    #[error("内部服务器错误: {0}")]
    Internal(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::Scheduler(SchedulerError::TaskNotFound { id }) => (
                StatusCode::NOT_FOUND,
                "TASK_NOT_FOUND",
                format!("任务 ID {id} 不存在"),
            ),
            ApiError::Scheduler(SchedulerError::ScraperNotFound { name }) => (
                StatusCode::NOT_FOUND,
                "SCRAPER_NOT_FOUND",
                format!("抓取器 {name} 未注册"),
            ),
            ApiError::Scheduler(SchedulerError::InvalidTaskParams(msg)) => (
                StatusCode::BAD_REQUEST,
                "INVALID_TASK_PARAMS",
                format!("任务参数无效: {msg}"),
            ),
            ApiError::Scheduler(SchedulerError::ClusterNotReady(msg)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "CLUSTER_NOT_READY",
                msg.clone(),
            ),
            ApiError::Scheduler(e) => (StatusCode::INTERNAL_SERVER_ERROR, "SCHEDULER_ERROR", e.to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg.clone()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            error!("API请求处理失败: {}", self);
        }

        let body = Json(json!({
            "success": false,
            "error": {
                "code": code,
                "message": message,
            },
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ApiError::from(SchedulerError::TaskNotFound { id: 3 }), StatusCode::NOT_FOUND),
            (
                ApiError::from(SchedulerError::ScraperNotFound { name: "x".to_string() }),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::from(SchedulerError::InvalidTaskParams("bad".to_string())),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::from(SchedulerError::Internal("boom".to_string())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (ApiError::BadRequest("since".to_string()), StatusCode::BAD_REQUEST),
        ];

        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }
}
