//! # Scrape API
//!
//! 基于 Axum 的 HTTP 接口，三种运行模式共用同一套路由，按角色挂载：
//!
//! ### 任务管理（单进程 / Master）
//! - `POST /api/tasks` - 创建任务，`is_sync` 为真时等待结束并返回结果
//! - `GET /api/tasks` - 分页列出顶层任务，`parent_task_id` 指定时列出子任务
//! - `GET /api/tasks/{id}` / `DELETE /api/tasks/{id}`
//! - `GET /api/tasks/{id}/children`
//! - `GET /api/tasks/{id}/results?page=&per_page=`
//! - `GET /api/tasks/{id}/is-updated?since=<rfc3339>`
//! - `POST /api/tasks/{id}/abort`
//! - `POST /api/tasks/bulk-abort` / `POST /api/tasks/bulk-delete` - `{"task_ids": [...]}`
//!
//! ### 集群
//! - `POST /k8s/run-worker-task` - Worker 接收派发
//! - `POST /k8s/success` / `POST /k8s/fail` - Master 接收回报
//!
//! ### 其他
//! - `GET /health` - 就绪探测
//!
//! 成功响应统一为 `{"success": true, "data": ..., "timestamp": ...}`，
//! 错误响应为 `{"success": false, "error": {"code", "message"}, "timestamp"}`。

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use axum::Router;
use tower::ServiceBuilder;

use middleware::{cors_layer, request_logging, trace_layer};
use scrape_core::config::models::ApiConfig;

pub use routes::{create_routes, AppState};

/// 创建完整的API应用
pub fn create_app(state: AppState, api_config: &ApiConfig) -> Router {
    let app = create_routes(state, api_config.request_timeout_seconds).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(axum::middleware::from_fn(request_logging)),
    );

    if api_config.cors_enabled {
        app.layer(cors_layer())
    } else {
        app
    }
}
