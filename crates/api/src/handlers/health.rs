use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::routes::AppState;

/// 就绪探测：Master 启动时轮询各 Worker 的此端点
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "mode": state.mode,
        "node_name": state.node_name,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": "scrape-scheduler",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
