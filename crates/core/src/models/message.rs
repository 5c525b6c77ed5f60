use serde::{Deserialize, Serialize};

use super::{ScraperType, Task};

/// Master → Worker：把任务交给指定节点执行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunWorkerTaskRequest {
    pub task: Task,
    pub node_name: String,
}

/// Worker → Master：任务执行成功回报
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSuccessReport {
    pub task_id: i64,
    pub task_type: ScraperType,
    pub task_result: serde_json::Value,
    pub scraper_name: String,
    pub data: serde_json::Value,
    pub node_name: String,
}

/// Worker → Master：任务执行失败回报，`task_result` 为错误堆栈字符串
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFailureReport {
    pub task_id: i64,
    pub task_type: ScraperType,
    pub task_result: serde_json::Value,
    pub node_name: String,
}

impl RunWorkerTaskRequest {
    pub fn new(task: Task, node_name: impl Into<String>) -> Self {
        Self {
            task,
            node_name: node_name.into(),
        }
    }
}
