use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::SchedulerError;

/// 抓取任务
///
/// 任务表中的一行。普通任务由执行器调度运行；`is_all_task` 为真的父任务
/// 只负责聚合子任务，状态由子任务推导得出，自身从不执行。
///
/// # 字段说明
///
/// - `sort_id`: 与主键无关的排序键，批量创建的兄弟任务据此稳定排序
/// - `scraper_type`: 决定任务落入哪个并发容量桶
/// - `parent_task_id`: 父任务ID，仅批量拆分出的子任务拥有
/// - `data`: 抓取器输入，原样透传
/// - `meta_data`: 旁路参数，原样透传给抓取器
/// - `result_count`: 结果记录数缓存，避免为进度查询加载完整结果
/// - `updated_at`: 同时作为轮询客户端的变更检测令牌
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub status: TaskStatus,
    pub sort_id: i64,
    pub task_name: String,
    pub scraper_name: String,
    pub scraper_type: ScraperType,
    pub is_all_task: bool,
    pub is_sync: bool,
    pub parent_task_id: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub data: serde_json::Value,
    pub meta_data: Option<serde_json::Value>,
    pub result_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 任务状态
///
/// 合法流转只有 `PENDING → IN_PROGRESS → {COMPLETED, FAILED, ABORTED}`，
/// 另外 `PENDING` 可以直接进入 `ABORTED`。命中缓存的任务创建时即为 `COMPLETED`。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "IN_PROGRESS")]
    InProgress,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "ABORTED")]
    Aborted,
}

impl TaskStatus {
    pub const UNFINISHED: [TaskStatus; 2] = [TaskStatus::Pending, TaskStatus::InProgress];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Aborted => "ABORTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Aborted
        )
    }

    /// 检查状态流转是否合法
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match (self, next) {
            (TaskStatus::Pending, TaskStatus::InProgress) => true,
            (TaskStatus::Pending, TaskStatus::Aborted) => true,
            (TaskStatus::InProgress, TaskStatus::Completed)
            | (TaskStatus::InProgress, TaskStatus::Failed)
            | (TaskStatus::InProgress, TaskStatus::Aborted) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TaskStatus::Pending),
            "IN_PROGRESS" => Ok(TaskStatus::InProgress),
            "COMPLETED" => Ok(TaskStatus::Completed),
            "FAILED" => Ok(TaskStatus::Failed),
            "ABORTED" => Ok(TaskStatus::Aborted),
            _ => Err(SchedulerError::InvalidTaskParams(format!(
                "Invalid task status: {s}"
            ))),
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for TaskStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TaskStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        s.parse::<TaskStatus>().map_err(|e| e.to_string().into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TaskStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 抓取器类型，仅用于选择并发容量桶
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ScraperType {
    Browser,
    Request,
    Task,
}

impl ScraperType {
    pub const ALL: [ScraperType; 3] = [ScraperType::Browser, ScraperType::Request, ScraperType::Task];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScraperType::Browser => "browser",
            ScraperType::Request => "request",
            ScraperType::Task => "task",
        }
    }
}

impl fmt::Display for ScraperType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScraperType {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "browser" => Ok(ScraperType::Browser),
            "request" => Ok(ScraperType::Request),
            "task" => Ok(ScraperType::Task),
            _ => Err(SchedulerError::InvalidTaskParams(format!(
                "Invalid scraper type: {s}"
            ))),
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for ScraperType {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for ScraperType {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        s.parse::<ScraperType>().map_err(|e| e.to_string().into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for ScraperType {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 条件更新的字段集合，`None` 表示保持原值
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result_count: Option<i64>,
}

impl TaskUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// 终态更新，同时写入完成时间和结果数
    pub fn finished(status: TaskStatus, result_count: i64) -> Self {
        Self {
            status: Some(status),
            finished_at: Some(Utc::now()),
            result_count: Some(result_count),
            ..Self::default()
        }
    }

    pub fn with_result_count(mut self, result_count: i64) -> Self {
        self.result_count = Some(result_count);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.started_at.is_none()
            && self.finished_at.is_none()
            && self.result_count.is_none()
    }
}

/// 任务过滤器
#[derive(Debug, Clone)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub scraper_name: Option<String>,
    pub parent_task_id: Option<i64>,
    /// 只列出顶层任务（普通任务与父任务），不包含子任务
    pub top_level_only: bool,
    pub page: i64,
    pub per_page: i64,
}

impl Default for TaskFilter {
    fn default() -> Self {
        Self {
            status: None,
            scraper_name: None,
            parent_task_id: None,
            top_level_only: false,
            page: 1,
            per_page: 100,
        }
    }
}

impl TaskFilter {
    pub fn offset(&self) -> i64 {
        (self.page.max(1) - 1) * self.per_page.max(1)
    }
}

impl Task {
    /// 创建待执行的新任务
    pub fn new(
        scraper_name: impl Into<String>,
        scraper_type: ScraperType,
        data: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        let scraper_name = scraper_name.into();
        Self {
            id: 0, // 将由数据库生成
            status: TaskStatus::Pending,
            sort_id: now.timestamp_micros(),
            task_name: scraper_name.clone(),
            scraper_name,
            scraper_type,
            is_all_task: false,
            is_sync: false,
            parent_task_id: None,
            started_at: None,
            finished_at: None,
            data,
            meta_data: None,
            result_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_task_name(mut self, task_name: impl Into<String>) -> Self {
        self.task_name = task_name.into();
        self
    }

    pub fn with_meta_data(mut self, meta_data: Option<serde_json::Value>) -> Self {
        self.meta_data = meta_data;
        self
    }

    pub fn with_sort_id(mut self, sort_id: i64) -> Self {
        self.sort_id = sort_id;
        self
    }

    pub fn with_parent(mut self, parent_task_id: i64) -> Self {
        self.parent_task_id = Some(parent_task_id);
        self
    }

    pub fn sync(mut self, is_sync: bool) -> Self {
        self.is_sync = is_sync;
        self
    }

    /// 标记为聚合父任务
    pub fn as_all_task(mut self) -> Self {
        self.is_all_task = true;
        self
    }

    /// 缓存命中的任务在创建时即为完成状态
    pub fn completed_from_cache(mut self, result_count: i64) -> Self {
        let now = Utc::now();
        self.status = TaskStatus::Completed;
        self.started_at = Some(now);
        self.finished_at = Some(now);
        self.result_count = result_count;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 自 `since` 之后是否发生过变更
    pub fn is_updated_since(&self, since: DateTime<Utc>) -> bool {
        self.updated_at > since
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_transitions() {
        use TaskStatus::*;

        assert!(Pending.can_transition_to(InProgress));
        assert!(Pending.can_transition_to(Aborted));
        assert!(InProgress.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Failed));
        assert!(InProgress.can_transition_to(Aborted));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(InProgress));
        assert!(!Aborted.can_transition_to(Completed));
        assert!(!Failed.can_transition_to(Pending));
    }

    #[test]
    fn test_status_serde_names() {
        assert_eq!(
            serde_json::to_value(TaskStatus::InProgress).unwrap(),
            json!("IN_PROGRESS")
        );
        assert_eq!("ABORTED".parse::<TaskStatus>().unwrap(), TaskStatus::Aborted);
        assert!("RUNNING".parse::<TaskStatus>().is_err());
        assert_eq!(serde_json::to_value(ScraperType::Browser).unwrap(), json!("browser"));
        assert_eq!("REQUEST".parse::<ScraperType>().unwrap(), ScraperType::Request);
    }

    #[test]
    fn test_task_builders() {
        let task = Task::new("google_maps", ScraperType::Browser, json!({"q": "pizza"}))
            .with_parent(7)
            .sync(true);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.task_name, "google_maps");
        assert_eq!(task.parent_task_id, Some(7));
        assert!(task.is_sync);
        assert!(!task.is_all_task);

        let cached = Task::new("google_maps", ScraperType::Browser, json!({})).completed_from_cache(3);
        assert_eq!(cached.status, TaskStatus::Completed);
        assert_eq!(cached.result_count, 3);
        assert!(cached.finished_at.is_some());
    }

    #[test]
    fn test_filter_offset() {
        let filter = TaskFilter {
            page: 3,
            per_page: 20,
            ..TaskFilter::default()
        };
        assert_eq!(filter.offset(), 40);
        assert_eq!(TaskFilter { page: 0, ..TaskFilter::default() }.offset(), 0);
    }
}
