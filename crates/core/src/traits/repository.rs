//! 任务仓储接口定义
//!
//! 任务表是整个引擎唯一的事实来源。轮询器、回调处理和用户的中止/删除操作
//! 都会并发修改同一行，因此所有变更都通过带状态守卫的条件更新完成：
//!
//! - 条件未命中不是错误，而是以 `false` / 受影响行数 `0` 的形式返回
//! - 只有真正的存储故障才返回 `SchedulerError`
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! use scrape_core::models::{TaskStatus, TaskUpdate};
//!
//! // 只有仍在运行的任务才会被标记为完成；已中止的任务保持不变
//! let applied = repo
//!     .update(task.id, &TaskUpdate::finished(TaskStatus::Completed, 3), Some(&[TaskStatus::InProgress]))
//!     .await?;
//! if !applied {
//!     // 任务已被中止或删除，丢弃本次结果
//! }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{ScraperType, Task, TaskFilter, TaskStatus, TaskUpdate};
use crate::SchedulerResult;

/// 分页查询结果
#[derive(Debug, Clone, Default)]
pub struct TaskPage {
    pub items: Vec<Task>,
    pub total: i64,
}

/// 任务仓储接口
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 创建新任务，返回带数据库生成ID的任务
    async fn create(&self, task: &Task) -> SchedulerResult<Task>;

    /// 在同一事务中创建父任务及其子任务
    ///
    /// 子任务的 `parent_task_id` 指向新建的父任务，`sort_id` 与父任务相同，
    /// 兄弟之间按主键区分先后。
    async fn create_with_children(&self, parent: &Task, children: &[Task]) -> SchedulerResult<(Task, Vec<Task>)>;

    /// 根据ID获取任务
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Task>>;

    /// 条件更新
    ///
    /// `in_status` 为 `Some` 时，只有当前状态属于该集合才会生效。
    /// 返回是否有行被更新。
    async fn update(
        &self,
        id: i64,
        update: &TaskUpdate,
        in_status: Option<&[TaskStatus]>,
    ) -> SchedulerResult<bool>;

    /// 批量条件更新，返回受影响行数
    async fn update_many(
        &self,
        ids: &[i64],
        update: &TaskUpdate,
        in_status: Option<&[TaskStatus]>,
    ) -> SchedulerResult<u64>;

    /// 按 `(sort_id 倒序, id 正序)` 分页查询
    async fn list(&self, filter: &TaskFilter) -> SchedulerResult<TaskPage>;

    /// 原子认领待执行任务
    ///
    /// 一条条件批量更新把最多 `limit` 个 `PENDING` 任务改为 `IN_PROGRESS`，
    /// 同步任务优先，其次 sort_id 倒序、id 正序。`limit` 为 `None` 表示不限量。
    async fn claim_pending(
        &self,
        scraper_type: ScraperType,
        limit: Option<usize>,
    ) -> SchedulerResult<Vec<Task>>;

    /// 父任务尚未开始时，将其标记为 `IN_PROGRESS` 并写入开始时间
    async fn mark_parent_started(&self, parent_id: i64, at: DateTime<Utc>) -> SchedulerResult<bool>;

    /// 获取父任务的全部子任务，按创建顺序
    async fn get_children(&self, parent_id: i64) -> SchedulerResult<Vec<Task>>;

    /// 删除任务及其子任务，返回被删除的全部ID
    ///
    /// 删掉的是父任务的最后一个子任务时，父任务一并删除。
    async fn delete(&self, id: i64) -> SchedulerResult<Vec<i64>>;

    /// 启动对账：把 `IN_PROGRESS` 的普通任务重置为 `PENDING`
    async fn reset_in_progress(&self) -> SchedulerResult<u64>;

    /// 启动对账：查找未完成的顶层同步任务
    async fn find_unfinished_sync(&self) -> SchedulerResult<Vec<i64>>;
}
