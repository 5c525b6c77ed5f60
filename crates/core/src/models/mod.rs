//! # 数据模型
//!
//! 定义抓取任务执行引擎的核心数据结构：任务行、条件更新、过滤器，以及
//! Master 与 Worker 之间传递的集群消息。
//!
//! ## 任务状态流转
//!
//! ```text
//! PENDING → IN_PROGRESS → COMPLETED
//!    ↓           ↓      ↘ FAILED
//!  ABORTED ←─────┘
//! ```
//!
//! 命中缓存的任务跳过队列，创建时即为 `COMPLETED`。父任务（`is_all_task`）
//! 从不执行，状态由子任务推导。
//!
//! ## 数据库映射
//!
//! ### tasks 表
//! - `id` - 主键
//! - `status` - 任务状态
//! - `sort_id` - 排序键（按创建时间倒序）
//! - `parent_task_id` - 自引用外键，级联删除
//! - `result_count` - 结果记录数缓存
//! - `updated_at` - 变更检测令牌
//!
//! 结果本身不入库，见结果存储。

pub mod message;
pub mod task;

pub use message::*;
pub use task::*;
