//! 抓取任务执行引擎的进程装配：按运行角色组装存储、执行器与 HTTP 服务。

pub mod app;
pub mod scrapers;
pub mod shutdown;

pub use app::{Application, RunMode, Scheduler};
pub use shutdown::ShutdownManager;
