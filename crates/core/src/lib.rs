pub mod config;
pub mod errors;
pub mod invoke;
pub mod logging;
pub mod models;
pub mod records;
pub mod retry;
pub mod scraper_registry;
pub mod traits;

pub use config::AppConfig;
pub use errors::*;
pub use invoke::{invoke_scraper, ScrapeOutcome};
pub use logging::{init_logging, LogFormat};
pub use models::{ScraperType, Task, TaskFilter, TaskStatus, TaskUpdate};
pub use retry::{retry_with_backoff, BackoffPolicy};
pub use scraper_registry::ScraperRegistry;

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
