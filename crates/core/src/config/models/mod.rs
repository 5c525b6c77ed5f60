pub mod api;
pub mod app_config;
pub mod cluster;
pub mod database;
pub mod executor;

pub use api::{ApiConfig, StorageConfig};
pub use app_config::AppConfig;
pub use cluster::{CallbackRetryConfig, ClusterConfig, NodeConfig};
pub use database::DatabaseConfig;
pub use executor::{ExecutorConfig, RateLimit, RateLimits};
