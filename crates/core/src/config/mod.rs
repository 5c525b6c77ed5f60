//! 配置模型与加载
//!
//! 加载顺序：内置默认值 → TOML 配置文件 → `SCRAPER_` 前缀的环境变量。
//! 嵌套字段用双下划线分隔，例如 `SCRAPER_EXECUTOR__RATE_LIMITS__BROWSER=2`。

pub mod models;

pub use models::*;
