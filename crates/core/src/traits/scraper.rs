//! 抓取器接口定义
//!
//! 抓取器本身（浏览器自动化、HTTP客户端封装等）是外部协作者，这里只约定
//! 引擎调用它的方式：`run(data, metadata) -> records | error`。
//!
//! 执行器自己负责缓存、并发和交互提示，因此每次调用都会通过
//! [`RunOptions::executor_managed`] 关闭抓取器自带的同类功能。
//!
//! ## 使用示例
//!
//! ```rust
//! use scrape_core::traits::{FnScraper, Scraper};
//! use scrape_core::models::ScraperType;
//! use serde_json::json;
//!
//! let scraper = FnScraper::new("product_links", ScraperType::Request, |data, _meta, _opts| {
//!     Ok(json!([{"url": data["url"]}]))
//! })
//! .with_dedup_key("url")
//! .with_cache(true);
//!
//! assert_eq!(scraper.name(), "product_links");
//! ```

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::models::ScraperType;

/// 传给抓取器的运行选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub cache: bool,
    pub parallel: Option<usize>,
    pub interactive: bool,
}

impl RunOptions {
    /// 由执行器接管缓存、并发和交互时使用的选项
    pub fn executor_managed() -> Self {
        Self {
            cache: false,
            parallel: None,
            interactive: false,
        }
    }
}

/// 抓取器抛出的错误，`trace` 会作为失败任务的结果保存
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScraperError {
    pub message: String,
    pub trace: Option<String>,
}

impl ScraperError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }

    /// 失败任务结果中保存的文本
    pub fn to_trace_string(&self) -> String {
        match &self.trace {
            Some(trace) => format!("{}\n{}", self.message, trace),
            None => self.message.clone(),
        }
    }
}

impl fmt::Display for ScraperError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ScraperError {}

impl From<String> for ScraperError {
    fn from(message: String) -> Self {
        ScraperError::new(message)
    }
}

impl From<&str> for ScraperError {
    fn from(message: &str) -> Self {
        ScraperError::new(message)
    }
}

/// 抓取器
///
/// `run` 是同步调用，执行器会把它放到独立的阻塞线程上运行。
pub trait Scraper: Send + Sync {
    fn name(&self) -> &str;

    fn scraper_type(&self) -> ScraperType {
        ScraperType::Request
    }

    fn run(
        &self,
        data: &Value,
        metadata: Option<&Value>,
        options: &RunOptions,
    ) -> Result<Value, ScraperError>;

    /// 把一次请求拆分为多个子任务输入，返回 `None` 表示不拆分
    fn split_task(&self, _data: &Value) -> Option<Vec<Value>> {
        None
    }

    /// 结果去重键
    fn dedup_key(&self) -> Option<&str> {
        None
    }

    fn cache_enabled(&self) -> bool {
        false
    }
}

type RunFn = dyn Fn(&Value, Option<&Value>, &RunOptions) -> Result<Value, ScraperError> + Send + Sync;
type SplitFn = dyn Fn(&Value) -> Vec<Value> + Send + Sync;

/// 基于闭包的抓取器
pub struct FnScraper {
    name: String,
    scraper_type: ScraperType,
    run: Arc<RunFn>,
    split: Option<Arc<SplitFn>>,
    dedup_key: Option<String>,
    cache: bool,
}

impl FnScraper {
    pub fn new<F>(name: impl Into<String>, scraper_type: ScraperType, run: F) -> Self
    where
        F: Fn(&Value, Option<&Value>, &RunOptions) -> Result<Value, ScraperError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            scraper_type,
            run: Arc::new(run),
            split: None,
            dedup_key: None,
            cache: false,
        }
    }

    pub fn with_split<F>(mut self, split: F) -> Self
    where
        F: Fn(&Value) -> Vec<Value> + Send + Sync + 'static,
    {
        self.split = Some(Arc::new(split));
        self
    }

    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache = enabled;
        self
    }
}

impl Scraper for FnScraper {
    fn name(&self) -> &str {
        &self.name
    }

    fn scraper_type(&self) -> ScraperType {
        self.scraper_type
    }

    fn run(
        &self,
        data: &Value,
        metadata: Option<&Value>,
        options: &RunOptions,
    ) -> Result<Value, ScraperError> {
        (self.run)(data, metadata, options)
    }

    fn split_task(&self, data: &Value) -> Option<Vec<Value>> {
        self.split.as_ref().map(|split| split(data))
    }

    fn dedup_key(&self) -> Option<&str> {
        self.dedup_key.as_deref()
    }

    fn cache_enabled(&self) -> bool {
        self.cache
    }
}
