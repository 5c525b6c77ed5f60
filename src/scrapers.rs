//! 内置抓取器
//!
//! 业务抓取器由嵌入方自行注册；这里只带两个通用的：
//! `echo` 原样返回输入，`http_fetch` 抓取一组 URL 的响应体。

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use scrape_core::models::ScraperType;
use scrape_core::traits::{FnScraper, Scraper, ScraperError};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

pub fn builtin_scrapers() -> Vec<Arc<dyn Scraper>> {
    vec![echo_scraper(), http_fetch_scraper()]
}

/// 把 `data` 作为唯一一条记录返回，用于联调和健康检查
pub fn echo_scraper() -> Arc<dyn Scraper> {
    Arc::new(FnScraper::new("echo", ScraperType::Task, |data, metadata, _| {
        Ok(json!([{ "data": data, "metadata": metadata }]))
    }))
}

/// 输入 `{"urls": [...]}` 时按 URL 拆分为子任务，每个子任务输入为 `{"url": ...}`
pub fn http_fetch_scraper() -> Arc<dyn Scraper> {
    Arc::new(
        FnScraper::new("http_fetch", ScraperType::Request, |data, _, _| fetch(data))
            .with_split(split_urls)
            .with_dedup_key("url")
            .with_cache(true),
    )
}

fn split_urls(data: &Value) -> Vec<Value> {
    match data["urls"].as_array() {
        Some(urls) => urls.iter().map(|url| json!({ "url": url })).collect(),
        None => vec![data.clone()],
    }
}

fn fetch(data: &Value) -> Result<Value, ScraperError> {
    let url = data["url"]
        .as_str()
        .ok_or_else(|| ScraperError::new("http_fetch 需要字符串字段 url"))?
        .to_string();

    // 运行在阻塞线程上，借用所在运行时执行异步请求
    let handle = tokio::runtime::Handle::try_current()
        .map_err(|e| ScraperError::new(format!("没有可用的运行时: {e}")))?;

    handle.block_on(async move {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| ScraperError::new(format!("创建HTTP客户端失败: {e}")))?;

        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| ScraperError::new(format!("请求 {url} 失败: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScraperError::new(format!("请求 {url} 返回 {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ScraperError::new(format!("读取 {url} 响应失败: {e}")))?;

        Ok(json!([{ "url": url, "status": status.as_u16(), "body": body }]))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrape_core::traits::RunOptions;

    #[test]
    fn test_split_urls() {
        let parts = split_urls(&json!({"urls": ["https://a", "https://b"]}));
        assert_eq!(parts, vec![json!({"url": "https://a"}), json!({"url": "https://b"})]);

        let single = json!({"url": "https://a"});
        assert_eq!(split_urls(&single), vec![single.clone()]);
    }

    #[test]
    fn test_echo_wraps_input() {
        let out = echo_scraper()
            .run(&json!({"k": 1}), None, &RunOptions::executor_managed())
            .unwrap();
        assert_eq!(out, json!([{"data": {"k": 1}, "metadata": null}]));
    }

    #[test]
    fn test_fetch_requires_url() {
        let err = fetch(&json!({})).unwrap_err();
        assert!(err.message.contains("url"));
    }
}
