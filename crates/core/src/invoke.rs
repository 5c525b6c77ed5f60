use std::any::Any;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::records::{dedup_records, normalize_records};
use crate::traits::{RunOptions, Scraper};

/// 一次抓取调用的结果
#[derive(Debug, Clone, PartialEq)]
pub enum ScrapeOutcome {
    /// 归一化、去重后的记录
    Success(Vec<Value>),
    /// 错误堆栈文本
    Failure(String),
}

impl ScrapeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ScrapeOutcome::Success(_))
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("scraper panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("scraper panicked: {s}")
    } else {
        "scraper panicked".to_string()
    }
}

/// 在独立阻塞线程上调用抓取器
///
/// 抓取器的错误与 panic 都在此处被捕获并转为 [`ScrapeOutcome::Failure`]，
/// 不会向调用方传播。
pub async fn invoke_scraper(
    scraper: Arc<dyn Scraper>,
    data: Value,
    metadata: Option<Value>,
) -> ScrapeOutcome {
    let name = scraper.name().to_string();
    let dedup_key = scraper.dedup_key().map(str::to_string);

    let joined = tokio::task::spawn_blocking(move || {
        let options = RunOptions::executor_managed();
        scraper.run(&data, metadata.as_ref(), &options)
    })
    .await;

    match joined {
        Ok(Ok(value)) => {
            let mut records = normalize_records(value);
            if let Some(key) = dedup_key.as_deref() {
                records = dedup_records(records, key);
            }
            debug!("抓取器 {} 返回 {} 条记录", name, records.len());
            ScrapeOutcome::Success(records)
        }
        Ok(Err(e)) => {
            warn!("抓取器 {} 执行失败: {}", name, e);
            ScrapeOutcome::Failure(e.to_trace_string())
        }
        Err(join_error) => {
            let message = if join_error.is_panic() {
                panic_message(join_error.into_panic())
            } else {
                format!("scraper thread cancelled: {join_error}")
            };
            warn!("抓取器 {} 异常终止: {}", name, message);
            ScrapeOutcome::Failure(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScraperType;
    use crate::traits::{FnScraper, ScraperError};
    use serde_json::json;

    #[tokio::test]
    async fn test_success_is_normalized_and_deduped() {
        let scraper = Arc::new(
            FnScraper::new("links", ScraperType::Request, |data, _, _| {
                Ok(json!([{"u": data["a"]}, {"u": data["a"]}, {"u": 2}]))
            })
            .with_dedup_key("u"),
        );
        let outcome = invoke_scraper(scraper, json!({"a": 1}), None).await;
        assert_eq!(outcome, ScrapeOutcome::Success(vec![json!({"u": 1}), json!({"u": 2})]));
    }

    #[tokio::test]
    async fn test_error_and_panic_become_failures() {
        let failing = Arc::new(FnScraper::new("fail", ScraperType::Request, |_, _, _| {
            Err(ScraperError::new("blocked").with_trace("line 1"))
        }));
        assert_eq!(
            invoke_scraper(failing, json!(null), None).await,
            ScrapeOutcome::Failure("blocked\nline 1".to_string())
        );

        let panicking = Arc::new(FnScraper::new("panic", ScraperType::Request, |_, _, _| {
            panic!("selector not found")
        }));
        match invoke_scraper(panicking, json!(null), None).await {
            ScrapeOutcome::Failure(trace) => assert!(trace.contains("selector not found")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_metadata_is_passed_through() {
        let scraper = Arc::new(FnScraper::new("meta", ScraperType::Task, |_, meta, opts| {
            assert!(!opts.interactive);
            Ok(meta.cloned().unwrap_or(Value::Null))
        }));
        let outcome = invoke_scraper(scraper, json!({}), Some(json!({"cookie": "x"}))).await;
        assert_eq!(outcome, ScrapeOutcome::Success(vec![json!({"cookie": "x"})]));
    }
}
