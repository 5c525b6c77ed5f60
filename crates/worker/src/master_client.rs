use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info};

use scrape_core::{
    models::{TaskFailureReport, TaskSuccessReport},
    retry_with_backoff, BackoffPolicy, SchedulerError, SchedulerResult,
};

/// Worker 到 Master 的回报客户端
///
/// 回报必须最终送达，否则 Master 上的容量计数会永久泄漏；
/// 网络错误与 5xx 按退避策略重试，4xx 视为请求本身有误，不再重试。
pub struct MasterClient {
    master_url: String,
    http_client: reqwest::Client,
    policy: BackoffPolicy,
}

impl MasterClient {
    pub fn new(master_url: &str, timeout: Duration, policy: BackoffPolicy) -> SchedulerResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SchedulerError::Network(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self {
            master_url: master_url.trim_end_matches('/').to_string(),
            http_client,
            policy,
        })
    }

    pub fn master_url(&self) -> &str {
        &self.master_url
    }

    pub async fn report_success(&self, report: &TaskSuccessReport) -> SchedulerResult<()> {
        self.post_with_retry("/k8s/success", report.task_id, report).await
    }

    pub async fn report_failure(&self, report: &TaskFailureReport) -> SchedulerResult<()> {
        self.post_with_retry("/k8s/fail", report.task_id, report).await
    }

    async fn post_with_retry<T: Serialize>(&self, path: &str, task_id: i64, body: &T) -> SchedulerResult<()> {
        let url = format!("{}{}", self.master_url, path);
        let operation = format!("回报任务 {task_id} 到 {path}");

        let result = retry_with_backoff(
            &self.policy,
            &operation,
            |e| matches!(e, SchedulerError::Network(_)),
            || self.post_once(&url, body),
        )
        .await;

        match &result {
            Ok(()) => info!("任务 {} 已回报 Master: {}", task_id, path),
            Err(e) => error!("任务 {} 回报 Master 彻底失败，Master 容量计数将无法归还: {}", task_id, e),
        }
        result
    }

    async fn post_once<T: Serialize>(&self, url: &str, body: &T) -> SchedulerResult<()> {
        let response = self
            .http_client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| SchedulerError::Network(format!("连接Master失败: {e}")))?;

        let status = response.status();
        if status.is_success() {
            debug!("POST {} -> {}", url, status);
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            Err(SchedulerError::Network(format!("Master 返回 HTTP {status} - {body}")))
        } else {
            Err(SchedulerError::Internal(format!("Master 拒绝回报: HTTP {status} - {body}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrape_core::models::ScraperType;
    use serde_json::json;

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let client = MasterClient::new(
            "http://master:8000/",
            Duration::from_secs(1),
            BackoffPolicy::callback_default(),
        )
        .unwrap();
        assert_eq!(client.master_url(), "http://master:8000");
    }

    #[tokio::test]
    async fn test_unreachable_master_exhausts_retries() {
        let client = MasterClient::new(
            "http://127.0.0.1:9",
            Duration::from_millis(200),
            BackoffPolicy::fixed(2, Duration::from_millis(1)),
        )
        .unwrap();

        let report = TaskFailureReport {
            task_id: 1,
            task_type: ScraperType::Task,
            task_result: json!("boom"),
            node_name: "w1".to_string(),
        };
        let err = client.report_failure(&report).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Network(_)));
    }
}
