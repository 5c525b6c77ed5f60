use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use crate::{SchedulerError, SchedulerResult};

/// 退避策略配置
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// 最大尝试次数（含首次）
    pub max_attempts: u32,
    /// 基础重试间隔
    pub base_delay: Duration,
    /// 指数退避倍数，1.0 即固定间隔
    pub multiplier: f64,
    /// 最大重试间隔
    pub max_delay: Duration,
    /// 随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

impl BackoffPolicy {
    /// 固定间隔重试
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            multiplier: 1.0,
            max_delay: delay,
            jitter_factor: 0.0,
        }
    }

    /// Worker 回报 Master 的默认策略：6次，1秒起步，翻倍，封顶60秒，带抖动
    pub fn callback_default() -> Self {
        Self {
            max_attempts: 6,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.1,
        }
    }

    /// 第 `attempt` 次失败后的等待时间（从1开始计数）
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let raw = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = raw.min(self.max_delay.as_secs_f64());

        let jittered = if self.jitter_factor > 0.0 {
            let spread = capped * self.jitter_factor;
            capped + rand::rng().random_range(-spread..=spread)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered.clamp(0.0, self.max_delay.as_secs_f64()))
    }
}

/// 按策略重试异步操作
///
/// `should_retry` 返回 false 的错误立即返回，不消耗重试次数。
pub async fn retry_with_backoff<T, F, Fut, P>(
    policy: &BackoffPolicy,
    operation: &str,
    should_retry: P,
    mut f: F,
) -> SchedulerResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SchedulerResult<T>>,
    P: Fn(&SchedulerError) -> bool,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if should_retry(&e) && attempt < policy.max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    "{} 第 {}/{} 次尝试失败: {}，{:?} 后重试",
                    operation, attempt, policy.max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if should_retry(&e) {
                    error!("{} 重试 {} 次后仍然失败: {}", operation, attempt, e);
                }
                return Err(e);
            }
        }
    }
}
