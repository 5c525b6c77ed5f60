use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::models::ScraperType;

/// 单个抓取器类型的并发上限
///
/// 配置中写整数或字符串 `"unbounded"`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimit {
    Bounded(usize),
    Unbounded,
}

impl RateLimit {
    /// 多副本集群的总上限
    pub fn scaled(&self, replicas: usize) -> RateLimit {
        match self {
            RateLimit::Bounded(n) => RateLimit::Bounded(n * replicas),
            RateLimit::Unbounded => RateLimit::Unbounded,
        }
    }

    pub fn as_option(&self) -> Option<usize> {
        match self {
            RateLimit::Bounded(n) => Some(*n),
            RateLimit::Unbounded => None,
        }
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimit::Bounded(n) => write!(f, "{n}"),
            RateLimit::Unbounded => f.write_str("unbounded"),
        }
    }
}

impl Serialize for RateLimit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RateLimit::Bounded(n) => serializer.serialize_u64(*n as u64),
            RateLimit::Unbounded => serializer.serialize_str("unbounded"),
        }
    }
}

struct RateLimitVisitor;

impl<'de> Visitor<'de> for RateLimitVisitor {
    type Value = RateLimit;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a non-negative integer or \"unbounded\"")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<RateLimit, E> {
        Ok(RateLimit::Bounded(v as usize))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<RateLimit, E> {
        if v < 0 {
            return Err(E::custom(format!("rate limit must not be negative: {v}")));
        }
        Ok(RateLimit::Bounded(v as usize))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<RateLimit, E> {
        if v.eq_ignore_ascii_case("unbounded") {
            return Ok(RateLimit::Unbounded);
        }
        v.parse::<usize>()
            .map(RateLimit::Bounded)
            .map_err(|_| E::custom(format!("invalid rate limit: {v}")))
    }
}

impl<'de> Deserialize<'de> for RateLimit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(RateLimitVisitor)
    }
}

/// 各抓取器类型的并发上限
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimits {
    pub browser: RateLimit,
    pub request: RateLimit,
    pub task: RateLimit,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            browser: RateLimit::Bounded(1),
            request: RateLimit::Bounded(30),
            task: RateLimit::Bounded(30),
        }
    }
}

impl RateLimits {
    pub fn get(&self, scraper_type: ScraperType) -> RateLimit {
        match scraper_type {
            ScraperType::Browser => self.browser,
            ScraperType::Request => self.request,
            ScraperType::Task => self.task,
        }
    }

    pub fn scaled(&self, replicas: usize) -> RateLimits {
        RateLimits {
            browser: self.browser.scaled(replicas),
            request: self.request.scaled(replicas),
            task: self.task.scaled(replicas),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// 每个抓取器类型的轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 同步请求等待完成时的轮询间隔（毫秒）
    pub sync_poll_interval_ms: u64,
    /// 同步请求的最长等待时间，0 表示一直等待
    pub sync_wait_timeout_seconds: u64,
    pub rate_limits: RateLimits,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            sync_poll_interval_ms: 100,
            sync_wait_timeout_seconds: 0,
            rate_limits: RateLimits::default(),
        }
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("轮询间隔必须大于0"));
        }

        if self.sync_poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("同步等待轮询间隔必须大于0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Wrapper {
        rate_limits: RateLimits,
    }

    #[test]
    fn test_rate_limits_from_toml() {
        let parsed: Wrapper = toml::from_str(
            r#"
            [rate_limits]
            browser = 2
            request = "unbounded"
            "#,
        )
        .unwrap();

        assert_eq!(parsed.rate_limits.browser, RateLimit::Bounded(2));
        assert_eq!(parsed.rate_limits.request, RateLimit::Unbounded);
        assert_eq!(parsed.rate_limits.task, RateLimit::Bounded(30));
    }

    #[test]
    fn test_rate_limit_scaling() {
        let limits = RateLimits::default().scaled(3);
        assert_eq!(limits.get(ScraperType::Browser), RateLimit::Bounded(3));
        assert_eq!(limits.get(ScraperType::Request), RateLimit::Bounded(90));
        assert_eq!(RateLimit::Unbounded.scaled(4), RateLimit::Unbounded);
    }

    #[test]
    fn test_rate_limit_rejects_garbage() {
        assert!(serde_json::from_str::<RateLimit>("\"lots\"").is_err());
        assert!(serde_json::from_str::<RateLimit>("-1").is_err());
        assert_eq!(serde_json::from_str::<RateLimit>("\"5\"").unwrap(), RateLimit::Bounded(5));
    }
}
