use std::path::PathBuf;

use scrape_core::records::canonical_json;
use scrape_core::SchedulerResult;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::write_atomic;

/// 内容寻址的结果缓存
///
/// 键为 `sha256(scraper_name + canonical_json(input))`，与任务生命周期无关。
#[derive(Debug, Clone)]
pub struct ResultCache {
    dir: PathBuf,
}

impl ResultCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn key(scraper_name: &str, input: &Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(scraper_name.as_bytes());
        hasher.update(canonical_json(input).as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// 读取缓存，缺失或损坏都视为未命中
    pub async fn get(&self, scraper_name: &str, input: &Value) -> Option<Vec<Value>> {
        let path = self.path_for(&Self::key(scraper_name, input));
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(_) => return None,
        };

        match serde_json::from_slice::<Vec<Value>>(&bytes) {
            Ok(records) => {
                debug!("缓存命中: {} {}", scraper_name, path.display());
                Some(records)
            }
            Err(e) => {
                warn!("缓存文件损坏，忽略: {}: {}", path.display(), e);
                None
            }
        }
    }

    pub async fn put(&self, scraper_name: &str, input: &Value, records: &[Value]) -> SchedulerResult<()> {
        let path = self.path_for(&Self::key(scraper_name, input));
        let bytes = serde_json::to_vec(records)?;
        write_atomic(&path, &bytes).await
    }
}
