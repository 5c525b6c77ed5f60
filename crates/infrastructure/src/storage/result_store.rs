use std::io::ErrorKind;
use std::path::PathBuf;

use scrape_core::records::append_records;
use scrape_core::SchedulerResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::write_atomic;

/// 持久化的任务结果：成功为记录列表，失败为错误堆栈
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredResult {
    Records(Vec<Value>),
    Trace(String),
}

/// 按任务ID存放结果文件，`<dir>/<task_id>.json`
pub struct ResultStore {
    dir: PathBuf,
    /// 父任务结果的读-改-写都在此锁内完成
    append_lock: Mutex<()>,
}

impl ResultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            append_lock: Mutex::new(()),
        }
    }

    fn path_for(&self, task_id: i64) -> PathBuf {
        self.dir.join(format!("{task_id}.json"))
    }

    pub async fn write_records(&self, task_id: i64, records: &[Value]) -> SchedulerResult<()> {
        let bytes = serde_json::to_vec(records)?;
        write_atomic(&self.path_for(task_id), &bytes).await
    }

    pub async fn write_trace(&self, task_id: i64, trace: &str) -> SchedulerResult<()> {
        let bytes = serde_json::to_vec(trace)?;
        write_atomic(&self.path_for(task_id), &bytes).await
    }

    /// 读取结果，文件缺失或损坏时返回 `None`
    pub async fn read(&self, task_id: i64) -> Option<StoredResult> {
        let path = self.path_for(task_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("读取结果文件失败 {}: {}", path.display(), e);
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(result) => Some(result),
            Err(e) => {
                warn!("结果文件损坏，按无结果处理 {}: {}", path.display(), e);
                None
            }
        }
    }

    /// 只取记录列表，失败堆栈、缺失或损坏都得到空列表
    pub async fn read_records(&self, task_id: i64) -> Vec<Value> {
        match self.read(task_id).await {
            Some(StoredResult::Records(records)) => records,
            _ => Vec::new(),
        }
    }

    /// 追加记录到父任务结果，返回追加后的记录数
    pub async fn append(
        &self,
        task_id: i64,
        incoming: Vec<Value>,
        dedup_key: Option<&str>,
    ) -> SchedulerResult<usize> {
        let _guard = self.append_lock.lock().await;

        let existing = self.read_records(task_id).await;
        let merged = append_records(existing, incoming, dedup_key);
        self.write_records(task_id, &merged).await?;

        debug!("任务 {} 结果追加后共 {} 条", task_id, merged.len());
        Ok(merged.len())
    }

    /// 在追加锁内整体覆盖，用于父任务最终合并
    pub async fn replace(&self, task_id: i64, records: &[Value]) -> SchedulerResult<()> {
        let _guard = self.append_lock.lock().await;
        self.write_records(task_id, records).await
    }

    /// 分页读取记录，返回当前页和总数
    pub async fn page(&self, task_id: i64, page: usize, per_page: usize) -> (Vec<Value>, usize) {
        let records = self.read_records(task_id).await;
        let total = records.len();
        let per_page = per_page.max(1);
        let start = page.saturating_sub(1).saturating_mul(per_page);

        let items = records.into_iter().skip(start).take(per_page).collect();
        (items, total)
    }

    pub async fn exists(&self, task_id: i64) -> bool {
        tokio::fs::try_exists(self.path_for(task_id)).await.unwrap_or(false)
    }

    pub async fn delete(&self, task_id: i64) -> SchedulerResult<()> {
        match tokio::fs::remove_file(self.path_for(task_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete_many(&self, task_ids: &[i64]) -> SchedulerResult<()> {
        for task_id in task_ids {
            self.delete(*task_id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_records_and_trace_are_distinguished() {
        let dir = TempDir::new().unwrap();
        let store = ResultStore::new(dir.path());

        store.write_records(1, &[json!({"a": 1})]).await.unwrap();
        store.write_trace(2, "Traceback: boom").await.unwrap();

        assert_eq!(store.read(1).await, Some(StoredResult::Records(vec![json!({"a": 1})])));
        assert_eq!(store.read(2).await, Some(StoredResult::Trace("Traceback: boom".to_string())));
        assert!(store.read_records(2).await.is_empty());
        assert!(store.read(3).await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = ResultStore::new(dir.path());
        tokio::fs::write(dir.path().join("7.json"), b"[{\"a\":").await.unwrap();

        assert!(store.read(7).await.is_none());
        assert_eq!(store.page(7, 1, 10).await, (Vec::new(), 0));
    }

    #[tokio::test]
    async fn test_concurrent_appends_do_not_lose_records() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ResultStore::new(dir.path()));

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.append(1, vec![json!({"id": i})], Some("id")).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.read_records(1).await.len(), 10);
        assert_eq!(store.append(1, vec![json!({"id": 3})], Some("id")).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_page_and_delete() {
        let dir = TempDir::new().unwrap();
        let store = ResultStore::new(dir.path());
        let records: Vec<Value> = (0..5).map(|i| json!(i)).collect();
        store.write_records(4, &records).await.unwrap();

        assert_eq!(store.page(4, 2, 2).await, (vec![json!(2), json!(3)], 5));
        assert_eq!(store.page(4, 3, 2).await, (vec![json!(4)], 5));

        store.delete_many(&[4, 5]).await.unwrap();
        assert!(!store.exists(4).await);
    }
}
