//! 文件存储：任务结果与内容寻址缓存
//!
//! 结果不进入任务表，每个任务一个 JSON 文件，避免大结果撑大数据库。
//! 所有写入先落临时文件再重命名，读者不会看到写了一半的文件。

pub mod cache;
pub mod result_store;

pub use cache::ResultCache;
pub use result_store::{ResultStore, StoredResult};

use std::path::Path;

use scrape_core::SchedulerResult;

pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> SchedulerResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}
