use thiserror::Error;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("任务未找到: {id}")]
    TaskNotFound { id: i64 },

    #[error("抓取器未注册: {name}")]
    ScraperNotFound { name: String },

    #[error("存储错误: {0}")]
    Storage(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("集群节点未就绪: {0}")]
    ClusterNotReady(String),

    #[error("内部错误: {0}")]
    Internal(String),

    #[error("无效的任务参数: {0}")]
    InvalidTaskParams(String),
}

impl SchedulerError {
    /// 是否为可重试的瞬时存储错误
    pub fn is_transient(&self) -> bool {
        match self {
            SchedulerError::Database(err) => match err {
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => true,
                sqlx::Error::Database(db_err) => {
                    let message = db_err.message().to_ascii_lowercase();
                    message.contains("database is locked") || message.contains("busy")
                }
                _ => false,
            },
            SchedulerError::Storage(_) => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type Result<T> = std::result::Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(SchedulerError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(SchedulerError::Storage(std::io::Error::other("disk")).is_transient());
        assert!(!SchedulerError::TaskNotFound { id: 1 }.is_transient());
        assert!(!SchedulerError::Database(sqlx::Error::RowNotFound).is_transient());
    }
}
