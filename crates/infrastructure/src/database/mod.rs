pub mod manager;
pub mod retrying;
pub mod sqlite;

pub use manager::DatabaseManager;
pub use retrying::RetryingTaskRepository;
pub use sqlite::SqliteTaskRepository;
