use std::str::FromStr;
use std::time::Duration;

use scrape_core::config::models::DatabaseConfig;
use scrape_core::SchedulerResult;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

/// 数据库连接池与表结构初始化
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> SchedulerResult<Self> {
        let in_memory = config.url.contains(":memory:");

        let mut connect_options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            connect_options = connect_options.journal_mode(SqliteJournalMode::Wal);
            if let Some(dir) = connect_options.get_filename().parent() {
                if !dir.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(dir).await?;
                }
            }
        }

        // 内存库每个连接都是独立的数据库，只能使用单连接
        let max_connections = if in_memory { 1 } else { config.max_connections };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(connect_options)
            .await?;

        let manager = Self { pool };
        manager.migrate().await?;

        info!("数据库已就绪: {}", config.url);
        Ok(manager)
    }

    /// 测试用的内存数据库
    pub async fn in_memory() -> SchedulerResult<Self> {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            ..DatabaseConfig::default()
        };
        Self::new(&config).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> SchedulerResult<()> {
        debug!("Running SQLite database migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                status TEXT NOT NULL DEFAULT 'PENDING',
                sort_id INTEGER NOT NULL,
                task_name TEXT NOT NULL,
                scraper_name TEXT NOT NULL,
                scraper_type TEXT NOT NULL,
                is_all_task INTEGER NOT NULL DEFAULT 0,
                is_sync INTEGER NOT NULL DEFAULT 0,
                parent_task_id INTEGER,
                started_at TEXT,
                finished_at TEXT,
                data TEXT NOT NULL DEFAULT 'null',
                meta_data TEXT,
                result_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (parent_task_id) REFERENCES tasks(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_tasks_admission ON tasks(status, scraper_type, is_all_task, is_sync, sort_id)",
            "CREATE INDEX IF NOT EXISTS idx_tasks_sort_id ON tasks(sort_id)",
            "CREATE INDEX IF NOT EXISTS idx_tasks_parent ON tasks(parent_task_id)",
            "CREATE INDEX IF NOT EXISTS idx_tasks_scraper_name ON tasks(scraper_name)",
        ];

        for index_sql in indexes {
            sqlx::query(index_sql).execute(&self.pool).await?;
        }

        debug!("Successfully completed SQLite database migrations");
        Ok(())
    }

    pub async fn health_check(&self) -> SchedulerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
