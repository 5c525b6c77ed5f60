use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scrape_core::{
    models::{ScraperType, Task, TaskFilter, TaskStatus, TaskUpdate},
    traits::{TaskPage, TaskRepository},
    SchedulerError, SchedulerResult,
};
use sqlx::{sqlite::SqliteRow, Row, Sqlite, SqlitePool};
use tracing::{debug, instrument};

const TASK_COLUMNS: &str = "id, status, sort_id, task_name, scraper_name, scraper_type, is_all_task, is_sync, parent_task_id, started_at, finished_at, data, meta_data, result_count, created_at, updated_at";

pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &SqliteRow) -> SchedulerResult<Task> {
        let data: String = row.try_get("data")?;
        let meta_data: Option<String> = row.try_get("meta_data")?;

        Ok(Task {
            id: row.try_get("id")?,
            status: row.try_get("status")?,
            sort_id: row.try_get("sort_id")?,
            task_name: row.try_get("task_name")?,
            scraper_name: row.try_get("scraper_name")?,
            scraper_type: row.try_get("scraper_type")?,
            is_all_task: row.try_get("is_all_task")?,
            is_sync: row.try_get("is_sync")?,
            parent_task_id: row.try_get("parent_task_id")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
            data: serde_json::from_str(&data)?,
            meta_data: meta_data.as_deref().map(serde_json::from_str).transpose()?,
            result_count: row.try_get("result_count")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn insert<'e, E>(executor: E, task: &Task) -> SchedulerResult<Task>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let data_json = serde_json::to_string(&task.data)?;
        let meta_json = task.meta_data.as_ref().map(serde_json::to_string).transpose()?;

        let sql = format!(
            r#"
            INSERT INTO tasks (status, sort_id, task_name, scraper_name, scraper_type, is_all_task, is_sync,
                               parent_task_id, started_at, finished_at, data, meta_data, result_count, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {TASK_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(task.status)
            .bind(task.sort_id)
            .bind(&task.task_name)
            .bind(&task.scraper_name)
            .bind(task.scraper_type)
            .bind(task.is_all_task)
            .bind(task.is_sync)
            .bind(task.parent_task_id)
            .bind(task.started_at)
            .bind(task.finished_at)
            .bind(data_json)
            .bind(meta_json)
            .bind(task.result_count)
            .bind(task.created_at)
            .bind(task.updated_at)
            .fetch_one(executor)
            .await?;

        Self::row_to_task(&row)
    }

    fn placeholders(count: usize) -> String {
        vec!["?"; count].join(", ")
    }

    /// 拼出 `SET ...` 子句，`updated_at` 总是刷新
    fn set_clause(update: &TaskUpdate) -> String {
        let mut sets = vec!["updated_at = ?"];
        if update.status.is_some() {
            sets.push("status = ?");
        }
        if update.started_at.is_some() {
            sets.push("started_at = ?");
        }
        if update.finished_at.is_some() {
            sets.push("finished_at = ?");
        }
        if update.result_count.is_some() {
            sets.push("result_count = ?");
        }
        sets.join(", ")
    }

    fn bind_update<'q>(
        mut query: sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
        update: &TaskUpdate,
    ) -> sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
        query = query.bind(Utc::now());
        if let Some(status) = update.status {
            query = query.bind(status);
        }
        if let Some(started_at) = update.started_at {
            query = query.bind(started_at);
        }
        if let Some(finished_at) = update.finished_at {
            query = query.bind(finished_at);
        }
        if let Some(result_count) = update.result_count {
            query = query.bind(result_count);
        }
        query
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    #[instrument(skip(self, task), fields(scraper_name = %task.scraper_name))]
    async fn create(&self, task: &Task) -> SchedulerResult<Task> {
        let created = Self::insert(&self.pool, task).await?;
        debug!("创建任务成功: ID {}, 抓取器: {}", created.id, created.scraper_name);
        Ok(created)
    }

    #[instrument(skip(self, parent, children), fields(count = children.len()))]
    async fn create_with_children(&self, parent: &Task, children: &[Task]) -> SchedulerResult<(Task, Vec<Task>)> {
        let mut tx = self.pool.begin().await?;
        let parent = Self::insert(&mut *tx, parent).await?;

        let mut created = Vec::with_capacity(children.len());
        for child in children {
            let child = child
                .clone()
                .with_parent(parent.id)
                .with_sort_id(parent.sort_id);
            created.push(Self::insert(&mut *tx, &child).await?);
        }
        tx.commit().await?;

        debug!("创建父任务 {} 及 {} 个子任务", parent.id, created.len());
        Ok((parent, created))
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_task(&row)?)),
            None => {
                debug!("查询任务不存在: ID {}", id);
                Ok(None)
            }
        }
    }

    #[instrument(skip(self, update, in_status), fields(task_id = %id))]
    async fn update(
        &self,
        id: i64,
        update: &TaskUpdate,
        in_status: Option<&[TaskStatus]>,
    ) -> SchedulerResult<bool> {
        let affected = self.update_many(&[id], update, in_status).await?;
        Ok(affected > 0)
    }

    async fn update_many(
        &self,
        ids: &[i64],
        update: &TaskUpdate,
        in_status: Option<&[TaskStatus]>,
    ) -> SchedulerResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut sql = format!(
            "UPDATE tasks SET {} WHERE id IN ({})",
            Self::set_clause(update),
            Self::placeholders(ids.len())
        );
        if let Some(statuses) = in_status {
            if statuses.is_empty() {
                return Ok(0);
            }
            sql.push_str(&format!(" AND status IN ({})", Self::placeholders(statuses.len())));
        }

        let mut query = Self::bind_update(sqlx::query(&sql), update);
        for id in ids {
            query = query.bind(*id);
        }
        if let Some(statuses) = in_status {
            for status in statuses {
                query = query.bind(*status);
            }
        }

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, filter), fields(status = ?filter.status, page = filter.page))]
    async fn list(&self, filter: &TaskFilter) -> SchedulerResult<TaskPage> {
        let mut where_clause = " WHERE 1=1".to_string();
        if filter.status.is_some() {
            where_clause.push_str(" AND status = ?");
        }
        if filter.scraper_name.is_some() {
            where_clause.push_str(" AND scraper_name = ?");
        }
        if filter.parent_task_id.is_some() {
            where_clause.push_str(" AND parent_task_id = ?");
        }
        if filter.top_level_only {
            where_clause.push_str(" AND parent_task_id IS NULL");
        }

        let count_sql = format!("SELECT COUNT(*) AS total FROM tasks{where_clause}");
        let list_sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks{where_clause} ORDER BY sort_id DESC, id ASC LIMIT ? OFFSET ?"
        );

        let mut count_query = sqlx::query(&count_sql);
        let mut list_query = sqlx::query(&list_sql);
        if let Some(status) = filter.status {
            count_query = count_query.bind(status);
            list_query = list_query.bind(status);
        }
        if let Some(scraper_name) = &filter.scraper_name {
            count_query = count_query.bind(scraper_name);
            list_query = list_query.bind(scraper_name);
        }
        if let Some(parent_id) = filter.parent_task_id {
            count_query = count_query.bind(parent_id);
            list_query = list_query.bind(parent_id);
        }
        list_query = list_query.bind(filter.per_page.max(1)).bind(filter.offset());

        let total: i64 = count_query.fetch_one(&self.pool).await?.try_get("total")?;
        let rows = list_query.fetch_all(&self.pool).await?;
        let items = rows
            .iter()
            .map(Self::row_to_task)
            .collect::<SchedulerResult<Vec<_>>>()?;

        Ok(TaskPage { items, total })
    }

    #[instrument(skip(self), fields(scraper_type = %scraper_type))]
    async fn claim_pending(
        &self,
        scraper_type: ScraperType,
        limit: Option<usize>,
    ) -> SchedulerResult<Vec<Task>> {
        if limit == Some(0) {
            return Ok(Vec::new());
        }
        // SQLite 中 LIMIT -1 表示不限量
        let limit = limit.map(|n| n as i64).unwrap_or(-1);

        let sql = format!(
            r#"
            UPDATE tasks
            SET status = 'IN_PROGRESS', started_at = ?1, updated_at = ?1
            WHERE status = 'PENDING' AND id IN (
                SELECT id FROM tasks
                WHERE status = 'PENDING' AND scraper_type = ?2 AND is_all_task = 0
                ORDER BY is_sync DESC, sort_id DESC, id ASC
                LIMIT ?3
            )
            RETURNING {TASK_COLUMNS}
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(Utc::now())
            .bind(scraper_type)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        let mut claimed = rows
            .iter()
            .map(Self::row_to_task)
            .collect::<SchedulerResult<Vec<_>>>()?;
        claimed.sort_by(|a, b| {
            b.is_sync
                .cmp(&a.is_sync)
                .then(b.sort_id.cmp(&a.sort_id))
                .then(a.id.cmp(&b.id))
        });

        if !claimed.is_empty() {
            debug!("认领 {} 个 {} 类型任务", claimed.len(), scraper_type);
        }
        Ok(claimed)
    }

    async fn mark_parent_started(&self, parent_id: i64, at: DateTime<Utc>) -> SchedulerResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'IN_PROGRESS', started_at = ?1, updated_at = ?1
            WHERE id = ?2 AND is_all_task = 1 AND started_at IS NULL AND status = 'PENDING'
            "#,
        )
        .bind(at)
        .bind(parent_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_children(&self, parent_id: i64) -> SchedulerResult<Vec<Task>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE parent_task_id = ? ORDER BY sort_id DESC, id ASC"
        );
        let rows = sqlx::query(&sql).bind(parent_id).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn delete(&self, id: i64) -> SchedulerResult<Vec<i64>> {
        let mut tx = self.pool.begin().await?;

        let parent_id = sqlx::query("SELECT parent_task_id FROM tasks WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .map(|row| row.try_get::<Option<i64>, _>("parent_task_id"))
            .transpose()?
            .flatten();

        let rows = sqlx::query("SELECT id FROM tasks WHERE id = ?1 OR parent_task_id = ?1")
            .bind(id)
            .fetch_all(&mut *tx)
            .await?;
        let mut ids = rows
            .iter()
            .map(|row| row.try_get::<i64, _>("id"))
            .collect::<Result<Vec<_>, _>>()?;

        if ids.is_empty() {
            return Ok(ids);
        }

        sqlx::query("DELETE FROM tasks WHERE id = ?1 OR parent_task_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        // 没有子任务的父任务永远不会被认领或聚合
        if let Some(parent_id) = parent_id {
            let remaining: i64 = sqlx::query("SELECT COUNT(*) AS remaining FROM tasks WHERE parent_task_id = ?1")
                .bind(parent_id)
                .fetch_one(&mut *tx)
                .await?
                .try_get("remaining")?;
            if remaining == 0 {
                let removed = sqlx::query("DELETE FROM tasks WHERE id = ?1 AND is_all_task = 1")
                    .bind(parent_id)
                    .execute(&mut *tx)
                    .await?;
                if removed.rows_affected() > 0 {
                    debug!("父任务 {} 已无子任务，一并删除", parent_id);
                    ids.push(parent_id);
                }
            }
        }
        tx.commit().await?;

        debug!("删除任务 {}，共 {} 行", id, ids.len());
        Ok(ids)
    }

    async fn reset_in_progress(&self) -> SchedulerResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'PENDING', started_at = NULL, updated_at = ?1
            WHERE status = 'IN_PROGRESS' AND is_all_task = 0
            "#,
        )
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn find_unfinished_sync(&self) -> SchedulerResult<Vec<i64>> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM tasks
            WHERE is_sync = 1 AND parent_task_id IS NULL AND status IN ('PENDING', 'IN_PROGRESS')
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<i64, _>("id").map_err(SchedulerError::from))
            .collect()
    }
}
