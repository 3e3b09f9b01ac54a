//! Task repository implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use taskpulse_core::{
    new_v7, Error, NewTask, PriorityCount, Result, Task, TaskFilter, TaskPredicate,
    TaskRepository, UpdateTaskRequest,
};

const TASK_COLUMNS: &str =
    "id, owner_id, title, description, priority, status, due_date, created_at, updated_at";

/// PostgreSQL implementation of TaskRepository.
#[derive(Clone)]
pub struct PgTaskRepository {
    pool: Pool<Postgres>,
}

impl PgTaskRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_task_row(row: &sqlx::postgres::PgRow) -> Result<Task> {
        let priority: String = row.get("priority");
        let status: String = row.get("status");
        Ok(Task {
            id: row.get("id"),
            owner_id: row.get("owner_id"),
            title: row.get("title"),
            description: row.get("description"),
            priority: priority.parse()?,
            status: status.parse()?,
            due_date: row.get("due_date"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn parse_rows(rows: Vec<sqlx::postgres::PgRow>) -> Result<Vec<Task>> {
        rows.iter().map(Self::parse_task_row).collect()
    }
}

#[async_trait]
impl TaskRepository for PgTaskRepository {
    async fn insert(&self, task: NewTask) -> Result<Task> {
        let id = new_v7();
        let now = Utc::now();

        let row = sqlx::query(&format!(
            "INSERT INTO tasks (id, owner_id, title, description, priority, status, due_date, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(id)
        .bind(task.owner_id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.priority.as_str())
        .bind(task.status.as_str())
        .bind(task.due_date)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Self::parse_task_row(&row)
    }

    async fn get(&self, owner_id: Uuid, id: Uuid) -> Result<Option<Task>> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1 AND owner_id = $2"
        ))
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_task_row).transpose()
    }

    async fn get_any(&self, id: Uuid) -> Result<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_task_row).transpose()
    }

    async fn update(
        &self,
        owner_id: Uuid,
        id: Uuid,
        update: &UpdateTaskRequest,
    ) -> Result<Option<Task>> {
        let row = sqlx::query(&format!(
            "UPDATE tasks
             SET title = COALESCE($3, title),
                 description = COALESCE($4, description),
                 priority = COALESCE($5, priority),
                 status = COALESCE($6, status),
                 due_date = CASE WHEN $7 THEN $8 ELSE due_date END,
                 updated_at = $9
             WHERE id = $1 AND owner_id = $2
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(id)
        .bind(owner_id)
        .bind(update.title.as_deref())
        .bind(update.description.as_deref())
        .bind(update.priority.map(|p| p.as_str()))
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.due_date.is_some())
        .bind(update.due_date.flatten())
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_task_row).transpose()
    }

    async fn delete(&self, owner_id: Uuid, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1 AND owner_id = $2")
            .bind(id)
            .bind(owner_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn query_by_owner(&self, owner_id: Uuid, filter: &TaskFilter) -> Result<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE owner_id = $1
               AND ($2::text IS NULL OR priority = $2)
               AND ($3::text IS NULL OR status = $3)
               AND ($4::date IS NULL OR (due_date AT TIME ZONE 'UTC')::date = $4)
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(owner_id)
        .bind(filter.priority.map(|p| p.as_str()))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.due_date)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Self::parse_rows(rows)
    }

    async fn count_by_owner(&self, owner_id: Uuid, predicate: TaskPredicate) -> Result<i64> {
        let sql = match predicate {
            TaskPredicate::Completed => {
                "SELECT COUNT(*) FROM tasks WHERE owner_id = $1 AND status = 'done'"
            }
            TaskPredicate::Pending => {
                "SELECT COUNT(*) FROM tasks WHERE owner_id = $1 AND status <> 'done'"
            }
        };

        sqlx::query_scalar::<_, i64>(sql)
            .bind(owner_id)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)
    }

    async fn group_count_by_priority(&self, owner_id: Uuid) -> Result<Vec<PriorityCount>> {
        let rows = sqlx::query(
            "SELECT priority, COUNT(*) AS count FROM tasks
             WHERE owner_id = $1
             GROUP BY priority
             ORDER BY priority",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter()
            .map(|row| {
                let priority: String = row.get("priority");
                Ok(PriorityCount {
                    priority: priority.parse()?,
                    count: row.get("count"),
                })
            })
            .collect()
    }

    async fn due_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE due_date > $1 AND due_date <= $2
             ORDER BY due_date ASC"
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Self::parse_rows(rows)
    }
}
