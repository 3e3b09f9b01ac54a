//! Mail job queue implementation.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use taskpulse_core::{new_v7, Error, FailOutcome, Job, JobKind, JobRepository, Result};

const JOB_COLUMNS: &str = "id, kind, task_id, status, attempt_count, max_retries, run_at, \
                           locked_until, last_error, created_at, updated_at";

/// PostgreSQL implementation of JobRepository.
#[derive(Clone)]
pub struct PgJobRepository {
    pool: Pool<Postgres>,
}

impl PgJobRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_job_row(row: &sqlx::postgres::PgRow) -> Result<Job> {
        let kind: String = row.get("kind");
        let status: String = row.get("status");
        Ok(Job {
            id: row.get("id"),
            kind: kind.parse()?,
            task_id: row.get("task_id"),
            status: status.parse()?,
            attempt_count: row.get("attempt_count"),
            max_retries: row.get("max_retries"),
            run_at: row.get("run_at"),
            locked_until: row.get("locked_until"),
            last_error: row.get("last_error"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

/// `now + delay`; a delay chrono cannot represent counts as zero.
pub(crate) fn offset(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero())
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn queue(&self, kind: JobKind, task_id: Uuid, max_retries: i32) -> Result<Uuid> {
        let job_id = new_v7();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO mail_jobs (id, kind, task_id, status, attempt_count, max_retries, run_at, created_at, updated_at)
             VALUES ($1, $2, $3, 'pending', 0, $4, $5, $5, $5)",
        )
        .bind(job_id)
        .bind(kind.as_str())
        .bind(task_id)
        .bind(max_retries)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(job_id)
    }

    async fn claim_next(&self, now: DateTime<Utc>, lease: Duration) -> Result<Option<Job>> {
        // FOR UPDATE SKIP LOCKED lets several workers poll the same table.
        // A running row whose lease lapsed belongs to a worker that died or
        // lost its bookkeeping write, so it is claimable again.
        let row = sqlx::query(&format!(
            "UPDATE mail_jobs
             SET status = 'running', attempt_count = attempt_count + 1,
                 locked_until = $2, updated_at = $1
             WHERE id = (
                 SELECT id FROM mail_jobs
                 WHERE (status = 'pending' AND run_at <= $1)
                    OR (status = 'running' AND locked_until <= $1)
                 ORDER BY run_at ASC, created_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(now)
        .bind(offset(now, lease))
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_job_row).transpose()
    }

    async fn complete(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE mail_jobs
             SET status = 'completed', locked_until = NULL, last_error = NULL, updated_at = $1
             WHERE id = $2",
        )
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str, retry_delay: Duration) -> Result<FailOutcome> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let (attempt_count, max_retries): (i32, i32) = sqlx::query_as(
            "SELECT attempt_count, max_retries FROM mail_jobs WHERE id = $1 FOR UPDATE",
        )
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?
        .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))?;

        let outcome = if attempt_count <= max_retries {
            let run_at = offset(now, retry_delay);
            sqlx::query(
                "UPDATE mail_jobs
                 SET status = 'pending', run_at = $1, locked_until = NULL, last_error = $2,
                     updated_at = $3
                 WHERE id = $4",
            )
            .bind(run_at)
            .bind(error)
            .bind(now)
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
            FailOutcome::Rescheduled { run_at }
        } else {
            sqlx::query(
                "UPDATE mail_jobs
                 SET status = 'failed', locked_until = NULL, last_error = $1, updated_at = $2
                 WHERE id = $3",
            )
            .bind(error)
            .bind(now)
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
            FailOutcome::Exhausted
        };

        tx.commit().await.map_err(Error::Database)?;
        Ok(outcome)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM mail_jobs WHERE id = $1"))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_job_row).transpose()
    }

    async fn pending_count(&self) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM mail_jobs WHERE status = 'pending'")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)
    }
}
