//! Core traits for taskpulse abstractions.
//!
//! These traits define the interfaces that concrete implementations
//! must satisfy, enabling pluggable backends and testability.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// TASK REPOSITORY
// =============================================================================

/// Durable task storage.
///
/// Every owner-scoped method treats a task belonging to someone else exactly
/// like a missing task.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Insert a task, assigning its id and timestamps.
    async fn insert(&self, task: NewTask) -> Result<Task>;

    /// Fetch one task owned by `owner_id`.
    async fn get(&self, owner_id: Uuid, id: Uuid) -> Result<Option<Task>>;

    /// Fetch a task regardless of owner. Used by background jobs.
    async fn get_any(&self, id: Uuid) -> Result<Option<Task>>;

    /// Apply a partial update and refresh `updated_at`.
    ///
    /// Returns `None` when no task with that id is owned by `owner_id`.
    async fn update(
        &self,
        owner_id: Uuid,
        id: Uuid,
        update: &UpdateTaskRequest,
    ) -> Result<Option<Task>>;

    /// Delete a task. Returns whether a row was removed.
    async fn delete(&self, owner_id: Uuid, id: Uuid) -> Result<bool>;

    /// List an owner's tasks matching `filter`, oldest first.
    async fn query_by_owner(&self, owner_id: Uuid, filter: &TaskFilter) -> Result<Vec<Task>>;

    /// Count an owner's tasks matching `predicate`.
    async fn count_by_owner(&self, owner_id: Uuid, predicate: TaskPredicate) -> Result<i64>;

    /// Count an owner's tasks per priority. Zero groups may be omitted.
    async fn group_count_by_priority(&self, owner_id: Uuid) -> Result<Vec<PriorityCount>>;

    /// All tasks with `from < due_date <= to`, any owner.
    async fn due_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Task>>;
}

// =============================================================================
// USER REPOSITORY
// =============================================================================

/// Read access to accounts managed by the external auth layer.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Resolve a bearer token to its user, if the token is known.
    async fn resolve_token(&self, token: &str) -> Result<Option<User>>;

    /// Get a user by id.
    async fn get(&self, id: Uuid) -> Result<Option<User>>;
}

// =============================================================================
// JOB REPOSITORY
// =============================================================================

/// Durable queue of mail jobs.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Queue a new job runnable immediately.
    async fn queue(&self, kind: JobKind, task_id: Uuid, max_retries: i32) -> Result<Uuid>;

    /// Claim the oldest runnable job: pending with `run_at <= now`, or
    /// running with a lease that lapsed at or before `now`.
    ///
    /// The claimed job is marked running, its `attempt_count` incremented
    /// and its lease set to `now + lease`.
    async fn claim_next(&self, now: DateTime<Utc>, lease: Duration) -> Result<Option<Job>>;

    /// Mark job as completed and release its lease.
    async fn complete(&self, job_id: Uuid) -> Result<()>;

    /// Record a failed attempt.
    ///
    /// Reschedules the job `retry_delay` from now while retries remain,
    /// otherwise marks it failed for good.
    async fn fail(&self, job_id: Uuid, error: &str, retry_delay: Duration) -> Result<FailOutcome>;

    /// Get job by ID.
    async fn get(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// Number of pending jobs, runnable or not.
    async fn pending_count(&self) -> Result<i64>;
}

// =============================================================================
// MAILER
// =============================================================================

/// Outbound email transport.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver one message. Any error counts as a failed attempt.
    async fn send(&self, email: &OutgoingEmail) -> Result<()>;

    /// Short transport name for logs.
    fn name(&self) -> &'static str;
}
