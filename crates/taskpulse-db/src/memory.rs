//! In-memory repositories.
//!
//! Same contracts as the PostgreSQL repositories, backed by maps behind
//! `tokio::sync::RwLock`. Used by `STORE_BACKEND=memory` and by tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use taskpulse_core::{
    new_v7, normalize_priority_counts, Error, FailOutcome, Job, JobKind, JobRepository,
    JobStatus, NewTask, Priority, PriorityCount, Result, Task, TaskFilter, TaskPredicate,
    TaskRepository, UpdateTaskRequest, User, UserRepository,
};
use taskpulse_core::defaults::MEMORY_FINISHED_JOB_RETENTION;

use crate::jobs::offset;
use crate::users::hash_token;

// =============================================================================
// TASKS
// =============================================================================

#[derive(Default)]
pub struct MemoryTaskRepository {
    tasks: RwLock<HashMap<Uuid, Task>>,
}

impl MemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tasks across all owners.
    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    async fn owned_sorted<F>(&self, owner_id: Uuid, keep: F) -> Vec<Task>
    where
        F: Fn(&Task) -> bool,
    {
        let tasks = self.tasks.read().await;
        let mut out: Vec<Task> = tasks
            .values()
            .filter(|t| t.owner_id == owner_id && keep(t))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        out
    }
}

#[async_trait]
impl TaskRepository for MemoryTaskRepository {
    async fn insert(&self, task: NewTask) -> Result<Task> {
        let now = Utc::now();
        let stored = Task {
            id: new_v7(),
            owner_id: task.owner_id,
            title: task.title,
            description: task.description,
            priority: task.priority,
            status: task.status,
            due_date: task.due_date,
            created_at: now,
            updated_at: now,
        };
        self.tasks.write().await.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get(&self, owner_id: Uuid, id: Uuid) -> Result<Option<Task>> {
        let tasks = self.tasks.read().await;
        Ok(tasks.get(&id).filter(|t| t.owner_id == owner_id).cloned())
    }

    async fn get_any(&self, id: Uuid) -> Result<Option<Task>> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn update(
        &self,
        owner_id: Uuid,
        id: Uuid,
        update: &UpdateTaskRequest,
    ) -> Result<Option<Task>> {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(&id).filter(|t| t.owner_id == owner_id) else {
            return Ok(None);
        };
        update.apply_to(task);
        task.updated_at = Utc::now().max(task.updated_at);
        Ok(Some(task.clone()))
    }

    async fn delete(&self, owner_id: Uuid, id: Uuid) -> Result<bool> {
        let mut tasks = self.tasks.write().await;
        if tasks.get(&id).is_some_and(|t| t.owner_id == owner_id) {
            tasks.remove(&id);
            return Ok(true);
        }
        Ok(false)
    }

    async fn query_by_owner(&self, owner_id: Uuid, filter: &TaskFilter) -> Result<Vec<Task>> {
        Ok(self.owned_sorted(owner_id, |t| filter.matches(t)).await)
    }

    async fn count_by_owner(&self, owner_id: Uuid, predicate: TaskPredicate) -> Result<i64> {
        Ok(self.owned_sorted(owner_id, |t| predicate.matches(t)).await.len() as i64)
    }

    async fn group_count_by_priority(&self, owner_id: Uuid) -> Result<Vec<PriorityCount>> {
        let owned = self.owned_sorted(owner_id, |_| true).await;
        let counts = Priority::ALL
            .iter()
            .map(|p| PriorityCount {
                priority: *p,
                count: owned.iter().filter(|t| t.priority == *p).count() as i64,
            })
            .collect();
        Ok(normalize_priority_counts(counts))
    }

    async fn due_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Task>> {
        let tasks = self.tasks.read().await;
        let mut out: Vec<Task> = tasks
            .values()
            .filter(|t| t.due_date.is_some_and(|due| due > from && due <= to))
            .cloned()
            .collect();
        out.sort_by_key(|t| t.due_date);
        Ok(out)
    }
}

// =============================================================================
// USERS
// =============================================================================

#[derive(Default)]
pub struct MemoryUserRepository {
    users: RwLock<HashMap<Uuid, User>>,
    tokens: RwLock<HashMap<String, Uuid>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user reachable with `token`.
    pub async fn add(&self, user: User, token: &str) {
        self.tokens.write().await.insert(hash_token(token), user.id);
        self.users.write().await.insert(user.id, user);
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn resolve_token(&self, token: &str) -> Result<Option<User>> {
        let user_id = self.tokens.read().await.get(&hash_token(token)).copied();
        match user_id {
            Some(id) => Ok(self.users.read().await.get(&id).cloned()),
            None => Ok(None),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }
}

// =============================================================================
// JOBS
// =============================================================================

/// In-memory job queue.
///
/// Completed and failed jobs are kept for inspection up to a retention
/// limit, after which the oldest finished ones are dropped.
pub struct MemoryJobRepository {
    jobs: RwLock<HashMap<Uuid, Job>>,
    finished_retention: usize,
}

impl Default for MemoryJobRepository {
    fn default() -> Self {
        Self::with_retention(MEMORY_FINISHED_JOB_RETENTION)
    }
}

impl MemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue keeping at most `finished_retention` completed or failed jobs.
    pub fn with_retention(finished_retention: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            finished_retention,
        }
    }

    /// Snapshot of every job, oldest first.
    pub async fn all(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        jobs
    }

    fn prune_finished(&self, jobs: &mut HashMap<Uuid, Job>) {
        let mut finished: Vec<(DateTime<Utc>, Uuid)> = jobs
            .values()
            .filter(|j| matches!(j.status, JobStatus::Completed | JobStatus::Failed))
            .map(|j| (j.updated_at, j.id))
            .collect();
        if finished.len() <= self.finished_retention {
            return;
        }
        finished.sort();
        let excess = finished.len() - self.finished_retention;
        for (_, id) in finished.into_iter().take(excess) {
            jobs.remove(&id);
        }
    }
}

#[async_trait]
impl JobRepository for MemoryJobRepository {
    async fn queue(&self, kind: JobKind, task_id: Uuid, max_retries: i32) -> Result<Uuid> {
        let now = Utc::now();
        let job = Job {
            id: new_v7(),
            kind,
            task_id,
            status: JobStatus::Pending,
            attempt_count: 0,
            max_retries,
            run_at: now,
            locked_until: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        let id = job.id;
        self.jobs.write().await.insert(id, job);
        Ok(id)
    }

    async fn claim_next(&self, now: DateTime<Utc>, lease: Duration) -> Result<Option<Job>> {
        let mut jobs = self.jobs.write().await;
        let next = jobs
            .values()
            .filter(|j| (j.status == JobStatus::Pending && j.run_at <= now) || j.lease_expired(now))
            .min_by(|a, b| a.run_at.cmp(&b.run_at).then(a.created_at.cmp(&b.created_at)))
            .map(|j| j.id);

        Ok(next.and_then(|id| {
            jobs.get_mut(&id).map(|job| {
                job.status = JobStatus::Running;
                job.attempt_count += 1;
                job.locked_until = Some(offset(now, lease));
                job.updated_at = now;
                job.clone()
            })
        }))
    }

    async fn complete(&self, job_id: Uuid) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))?;
        job.status = JobStatus::Completed;
        job.locked_until = None;
        job.last_error = None;
        job.updated_at = Utc::now();
        self.prune_finished(&mut jobs);
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str, retry_delay: Duration) -> Result<FailOutcome> {
        let now = Utc::now();
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))?;

        job.last_error = Some(error.to_string());
        job.locked_until = None;
        job.updated_at = now;
        if job.can_retry() {
            job.status = JobStatus::Pending;
            job.run_at = offset(now, retry_delay);
            Ok(FailOutcome::Rescheduled { run_at: job.run_at })
        } else {
            job.status = JobStatus::Failed;
            self.prune_finished(&mut jobs);
            Ok(FailOutcome::Exhausted)
        }
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        Ok(self.jobs.read().await.get(&job_id).cloned())
    }

    async fn pending_count(&self) -> Result<i64> {
        let jobs = self.jobs.read().await;
        Ok(jobs.values().filter(|j| j.status == JobStatus::Pending).count() as i64)
    }
}

// =============================================================================
// BUNDLE
// =============================================================================

/// All in-memory repositories, keeping concrete handles for inspection.
#[derive(Clone, Default)]
pub struct MemoryStore {
    pub tasks: Arc<MemoryTaskRepository>,
    pub users: Arc<MemoryUserRepository>,
    pub jobs: Arc<MemoryJobRepository>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}
