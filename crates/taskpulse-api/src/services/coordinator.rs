//! Task mutations and reads with their side effects.
//!
//! Every committed write invalidates the owner's cached list before it
//! returns, then publishes a change event. Creates additionally queue the
//! assignment email. Cache, event and queue failures are logged and never
//! fail a mutation that the store already committed.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};
use uuid::Uuid;

use taskpulse_core::{
    owner_topic, CreateTaskRequest, Error, EventBus, Result, Task, TaskAction, TaskEvent,
    TaskFilter, TaskRepository, UpdateTaskRequest,
};
use taskpulse_jobs::MailQueue;

use super::task_list_cache::TaskListCache;

/// Orchestrates store writes, cache invalidation, events and mail jobs.
#[derive(Clone)]
pub struct TaskCoordinator {
    tasks: Arc<dyn TaskRepository>,
    cache: TaskListCache,
    events: Arc<EventBus>,
    mail: MailQueue,
}

impl TaskCoordinator {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        cache: TaskListCache,
        events: Arc<EventBus>,
        mail: MailQueue,
    ) -> Self {
        Self {
            tasks,
            cache,
            events,
            mail,
        }
    }

    pub fn cache(&self) -> &TaskListCache {
        &self.cache
    }

    /// Validate, insert, invalidate, queue the assignment email, publish `created`.
    pub async fn create(&self, owner_id: Uuid, request: CreateTaskRequest) -> Result<Task> {
        let start = Instant::now();
        let new_task = request.validate(owner_id)?;
        let task = self.tasks.insert(new_task).await?;

        self.cache.invalidate(owner_id).await;
        self.mail.enqueue_assignment(task.id).await;
        self.publish(TaskAction::Created, task.clone());

        info!(
            subsystem = "api",
            component = "coordinator",
            op = "create",
            task_id = %task.id,
            owner_id = %owner_id,
            duration_ms = start.elapsed().as_millis() as u64,
            "Task created"
        );
        Ok(task)
    }

    /// Validate, apply, invalidate, publish `updated`. No email.
    pub async fn update(
        &self,
        owner_id: Uuid,
        task_id: Uuid,
        request: UpdateTaskRequest,
    ) -> Result<Task> {
        let start = Instant::now();
        let request = request.validate()?;
        let task = self
            .tasks
            .update(owner_id, task_id, &request)
            .await?
            .ok_or(Error::TaskNotFound(task_id))?;

        self.cache.invalidate(owner_id).await;
        self.publish(TaskAction::Updated, task.clone());

        info!(
            subsystem = "api",
            component = "coordinator",
            op = "update",
            task_id = %task_id,
            owner_id = %owner_id,
            duration_ms = start.elapsed().as_millis() as u64,
            "Task updated"
        );
        Ok(task)
    }

    /// Snapshot, invalidate, publish `deleted` with the snapshot, delete,
    /// invalidate again. Returns the snapshot.
    pub async fn delete(&self, owner_id: Uuid, task_id: Uuid) -> Result<Task> {
        let start = Instant::now();
        let snapshot = self
            .tasks
            .get(owner_id, task_id)
            .await?
            .ok_or(Error::TaskNotFound(task_id))?;

        self.cache.invalidate(owner_id).await;
        self.publish(TaskAction::Deleted, snapshot.clone());

        if !self.tasks.delete(owner_id, task_id).await? {
            // Lost a race with another delete; the outcome is the same.
            debug!(
                subsystem = "api",
                component = "coordinator",
                task_id = %task_id,
                "Task already gone at delete time"
            );
        }
        // Voids any list fill that read the task before the row was removed.
        self.cache.invalidate(owner_id).await;

        info!(
            subsystem = "api",
            component = "coordinator",
            op = "delete",
            task_id = %task_id,
            owner_id = %owner_id,
            duration_ms = start.elapsed().as_millis() as u64,
            "Task deleted"
        );
        Ok(snapshot)
    }

    /// Owner-scoped single read.
    pub async fn retrieve(&self, owner_id: Uuid, task_id: Uuid) -> Result<Task> {
        self.tasks
            .get(owner_id, task_id)
            .await?
            .ok_or(Error::TaskNotFound(task_id))
    }

    /// List the owner's tasks. Only the unfiltered list goes through the cache.
    pub async fn list(&self, owner_id: Uuid, filter: &TaskFilter) -> Result<Vec<Task>> {
        let start = Instant::now();
        if !filter.is_empty() {
            return self.tasks.query_by_owner(owner_id, filter).await;
        }

        if let Some(cached) = self.cache.get(owner_id).await {
            match serde_json::from_str::<Vec<Task>>(&cached) {
                Ok(tasks) => return Ok(tasks),
                Err(e) => warn!(
                    subsystem = "cache",
                    owner_id = %owner_id,
                    error = %e,
                    "Discarding unreadable cached task list"
                ),
            }
        }

        // Read before the store so a write landing mid-query voids the fill.
        let generation = self.cache.generation(owner_id).await;
        let tasks = self.tasks.query_by_owner(owner_id, filter).await?;
        if let Some(generation) = generation {
            match serde_json::to_string(&tasks) {
                Ok(serialized) => {
                    self.cache
                        .put_if_current(owner_id, generation, serialized)
                        .await;
                }
                Err(e) => warn!(subsystem = "cache", error = %e, "Failed to serialize task list"),
            }
        }

        debug!(
            subsystem = "api",
            component = "coordinator",
            op = "list",
            owner_id = %owner_id,
            result_count = tasks.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Task list loaded from store"
        );
        Ok(tasks)
    }

    fn publish(&self, action: TaskAction, task: Task) {
        let topic = owner_topic(task.owner_id);
        self.events.publish(&topic, TaskEvent::new(action, task));
    }
}
