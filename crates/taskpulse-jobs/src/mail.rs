//! Mail jobs: enqueueing and the two email handlers.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};
use uuid::Uuid;

use taskpulse_core::defaults::{DEADLINE_WINDOW_HOURS, JOB_MAX_RETRIES};
use taskpulse_core::{
    JobKind, JobRepository, Mailer, OutgoingEmail, Task, TaskRepository, UserRepository,
};

use crate::handler::{JobContext, JobHandler, JobResult};

/// Front door of the mail job queue used by request paths and the sweep.
#[derive(Clone)]
pub struct MailQueue {
    jobs: Arc<dyn JobRepository>,
    max_retries: i32,
}

impl MailQueue {
    pub fn new(jobs: Arc<dyn JobRepository>) -> Self {
        Self {
            jobs,
            max_retries: JOB_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries.max(0);
        self
    }

    /// Queue a job. Failures are logged, never returned.
    pub async fn enqueue(&self, kind: JobKind, task_id: Uuid) -> Option<Uuid> {
        match self.jobs.queue(kind, task_id, self.max_retries).await {
            Ok(job_id) => {
                debug!(
                    subsystem = "jobs",
                    component = "mail_queue",
                    %job_id,
                    job_kind = %kind,
                    %task_id,
                    "Mail job queued"
                );
                Some(job_id)
            }
            Err(e) => {
                error!(
                    subsystem = "jobs",
                    component = "mail_queue",
                    job_kind = %kind,
                    %task_id,
                    error = %e,
                    "Failed to queue mail job"
                );
                None
            }
        }
    }

    pub async fn enqueue_assignment(&self, task_id: Uuid) -> Option<Uuid> {
        self.enqueue(JobKind::TaskAssignment, task_id).await
    }

    pub async fn enqueue_reminder(&self, task_id: Uuid) -> Option<Uuid> {
        self.enqueue(JobKind::DeadlineReminder, task_id).await
    }
}

fn render_due_date(task: &Task) -> String {
    task.due_date
        .map(|d| d.to_rfc3339())
        .unwrap_or_else(|| "None".to_string())
}

/// Subject and body of the "new task" email.
pub fn assignment_email(task: &Task) -> (String, String) {
    (
        format!("New Task Assigned: {}", task.title),
        format!(
            "You have been assigned a new task:\n\nTitle: {}\nDescription: {}\nDue Date: {}",
            task.title,
            task.description,
            render_due_date(task)
        ),
    )
}

/// Subject and body of the "deadline approaching" email.
pub fn reminder_email(task: &Task) -> (String, String) {
    (
        format!("Task Deadline Approaching: {}", task.title),
        format!(
            "Your task deadline is within {} hours:\n\nTitle: {}\nDescription: {}\nDue Date: {}",
            DEADLINE_WINDOW_HOURS,
            task.title,
            task.description,
            render_due_date(task)
        ),
    )
}

/// Collaborators shared by the mail handlers.
#[derive(Clone)]
pub struct MailDeps {
    pub tasks: Arc<dyn TaskRepository>,
    pub users: Arc<dyn UserRepository>,
    pub mailer: Arc<dyn Mailer>,
    pub from: String,
}

impl MailDeps {
    /// Load the task and its owner, compose, and send. One attempt.
    async fn deliver(&self, ctx: &JobContext, compose: fn(&Task) -> (String, String)) -> JobResult {
        let task_id = ctx.task_id();

        let task = match self.tasks.get_any(task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => return JobResult::Failed(format!("Task {} not found", task_id)),
            Err(e) => return JobResult::Failed(e.to_string()),
        };

        let owner = match self.users.get(task.owner_id).await {
            Ok(Some(user)) => user,
            Ok(None) => return JobResult::Failed(format!("Owner {} not found", task.owner_id)),
            Err(e) => return JobResult::Failed(e.to_string()),
        };

        let (subject, body) = compose(&task);
        let email = OutgoingEmail {
            from: self.from.clone(),
            to: owner.email,
            subject,
            body,
        };

        match self.mailer.send(&email).await {
            Ok(()) => JobResult::Success,
            Err(e) => {
                error!(
                    subsystem = "mail",
                    transport = self.mailer.name(),
                    %task_id,
                    attempt = ctx.attempt(),
                    error = %e,
                    "Failed to send email"
                );
                JobResult::Failed(e.to_string())
            }
        }
    }
}

/// Emails the owner when a task is created.
pub struct TaskAssignmentHandler {
    deps: MailDeps,
}

impl TaskAssignmentHandler {
    pub fn new(deps: MailDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl JobHandler for TaskAssignmentHandler {
    fn kind(&self) -> JobKind {
        JobKind::TaskAssignment
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        self.deps.deliver(&ctx, assignment_email).await
    }
}

/// Emails the owner when a due date is less than a day away.
pub struct DeadlineReminderHandler {
    deps: MailDeps,
}

impl DeadlineReminderHandler {
    pub fn new(deps: MailDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl JobHandler for DeadlineReminderHandler {
    fn kind(&self) -> JobKind {
        JobKind::DeadlineReminder
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        self.deps.deliver(&ctx, reminder_email).await
    }
}
