//! Core data models for taskpulse.
//!
//! These types are shared across all taskpulse crates and represent
//! the core domain entities.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::defaults::TASK_TITLE_MAX_LEN;
use crate::error::{Error, Result};

// =============================================================================
// TASK TYPES
// =============================================================================

/// Relative importance of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::Low, Priority::Medium, Priority::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(Error::InvalidInput(format!("Invalid priority: {}", s))),
        }
    }
}

/// Workflow state of a task. `Done` is the only completed state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Done => "done",
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "todo" => Ok(Self::Todo),
            "in_progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            _ => Err(Error::InvalidInput(format!("Invalid status: {}", s))),
        }
    }
}

/// A stored task record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub status: TaskStatus,
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validated fields for a task about to be inserted.
///
/// The store assigns `id`, `created_at` and `updated_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub owner_id: Uuid,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub status: TaskStatus,
    pub due_date: Option<DateTime<Utc>>,
}

/// Request body for creating a task.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
}

impl CreateTaskRequest {
    /// Check the request and bind it to its owner.
    pub fn validate(self, owner_id: Uuid) -> Result<NewTask> {
        let title = validate_title(&self.title)?;
        Ok(NewTask {
            owner_id,
            title,
            description: self.description.unwrap_or_default(),
            priority: self.priority.unwrap_or_default(),
            status: self.status.unwrap_or_default(),
            due_date: self.due_date,
        })
    }
}

/// Partial update of a task. Absent fields are left untouched.
///
/// `due_date` distinguishes "absent" (`None`) from "explicitly null"
/// (`Some(None)`), the latter clearing the deadline.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UpdateTaskRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub due_date: Option<Option<DateTime<Utc>>>,
}

impl UpdateTaskRequest {
    /// Normalize the update, rejecting an empty or overlong title.
    pub fn validate(mut self) -> Result<Self> {
        if let Some(title) = self.title.take() {
            self.title = Some(validate_title(&title)?);
        }
        Ok(self)
    }

    /// Apply the update to a task in place. `updated_at` is the caller's concern.
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(description) = &self.description {
            task.description = description.clone();
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(due_date) = self.due_date {
            task.due_date = due_date;
        }
    }
}

fn deserialize_some<'de, T, D>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

fn validate_title(title: &str) -> Result<String> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("title must not be empty".to_string()));
    }
    if trimmed.chars().count() > TASK_TITLE_MAX_LEN {
        return Err(Error::InvalidInput(format!(
            "title must be at most {} characters",
            TASK_TITLE_MAX_LEN
        )));
    }
    Ok(trimmed.to_string())
}

/// Filters accepted by the task list endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub priority: Option<Priority>,
    pub status: Option<TaskStatus>,
    /// Matches tasks whose due date falls on this calendar day (UTC).
    pub due_date: Option<NaiveDate>,
}

impl TaskFilter {
    /// Build a filter from raw query-string values.
    pub fn parse(
        priority: Option<&str>,
        status: Option<&str>,
        due_date: Option<&str>,
    ) -> Result<Self> {
        fn non_empty(v: Option<&str>) -> Option<&str> {
            v.map(str::trim).filter(|v| !v.is_empty())
        }

        let priority = non_empty(priority).map(str::parse).transpose()?;
        let status = non_empty(status).map(str::parse).transpose()?;
        let due_date = non_empty(due_date)
            .map(|d| {
                NaiveDate::parse_from_str(d, "%Y-%m-%d").map_err(|_| {
                    Error::InvalidInput(format!("Invalid due_date (expected YYYY-MM-DD): {}", d))
                })
            })
            .transpose()?;

        Ok(Self {
            priority,
            status,
            due_date,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.priority.is_none() && self.status.is_none() && self.due_date.is_none()
    }

    pub fn matches(&self, task: &Task) -> bool {
        if let Some(priority) = self.priority {
            if task.priority != priority {
                return false;
            }
        }
        if let Some(status) = self.status {
            if task.status != status {
                return false;
            }
        }
        if let Some(day) = self.due_date {
            match task.due_date {
                Some(due) if due.date_naive() == day => {}
                _ => return false,
            }
        }
        true
    }
}

/// Count predicate used by the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPredicate {
    /// `status = done`
    Completed,
    /// `status != done`
    Pending,
}

impl TaskPredicate {
    pub fn matches(&self, task: &Task) -> bool {
        match self {
            Self::Completed => task.status.is_done(),
            Self::Pending => !task.status.is_done(),
        }
    }
}

// =============================================================================
// REPORT TYPES
// =============================================================================

/// Number of tasks sharing a priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityCount {
    pub priority: Priority,
    pub count: i64,
}

/// Summary counts over one owner's tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReport {
    pub completed_count: i64,
    pub pending_count: i64,
    /// Non-zero groups only, ordered by the priority's name.
    pub counts_by_priority: Vec<PriorityCount>,
}

/// Sort priority groups by name and drop empty ones.
pub fn normalize_priority_counts(mut counts: Vec<PriorityCount>) -> Vec<PriorityCount> {
    counts.retain(|c| c.count > 0);
    counts.sort_by(|a, b| a.priority.as_str().cmp(b.priority.as_str()));
    counts
}

// =============================================================================
// USER TYPES
// =============================================================================

/// An authenticated account, as resolved from a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
}

// =============================================================================
// MAIL TYPES
// =============================================================================

/// A composed email ready for a [`crate::Mailer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

// =============================================================================
// JOB TYPES
// =============================================================================

/// Kind of background mail job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Tell the owner a task was created for them
    TaskAssignment,
    /// Warn the owner that a due date is near
    DeadlineReminder,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskAssignment => "task_assignment",
            Self::DeadlineReminder => "deadline_reminder",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobKind {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "task_assignment" => Ok(Self::TaskAssignment),
            "deadline_reminder" => Ok(Self::DeadlineReminder),
            _ => Err(Error::Job(format!("Unknown job kind: {}", s))),
        }
    }
}

/// Status of a job in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(Error::Job(format!("Unknown job status: {}", s))),
        }
    }
}

/// A mail job in the queue.
///
/// `attempt_count` is incremented on every claim. A failed job is
/// rescheduled while `attempt_count <= max_retries`, so a job runs at most
/// `max_retries + 1` times.
///
/// A claim holds the job until `locked_until`. A job still running after
/// that is claimable again, which costs it an attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub task_id: Uuid,
    pub status: JobStatus,
    pub attempt_count: i32,
    pub max_retries: i32,
    pub run_at: DateTime<Utc>,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Whether another attempt is allowed after the current one fails.
    pub fn can_retry(&self) -> bool {
        self.attempt_count <= self.max_retries
    }

    /// Whether this claim is past the last allowed attempt. Only happens
    /// when a lapsed lease was reclaimed after the final attempt.
    pub fn over_budget(&self) -> bool {
        self.attempt_count > self.max_retries + 1
    }

    /// Whether a running job's lease has lapsed at `now`.
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Running && self.locked_until.is_some_and(|until| until <= now)
    }
}

/// What happened to a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Back to pending, runnable again at the given time
    Rescheduled { run_at: DateTime<Utc> },
    /// Retry bound reached, job marked failed
    Exhausted,
}
