//! Job handler contract.

use async_trait::async_trait;
use uuid::Uuid;

use taskpulse_core::{Job, JobKind};

/// Context provided to job handlers.
pub struct JobContext {
    /// The claimed job, `attempt_count` already incremented.
    pub job: Job,
}

impl JobContext {
    pub fn new(job: Job) -> Self {
        Self { job }
    }

    /// Task the job refers to.
    pub fn task_id(&self) -> Uuid {
        self.job.task_id
    }

    /// 1-based number of the current attempt.
    pub fn attempt(&self) -> i32 {
        self.job.attempt_count
    }
}

/// Result of job execution.
#[derive(Debug, PartialEq, Eq)]
pub enum JobResult {
    Success,
    /// The attempt failed; the worker decides whether to retry.
    Failed(String),
}

/// Trait for job handlers.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job kind this handler processes.
    fn kind(&self) -> JobKind;

    /// Execute one attempt of the job.
    async fn execute(&self, ctx: JobContext) -> JobResult;

    fn can_handle(&self, kind: JobKind) -> bool {
        self.kind() == kind
    }
}
