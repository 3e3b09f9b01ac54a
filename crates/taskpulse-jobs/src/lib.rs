//! # taskpulse-jobs
//!
//! Background mail jobs for taskpulse.
//!
//! This crate provides:
//! - A polling worker that runs jobs concurrently with bounded parallelism
//! - Fixed-delay retries up to a per-job bound
//! - Assignment and deadline-reminder email handlers
//! - Log and HTTP-relay mail transports
//! - The daily deadline sweep
//!
//! ## Example
//!
//! ```ignore
//! use taskpulse_jobs::{MailDeps, TaskAssignmentHandler, WorkerBuilder, WorkerConfig};
//!
//! let worker = WorkerBuilder::new(jobs.clone())
//!     .with_config(WorkerConfig::from_env())
//!     .with_handler(TaskAssignmentHandler::new(deps.clone()))
//!     .build();
//!
//! let handle = worker.start();
//! // ...
//! handle.shutdown().await?;
//! ```

pub mod handler;
pub mod mail;
pub mod mailer;
pub mod sweep;
pub mod worker;

// Re-export core types
pub use taskpulse_core::*;

pub use handler::{JobContext, JobHandler, JobResult};
pub use mail::{
    assignment_email, reminder_email, DeadlineReminderHandler, MailDeps, MailQueue,
    TaskAssignmentHandler,
};
pub use mailer::{HttpMailer, LogMailer, MailerConfig, MailerKind};
pub use sweep::{DeadlineSweep, SweepConfig};
pub use worker::{JobWorker, WorkerBuilder, WorkerConfig, WorkerEvent, WorkerHandle};

/// Default maximum retries for failed jobs.
pub const DEFAULT_MAX_RETRIES: i32 = taskpulse_core::defaults::JOB_MAX_RETRIES;

/// Default polling interval for job processing (milliseconds).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = taskpulse_core::defaults::JOB_POLL_INTERVAL_MS;
