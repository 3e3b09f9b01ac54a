//! Daily deadline sweep.
//!
//! Once a day at the configured UTC hour, every task due within the next
//! window gets its own `deadline_reminder` job, so each reminder retries
//! independently of the others.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use taskpulse_core::defaults::{DEADLINE_SWEEP_HOUR_UTC, DEADLINE_WINDOW_HOURS};
use taskpulse_core::{Result, TaskRepository};

use crate::mail::MailQueue;

/// Sweep configuration.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub enabled: bool,
    /// Hour of day (UTC) at which the sweep runs.
    pub hour_utc: u32,
    /// Look-ahead window.
    pub window: ChronoDuration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hour_utc: DEADLINE_SWEEP_HOUR_UTC,
            window: ChronoDuration::hours(DEADLINE_WINDOW_HOURS),
        }
    }
}

impl SweepConfig {
    /// Load from `DEADLINE_SWEEP_ENABLED` and `DEADLINE_SWEEP_HOUR_UTC`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let enabled = std::env::var("DEADLINE_SWEEP_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(defaults.enabled);
        let hour_utc = std::env::var("DEADLINE_SWEEP_HOUR_UTC")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|h| *h < 24)
            .unwrap_or(defaults.hour_utc);
        Self {
            enabled,
            hour_utc,
            ..defaults
        }
    }
}

/// Finds tasks due soon and queues one reminder job per task.
#[derive(Clone)]
pub struct DeadlineSweep {
    tasks: Arc<dyn TaskRepository>,
    queue: MailQueue,
    config: SweepConfig,
}

impl DeadlineSweep {
    pub fn new(tasks: Arc<dyn TaskRepository>, queue: MailQueue, config: SweepConfig) -> Self {
        Self {
            tasks,
            queue,
            config,
        }
    }

    /// Queue reminders for tasks with `now < due_date <= now + window`.
    ///
    /// Returns how many jobs were queued.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<usize> {
        let due = self.tasks.due_between(now, now + self.config.window).await?;
        let mut queued = 0;
        for task in &due {
            if self.queue.enqueue_reminder(task.id).await.is_some() {
                queued += 1;
            }
        }
        info!(
            subsystem = "jobs",
            component = "sweep",
            op = "run",
            result_count = due.len(),
            queued,
            "Deadline sweep finished"
        );
        Ok(queued)
    }

    /// The first scheduled run strictly after `now`.
    pub fn next_run_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let at = NaiveTime::from_hms_opt(self.config.hour_utc, 0, 0).unwrap_or(NaiveTime::MIN);
        let today = now.date_naive().and_time(at).and_utc();
        if today > now {
            today
        } else {
            today + ChronoDuration::days(1)
        }
    }

    /// Run on schedule until `shutdown` flips to `true` or its sender is dropped.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            if !self.config.enabled {
                info!(subsystem = "jobs", component = "sweep", "Deadline sweep disabled");
                return;
            }
            loop {
                let now = Utc::now();
                let next = self.next_run_after(now);
                let wait = (next - now).to_std().unwrap_or_default();
                debug!(subsystem = "jobs", component = "sweep", %next, "Next deadline sweep scheduled");

                tokio::select! {
                    _ = tokio::time::sleep(wait) => {
                        if let Err(e) = self.run_once(Utc::now()).await {
                            error!(subsystem = "jobs", component = "sweep", error = %e, "Deadline sweep failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!(subsystem = "jobs", component = "sweep", "Deadline sweep stopped");
                            break;
                        }
                    }
                }
            }
        })
    }
}
