//! Job worker and runner for processing mail jobs.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use taskpulse_core::defaults::{
    EVENT_BUS_CAPACITY, JOB_BOOKKEEPING_ATTEMPTS, JOB_LEASE_SECS, JOB_MAX_CONCURRENT,
    JOB_RETRY_DELAY_SECS, JOB_TIMEOUT_SECS,
};
use taskpulse_core::{Error, FailOutcome, Job, JobKind, JobRepository, Result};

use crate::handler::{JobContext, JobHandler, JobResult};
use crate::DEFAULT_POLL_INTERVAL_MS;

/// Base pause between attempts at recording a job outcome.
const BOOKKEEPING_BACKOFF: Duration = Duration::from_millis(100);

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum number of concurrent jobs.
    pub max_concurrent_jobs: usize,
    /// Whether to enable job processing.
    pub enabled: bool,
    /// Delay between a failed attempt and the next one.
    pub retry_delay: Duration,
    /// Upper bound on a single attempt.
    pub job_timeout: Duration,
    /// How long a claim reserves a job before another worker may take it.
    pub lease: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_concurrent_jobs: JOB_MAX_CONCURRENT,
            enabled: true,
            retry_delay: Duration::from_secs(JOB_RETRY_DELAY_SECS),
            job_timeout: Duration::from_secs(JOB_TIMEOUT_SECS),
            lease: Duration::from_secs(JOB_LEASE_SECS),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `JOB_MAX_CONCURRENT` | `4` | Max concurrent jobs |
    /// | `JOB_POLL_INTERVAL_MS` | `500` | Polling interval when queue is empty |
    /// | `JOB_RETRY_DELAY_SECS` | `30` | Delay before a failed job is retried |
    /// | `JOB_TIMEOUT_SECS` | `60` | Per-attempt timeout |
    /// | `JOB_LEASE_SECS` | `120` | Claim lease, raised to at least the timeout |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let enabled = std::env::var("JOB_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent_jobs = env_parse("JOB_MAX_CONCURRENT")
            .unwrap_or(defaults.max_concurrent_jobs)
            .max(1);

        let poll_interval_ms =
            env_parse("JOB_POLL_INTERVAL_MS").unwrap_or(defaults.poll_interval_ms);

        let retry_delay = env_parse("JOB_RETRY_DELAY_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.retry_delay);

        let job_timeout = env_parse("JOB_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.job_timeout);

        // A lease shorter than an attempt would hand live jobs to other workers.
        let lease = env_parse("JOB_LEASE_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.lease)
            .max(job_timeout);

        Self {
            poll_interval_ms,
            max_concurrent_jobs,
            enabled,
            retry_delay,
            job_timeout,
            lease,
        }
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Event emitted by the job worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    WorkerStarted,
    JobStarted {
        job_id: Uuid,
        kind: JobKind,
        attempt: i32,
    },
    JobCompleted {
        job_id: Uuid,
        kind: JobKind,
    },
    /// The attempt failed and the job will run again at `run_at`.
    JobRescheduled {
        job_id: Uuid,
        kind: JobKind,
        error: String,
        run_at: DateTime<Utc>,
    },
    /// The attempt failed and no retries remain.
    JobExhausted {
        job_id: Uuid,
        kind: JobKind,
        error: String,
    },
    WorkerStopped,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the worker to stop and wait for in-flight jobs to finish.
    pub async fn shutdown(self) -> Result<()> {
        // The loop may already have exited (disabled worker), so a closed
        // channel is not an error.
        let _ = self.shutdown_tx.send(()).await;
        self.join
            .await
            .map_err(|e| Error::Internal(format!("Job worker task failed: {}", e)))
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

type HandlerMap = Arc<HashMap<JobKind, Arc<dyn JobHandler>>>;

/// Job worker that processes jobs from the queue.
pub struct JobWorker {
    jobs: Arc<dyn JobRepository>,
    config: WorkerConfig,
    handlers: HandlerMap,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl JobWorker {
    fn new(
        jobs: Arc<dyn JobRepository>,
        config: WorkerConfig,
        handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            jobs,
            config,
            handlers: Arc::new(handlers),
            event_tx,
        }
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        let join = tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
            join,
        }
    }

    /// Claims up to `max_concurrent_jobs` at a time and processes them
    /// concurrently. Only sleeps when nothing is runnable.
    #[instrument(skip(self, shutdown_rx), fields(subsystem = "jobs", component = "worker"))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Job worker is disabled, not starting");
            return;
        }

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            max_concurrent = self.config.max_concurrent_jobs,
            retry_delay_secs = self.config.retry_delay.as_secs(),
            handlers = self.handlers.len(),
            "Job worker started"
        );

        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let max_concurrent = self.config.max_concurrent_jobs;

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!("Job worker received shutdown signal");
                break;
            }

            let mut claimed = 0;
            let mut tasks = tokio::task::JoinSet::new();

            for _ in 0..max_concurrent {
                match self.claim_job().await {
                    Some(job) => {
                        claimed += 1;
                        let worker = self.clone_refs();
                        tasks.spawn(async move {
                            worker.execute_job(job).await;
                        });
                    }
                    None => break,
                }
            }

            if claimed == 0 {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Job worker received shutdown signal");
                        break;
                    }
                    _ = sleep(poll_interval) => {}
                }
            } else {
                debug!(claimed, "Processing concurrent job batch");
                while let Some(result) = tasks.join_next().await {
                    if let Err(e) = result {
                        error!(error = ?e, "Job task panicked");
                    }
                }
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Job worker stopped");
    }

    /// Process runnable jobs one at a time until none is ready.
    ///
    /// Returns the number of attempts made. Used by tests and one-shot tools.
    pub async fn drain(&self) -> usize {
        let mut attempts = 0;
        while let Some(job) = self.claim_job().await {
            self.clone_refs().execute_job(job).await;
            attempts += 1;
        }
        attempts
    }

    async fn claim_job(&self) -> Option<Job> {
        match self.jobs.claim_next(Utc::now(), self.config.lease).await {
            Ok(job) => job,
            Err(e) => {
                error!(subsystem = "jobs", error = %e, "Failed to claim job");
                None
            }
        }
    }

    fn clone_refs(&self) -> JobWorkerRef {
        JobWorkerRef {
            jobs: self.jobs.clone(),
            handlers: self.handlers.clone(),
            event_tx: self.event_tx.clone(),
            retry_delay: self.config.retry_delay,
            job_timeout: self.config.job_timeout,
        }
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    pub async fn pending_count(&self) -> Result<i64> {
        self.jobs.pending_count().await
    }
}

/// Owned reference bundle for executing a single job in a spawned task.
struct JobWorkerRef {
    jobs: Arc<dyn JobRepository>,
    handlers: HandlerMap,
    event_tx: broadcast::Sender<WorkerEvent>,
    retry_delay: Duration,
    job_timeout: Duration,
}

impl JobWorkerRef {
    async fn execute_job(self, job: Job) {
        let start = Instant::now();
        let job_id = job.id;
        let kind = job.kind;
        let attempt = job.attempt_count;

        info!(
            subsystem = "jobs",
            %job_id,
            job_kind = %kind,
            task_id = %job.task_id,
            attempt,
            "Processing job"
        );

        let _ = self.event_tx.send(WorkerEvent::JobStarted {
            job_id,
            kind,
            attempt,
        });

        let result = if job.over_budget() {
            warn!(
                subsystem = "jobs",
                %job_id,
                job_kind = %kind,
                attempt,
                "Reclaimed job has no attempts left"
            );
            JobResult::Failed("Lease expired after the final attempt".to_string())
        } else {
            match self.handlers.get(&kind).cloned() {
                Some(handler) => {
                    let ctx = JobContext::new(job);
                    match tokio::time::timeout(self.job_timeout, handler.execute(ctx)).await {
                        Ok(result) => result,
                        Err(_) => JobResult::Failed(format!(
                            "Job exceeded timeout of {}s",
                            self.job_timeout.as_secs()
                        )),
                    }
                }
                None => {
                    warn!(subsystem = "jobs", job_kind = %kind, "No handler registered for job kind");
                    JobResult::Failed(format!("No handler for job kind: {}", kind))
                }
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            JobResult::Success => {
                let completed =
                    record_outcome("complete", job_id, || self.jobs.complete(job_id)).await;
                if let Err(e) = completed {
                    error!(
                        subsystem = "jobs",
                        error = %e,
                        %job_id,
                        "Failed to mark job as completed, it will be retried once its lease lapses"
                    );
                    return;
                }
                info!(
                    subsystem = "jobs",
                    %job_id,
                    job_kind = %kind,
                    attempt,
                    duration_ms,
                    "Job completed successfully"
                );
                let _ = self
                    .event_tx
                    .send(WorkerEvent::JobCompleted { job_id, kind });
            }
            JobResult::Failed(error) => {
                let outcome = record_outcome("fail", job_id, || {
                    self.jobs.fail(job_id, &error, self.retry_delay)
                })
                .await;
                match outcome {
                    Ok(FailOutcome::Rescheduled { run_at }) => {
                        warn!(
                            subsystem = "jobs",
                            %job_id,
                            job_kind = %kind,
                            attempt,
                            %error,
                            %run_at,
                            duration_ms,
                            "Job failed, retry scheduled"
                        );
                        let _ = self.event_tx.send(WorkerEvent::JobRescheduled {
                            job_id,
                            kind,
                            error,
                            run_at,
                        });
                    }
                    Ok(FailOutcome::Exhausted) => {
                        error!(
                            subsystem = "jobs",
                            %job_id,
                            job_kind = %kind,
                            attempt,
                            %error,
                            "Max retries exceeded, job dropped"
                        );
                        let _ = self.event_tx.send(WorkerEvent::JobExhausted {
                            job_id,
                            kind,
                            error,
                        });
                    }
                    Err(e) => {
                        error!(
                            subsystem = "jobs",
                            error = %e,
                            %job_id,
                            "Failed to mark job as failed, it will be retried once its lease lapses"
                        );
                    }
                }
            }
        }
    }
}

/// Run a queue bookkeeping call, retrying transient failures with a short
/// linear backoff.
async fn record_outcome<T, F, Fut>(op: &'static str, job_id: Uuid, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < JOB_BOOKKEEPING_ATTEMPTS => {
                warn!(subsystem = "jobs", op, %job_id, attempt, error = %e, "Job bookkeeping failed, retrying");
                sleep(BOOKKEEPING_BACKOFF * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Builder for creating a job worker with handlers.
pub struct WorkerBuilder {
    jobs: Arc<dyn JobRepository>,
    config: WorkerConfig,
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
}

impl WorkerBuilder {
    pub fn new(jobs: Arc<dyn JobRepository>) -> Self {
        Self {
            jobs,
            config: WorkerConfig::default(),
            handlers: HashMap::new(),
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a handler, replacing any previous one for the same kind.
    pub fn with_handler<H: JobHandler + 'static>(mut self, handler: H) -> Self {
        let kind = handler.kind();
        debug!(subsystem = "jobs", job_kind = %kind, "Registered job handler");
        self.handlers.insert(kind, Arc::new(handler));
        self
    }

    pub fn build(self) -> JobWorker {
        JobWorker::new(self.jobs, self.config, self.handlers)
    }
}
