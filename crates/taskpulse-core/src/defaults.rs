//! Centralized default constants for taskpulse.
//!
//! **This module is the single source of truth** for shared default values.
//! Configuration loaders in the api and jobs crates fall back to these when
//! the corresponding environment variable is absent or unparsable.

// =============================================================================
// TASKS
// =============================================================================

/// Maximum length of a task title in characters.
pub const TASK_TITLE_MAX_LEN: usize = 200;

// =============================================================================
// DATABASE
// =============================================================================

/// Connections held by the PostgreSQL pool.
pub const DB_MAX_CONNECTIONS: u32 = 10;

/// Seconds to wait for a free pool connection.
pub const DB_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Seconds an idle pool connection is kept open.
pub const DB_IDLE_TIMEOUT_SECS: u64 = 600;

// =============================================================================
// CACHE
// =============================================================================

/// Time-to-live of a cached per-owner task list, in seconds.
pub const TASK_LIST_CACHE_TTL_SECS: u64 = 60;

/// Key prefix for task-list entries in Redis.
pub const TASK_LIST_CACHE_PREFIX: &str = "tp:tasks:";

/// Default Redis URL.
pub const REDIS_URL: &str = "redis://localhost:6379";

// =============================================================================
// EVENTS
// =============================================================================

/// Default per-topic broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Redis pub/sub channel carrying envelopes between processes.
pub const EVENT_RELAY_CHANNEL: &str = "tp:events";

/// WebSocket keepalive ping interval in seconds.
pub const WS_PING_INTERVAL_SECS: u64 = 30;

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 3000;

/// Default CORS max-age in seconds (1 hour).
pub const CORS_MAX_AGE_SECS: u64 = 3600;

// =============================================================================
// JOB PROCESSING
// =============================================================================

/// Additional attempts after the first failure before a job is dropped.
pub const JOB_MAX_RETRIES: i32 = 3;

/// Fixed delay between a failed attempt and the next one, in seconds.
pub const JOB_RETRY_DELAY_SECS: u64 = 30;

/// Worker poll interval when the queue is empty, in milliseconds.
pub const JOB_POLL_INTERVAL_MS: u64 = 500;

/// Default maximum concurrent jobs per worker.
pub const JOB_MAX_CONCURRENT: usize = 4;

/// Default job execution timeout in seconds.
pub const JOB_TIMEOUT_SECS: u64 = 60;

/// How long a claimed job stays reserved for its worker, in seconds.
///
/// A running job whose lease has lapsed is claimable again. Must exceed
/// [`JOB_TIMEOUT_SECS`].
pub const JOB_LEASE_SECS: u64 = 120;

/// Attempts at recording a job outcome before leaving it to lease expiry.
pub const JOB_BOOKKEEPING_ATTEMPTS: u32 = 3;

/// Finished jobs kept by the in-memory queue before the oldest are dropped.
pub const MEMORY_FINISHED_JOB_RETENTION: usize = 1000;

// =============================================================================
// MAIL
// =============================================================================

/// Sender address used when `MAIL_FROM` is not set.
pub const MAIL_FROM: &str = "noreply@taskpulse.local";

/// Mail relay HTTP request timeout in seconds.
pub const MAIL_RELAY_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// DEADLINE SWEEP
// =============================================================================

/// Look-ahead window of the deadline sweep, in hours.
pub const DEADLINE_WINDOW_HOURS: i64 = 24;

/// Hour of day (UTC) at which the daily deadline sweep runs.
pub const DEADLINE_SWEEP_HOUR_UTC: u32 = 0;
