//! Structured logging field names shared by all taskpulse crates.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), operation completions |
//! | DEBUG | Decision points, cache hits/misses, config choices |
//! | TRACE | Per-item iteration |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "api", "cache", "events", "db", "jobs", "mail"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "coordinator", "worker", "sweep", "relay", "pool"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "create", "invalidate", "claim_next", "send"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Task UUID being operated on.
pub const TASK_ID: &str = "task_id";

/// Owner (user) UUID the operation is scoped to.
pub const OWNER_ID: &str = "owner_id";

/// Job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Job kind enum variant.
pub const JOB_KIND: &str = "job_kind";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of rows returned by a query.
pub const RESULT_COUNT: &str = "result_count";

/// Attempt number of a job execution (1-based).
pub const ATTEMPT: &str = "attempt";

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_field_names_are_unique_snake_case() {
        let fields = [
            SUBSYSTEM,
            COMPONENT,
            OPERATION,
            TASK_ID,
            OWNER_ID,
            JOB_ID,
            JOB_KIND,
            DURATION_MS,
            RESULT_COUNT,
            ATTEMPT,
        ];
        let unique: HashSet<_> = fields.iter().collect();
        assert_eq!(unique.len(), fields.len());
        for field in fields {
            assert!(field
                .chars()
                .all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }
}
