//! Per task-kind execution policy.

use std::time::Duration;

use crate::domain::TaskKind;

use super::retry::BackoffPolicy;

/// Limits and retry behaviour applied to every record of one task kind.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskPolicy {
    /// Handlers of this kind running at the same time, across all workers.
    pub concurrency: usize,

    /// Watchdog budget for one handler execution.
    pub execution_budget: Duration,

    /// Accepted `Retry` outcomes before the record goes to Error.
    pub max_retries: u32,

    pub backoff: BackoffPolicy,

    /// Treat an exceeded budget as `Retry` instead of a permanent failure.
    pub retry_on_timeout: bool,
}

impl TaskPolicy {
    /// Built-in defaults for `kind`.
    ///
    /// The ticket purge is a single-flight sweep with a fixed retry delay.
    pub fn for_kind(kind: TaskKind) -> Self {
        match kind {
            TaskKind::PurgeExpiredTickets => Self {
                concurrency: 1,
                backoff: BackoffPolicy::fixed(Duration::from_secs(30)),
                ..Self::default()
            },
            _ => Self::default(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency == 0 {
            return Err("concurrency must be at least 1".to_string());
        }
        if self.execution_budget.is_zero() {
            return Err("execution budget must be positive".to_string());
        }
        self.backoff.validate()
    }
}

impl Default for TaskPolicy {
    fn default() -> Self {
        Self {
            concurrency: 4,
            execution_budget: Duration::from_secs(300),
            max_retries: 5,
            backoff: BackoffPolicy::default(),
            retry_on_timeout: false,
        }
    }
}
