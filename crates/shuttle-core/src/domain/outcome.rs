//! Outcome model: what a handler reports back for one execution.
//!
//! Handler failures never cross the manager boundary as Rust errors; they are
//! always one of these three values.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Classification used in logs and status views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Done,
    Retry,
    Failed,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeKind::Done => f.write_str("DONE"),
            OutcomeKind::Retry => f.write_str("RETRY"),
            OutcomeKind::Failed => f.write_str("FAILED"),
        }
    }
}

/// Result of one handler execution.
///
/// - `Done`: work fully complete.
/// - `Retry`: transient failure or backpressure; try again after `after`.
/// - `Failed`: permanent failure; the record ends in Error with `reason`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    Done,
    Retry { after: Duration },
    Failed { reason: String },
}

impl HandlerOutcome {
    pub fn done() -> Self {
        HandlerOutcome::Done
    }

    pub fn retry(after: Duration) -> Self {
        HandlerOutcome::Retry { after }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        HandlerOutcome::Failed {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            HandlerOutcome::Done => OutcomeKind::Done,
            HandlerOutcome::Retry { .. } => OutcomeKind::Retry,
            HandlerOutcome::Failed { .. } => OutcomeKind::Failed,
        }
    }
}
