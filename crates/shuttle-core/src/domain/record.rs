//! Message record: the persisted state of one submitted unit of work.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::MessageId;
use super::state::MessageStatus;
use super::task_kind::TaskKind;

/// Task-specific string parameters, ordered by key.
pub type Properties = BTreeMap<String, String>;

/// Metadata for one unit of work.
///
/// Design:
/// - The record store holds the source of truth; broker payloads carry only
///   `id` + `task_kind`.
/// - `status` changes only through [`MessageRecord::apply`], which the store
///   calls after its compare-and-set check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub task_kind: TaskKind,
    pub status: MessageStatus,

    #[serde(default)]
    pub properties: Properties,

    /// Number of accepted retry requests so far.
    pub retry_count: u32,

    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,

    /// Not eligible for redelivery before this instant (WaitingRetry only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_until: Option<DateTime<Utc>>,

    /// Why the record ended in Error or Cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}

impl MessageRecord {
    pub fn new(
        id: MessageId,
        task_kind: TaskKind,
        properties: Properties,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_kind,
            status: MessageStatus::Created,
            properties,
            retry_count: 0,
            created_at: now,
            last_updated_at: now,
            delay_until: None,
            error_reason: None,
        }
    }

    /// Apply an already-validated transition.
    ///
    /// `delay_until` is overwritten unconditionally so it is cleared on every
    /// transition that does not set it.
    pub fn apply(&mut self, to: MessageStatus, update: StatusUpdate) {
        self.status = to;
        self.last_updated_at = update.at;
        self.delay_until = update.delay_until;
        if let Some(retry_count) = update.retry_count {
            self.retry_count = retry_count;
        }
        if let Some(reason) = update.error_reason {
            self.error_reason = Some(reason);
        }
        self.properties.extend(update.properties);
    }
}

/// Field changes that accompany a status transition.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub at: DateTime<Utc>,
    pub retry_count: Option<u32>,
    pub delay_until: Option<DateTime<Utc>>,
    pub error_reason: Option<String>,
    /// Appended to the record's properties (existing keys are overwritten).
    pub properties: Properties,
}

impl StatusUpdate {
    pub fn at(at: DateTime<Utc>) -> Self {
        Self {
            at,
            retry_count: None,
            delay_until: None,
            error_reason: None,
            properties: Properties::new(),
        }
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    pub fn with_delay_until(mut self, delay_until: DateTime<Utc>) -> Self {
        self.delay_until = Some(delay_until);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.error_reason = Some(reason.into());
        self
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties.extend(properties);
        self
    }
}
