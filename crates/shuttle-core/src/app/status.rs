//! Status - ステータスクエリ
//!
//! Read-only views handed to operators: a per-record snapshot and per-status
//! counts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{MessageId, MessageRecord, MessageStatus, Properties, TaskKind};

/// Point-in-time view of one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub id: MessageId,
    pub task_kind: TaskKind,
    pub status: MessageStatus,
    pub properties: Properties,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_until: Option<DateTime<Utc>>,
}

impl StatusSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl From<MessageRecord> for StatusSnapshot {
    fn from(record: MessageRecord) -> Self {
        Self {
            id: record.id,
            task_kind: record.task_kind,
            status: record.status,
            properties: record.properties,
            retry_count: record.retry_count,
            error_reason: record.error_reason,
            created_at: record.created_at,
            last_updated_at: record.last_updated_at,
            delay_until: record.delay_until,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub created: usize,
    pub queued: usize,
    pub processing: usize,
    pub waiting_retry: usize,
    pub finished: usize,
    pub error: usize,
    pub cancelled: usize,
}

impl QueueCounts {
    pub fn from_pairs(pairs: impl IntoIterator<Item = (MessageStatus, usize)>) -> Self {
        let mut counts = Self::default();
        for (status, n) in pairs {
            *counts.slot(status) += n;
        }
        counts
    }

    pub fn get(&self, status: MessageStatus) -> usize {
        match status {
            MessageStatus::Created => self.created,
            MessageStatus::Queued => self.queued,
            MessageStatus::Processing => self.processing,
            MessageStatus::WaitingRetry => self.waiting_retry,
            MessageStatus::Finished => self.finished,
            MessageStatus::Error => self.error,
            MessageStatus::Cancelled => self.cancelled,
        }
    }

    /// Records that have not reached a terminal status yet.
    pub fn active(&self) -> usize {
        self.created + self.queued + self.processing + self.waiting_retry
    }

    pub fn total(&self) -> usize {
        self.active() + self.finished + self.error + self.cancelled
    }

    fn slot(&mut self, status: MessageStatus) -> &mut usize {
        match status {
            MessageStatus::Created => &mut self.created,
            MessageStatus::Queued => &mut self.queued,
            MessageStatus::Processing => &mut self.processing,
            MessageStatus::WaitingRetry => &mut self.waiting_retry,
            MessageStatus::Finished => &mut self.finished,
            MessageStatus::Error => &mut self.error,
            MessageStatus::Cancelled => &mut self.cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_from_pairs() {
        let counts = QueueCounts::from_pairs([
            (MessageStatus::Queued, 3),
            (MessageStatus::Finished, 2),
            (MessageStatus::Error, 1),
        ]);

        assert_eq!(counts.get(MessageStatus::Queued), 3);
        assert_eq!(counts.active(), 3);
        assert_eq!(counts.total(), 6);
    }
}
