//! MessageRecordStore port - the source of truth for message records.
//!
//! The relational persistence layer implements this outside the core; the
//! in-memory implementation lives in `impls`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{MessageId, MessageRecord, MessageStatus, StatusUpdate, StoreError};

/// Persistence of message records.
///
/// # Concurrency guard
/// `update_status` is a single-record compare-and-set: it applies only if the
/// record is still in `expected`, and fails with [`StoreError::Conflict`]
/// otherwise. Implementations must also reject transitions that
/// [`MessageStatus::can_transition_to`] forbids. Every status change in the
/// engine goes through this call, which is what serializes a record's
/// lifecycle across workers.
#[async_trait]
pub trait MessageRecordStore: Send + Sync {
    /// Insert a new record. Fails with `AlreadyExists` if the id is taken.
    async fn create(&self, record: MessageRecord) -> Result<(), StoreError>;

    async fn get(&self, id: MessageId) -> Result<Option<MessageRecord>, StoreError>;

    /// Compare-and-set transition; returns the updated record.
    async fn update_status(
        &self,
        id: MessageId,
        expected: MessageStatus,
        new_status: MessageStatus,
        update: StatusUpdate,
    ) -> Result<MessageRecord, StoreError>;

    /// Records in `status`, oldest `last_updated_at` first, at most `limit`.
    async fn list_by_status(
        &self,
        status: MessageStatus,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, StoreError>;

    /// WAITING_RETRY records whose `delay_until` is at or before `now`,
    /// earliest `delay_until` first, at most `limit`.
    ///
    /// Records still waiting out their delay are never returned, so they
    /// cannot crowd due records out of a batch.
    async fn list_due_retries(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, StoreError>;

    /// Remove a record. Returns whether it existed.
    async fn delete(&self, id: MessageId) -> Result<bool, StoreError>;

    /// Number of records per status.
    async fn counts_by_status(&self) -> Result<Vec<(MessageStatus, usize)>, StoreError>;
}
