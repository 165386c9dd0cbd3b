//! Status transitions with bounded store retries.
//!
//! Every write the engine makes goes through [`StoreWriter`]. A write that
//! fails with a retryable store error is retried with backoff; when the
//! attempts run out the failure is logged at error level and the record is
//! left in its last durably known status.
//!
//! A retry that runs into `Conflict` or `AlreadyExists` is reported as such.
//! The store cannot tell a lost reply from a competing writer, so the write
//! is never assumed to be ours. A claim whose reply was lost leaves the record
//! PROCESSING with no worker; the startup recovery sweep requeues it once its
//! execution budget has passed.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::{MessageId, MessageRecord, MessageStatus, StatusUpdate, StoreError};
use crate::ports::MessageRecordStore;

use super::retry::BackoffPolicy;

#[derive(Clone)]
pub struct StoreWriter {
    store: Arc<dyn MessageRecordStore>,
    attempts: u32,
    backoff: BackoffPolicy,
}

impl StoreWriter {
    pub fn new(store: Arc<dyn MessageRecordStore>, attempts: u32, backoff: BackoffPolicy) -> Self {
        Self {
            store,
            attempts: attempts.max(1),
            backoff,
        }
    }

    pub fn store(&self) -> &Arc<dyn MessageRecordStore> {
        &self.store
    }

    pub async fn create(&self, record: MessageRecord) -> Result<(), StoreError> {
        let id = record.id;
        let mut attempt = 1;
        loop {
            match self.store.create(record.clone()).await {
                Ok(()) => return Ok(()),
                Err(e @ StoreError::AlreadyExists(_)) => return Err(e),
                Err(e) if e.is_retryable() && attempt < self.attempts => {
                    self.pause(id, attempt, &e).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        message_id = %id,
                        attempts = attempt,
                        error = %e,
                        "failed to create message record"
                    );
                    return Err(e);
                }
            }
        }
    }

    /// Compare-and-set `from -> to`.
    ///
    /// A `Conflict` is returned as-is without being logged as a failure: it
    /// means the record is no longer in `from`, on the first attempt or any
    /// retry.
    pub async fn transition(
        &self,
        id: MessageId,
        from: MessageStatus,
        to: MessageStatus,
        update: StatusUpdate,
    ) -> Result<MessageRecord, StoreError> {
        let mut attempt = 1;
        loop {
            match self.store.update_status(id, from, to, update.clone()).await {
                Ok(record) => {
                    tracing::debug!(message_id = %id, from = %from, to = %to, "status transition");
                    return Ok(record);
                }
                Err(e @ StoreError::Conflict { .. }) => return Err(e),
                Err(e) if e.is_retryable() && attempt < self.attempts => {
                    self.pause(id, attempt, &e).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        message_id = %id,
                        from = %from,
                        to = %to,
                        attempts = attempt,
                        error = %e,
                        "status transition failed; record left in its last durable state"
                    );
                    return Err(e);
                }
            }
        }
    }

    pub async fn delete(&self, id: MessageId) -> Result<bool, StoreError> {
        let mut attempt = 1;
        loop {
            match self.store.delete(id).await {
                Ok(deleted) => return Ok(deleted),
                Err(e) if e.is_retryable() && attempt < self.attempts => {
                    self.pause(id, attempt, &e).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(message_id = %id, error = %e, "failed to delete message record");
                    return Err(e);
                }
            }
        }
    }

    async fn pause(&self, id: MessageId, attempt: u32, error: &StoreError) {
        let delay: Duration = self.backoff.delay_for(attempt);
        tracing::warn!(
            message_id = %id,
            attempt,
            retry_in_ms = delay.as_millis() as u64,
            error = %error,
            "store write failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
