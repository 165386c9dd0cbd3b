//! In-memory message record store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{MessageId, MessageRecord, MessageStatus, StatusUpdate, StoreError};
use crate::ports::MessageRecordStore;

#[derive(Default)]
struct StoreState {
    records: HashMap<MessageId, MessageRecord>,

    /// Every status each record has been in, in order.
    history: HashMap<MessageId, Vec<MessageStatus>>,
}

/// Store used by tests and the demo binary.
///
/// The whole compare-and-set happens under one lock, so it is atomic per id.
/// `fail_next_writes` injects `Unavailable` errors to exercise the engine's
/// store retry path.
#[derive(Default)]
pub struct InMemoryRecordStore {
    state: Mutex<StoreState>,
    failing_writes: AtomicU32,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` write calls (`create`, `update_status`, `delete`) fail.
    pub fn fail_next_writes(&self, n: u32) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Statuses a record has passed through, starting with Created.
    pub async fn status_history(&self, id: MessageId) -> Vec<MessageStatus> {
        let state = self.state.lock().await;
        state.history.get(&id).cloned().unwrap_or_default()
    }

    /// Insert a record as-is, bypassing the transition rules. Used to seed
    /// state left behind by a crashed process.
    pub async fn insert_raw(&self, record: MessageRecord) {
        let mut state = self.state.lock().await;
        state.history.insert(record.id, vec![record.status]);
        state.records.insert(record.id, record);
    }

    fn injected_failure(&self) -> Result<(), StoreError> {
        let consumed = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match consumed {
            Ok(_) => Err(StoreError::Unavailable("injected write failure".to_string())),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl MessageRecordStore for InMemoryRecordStore {
    async fn create(&self, record: MessageRecord) -> Result<(), StoreError> {
        self.injected_failure()?;
        let mut state = self.state.lock().await;
        if state.records.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id));
        }
        state.history.insert(record.id, vec![record.status]);
        state.records.insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: MessageId) -> Result<Option<MessageRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.records.get(&id).cloned())
    }

    async fn update_status(
        &self,
        id: MessageId,
        expected: MessageStatus,
        new_status: MessageStatus,
        update: StatusUpdate,
    ) -> Result<MessageRecord, StoreError> {
        self.injected_failure()?;
        let mut state = self.state.lock().await;
        let record = state.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if record.status != expected {
            return Err(StoreError::Conflict {
                id,
                expected,
                actual: record.status,
            });
        }
        if !record.status.can_transition_to(new_status) {
            return Err(StoreError::InvalidTransition {
                id,
                from: record.status,
                to: new_status,
            });
        }

        record.apply(new_status, update);
        let updated = record.clone();
        state.history.entry(id).or_default().push(new_status);
        Ok(updated)
    }

    async fn list_by_status(
        &self,
        status: MessageStatus,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let state = self.state.lock().await;
        let mut matching: Vec<MessageRecord> = state
            .records
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        matching.sort_by_key(|r| (r.last_updated_at, r.id));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn list_due_retries(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let state = self.state.lock().await;
        let mut due: Vec<MessageRecord> = state
            .records
            .values()
            .filter(|r| r.status == MessageStatus::WaitingRetry)
            .filter(|r| r.delay_until.is_none_or(|at| at <= now))
            .cloned()
            .collect();
        due.sort_by_key(|r| (r.delay_until, r.id));
        due.truncate(limit);
        Ok(due)
    }

    async fn delete(&self, id: MessageId) -> Result<bool, StoreError> {
        self.injected_failure()?;
        let mut state = self.state.lock().await;
        state.history.remove(&id);
        Ok(state.records.remove(&id).is_some())
    }

    async fn counts_by_status(&self) -> Result<Vec<(MessageStatus, usize)>, StoreError> {
        let state = self.state.lock().await;
        let counts = MessageStatus::ALL
            .into_iter()
            .map(|status| {
                let n = state.records.values().filter(|r| r.status == status).count();
                (status, n)
            })
            .collect();
        Ok(counts)
    }
}
