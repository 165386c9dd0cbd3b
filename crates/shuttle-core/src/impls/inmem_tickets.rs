//! In-memory access ticket store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{AccessTicket, StoreError, TicketId};
use crate::ports::TicketStore;

#[derive(Default)]
pub struct InMemoryTicketStore {
    tickets: Mutex<BTreeMap<TicketId, AccessTicket>>,
    unavailable: AtomicBool,
}

impl InMemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every call fails with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("ticket store offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TicketStore for InMemoryTicketStore {
    async fn insert(&self, ticket: AccessTicket) -> Result<(), StoreError> {
        self.check_available()?;
        self.tickets.lock().await.insert(ticket.id, ticket);
        Ok(())
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<AccessTicket>, StoreError> {
        self.check_available()?;
        let tickets = self.tickets.lock().await;
        Ok(tickets
            .values()
            .filter(|t| t.is_expired(now))
            .cloned()
            .collect())
    }

    async fn delete_batch(&self, ids: &[TicketId]) -> Result<usize, StoreError> {
        self.check_available()?;
        // single lock: the batch is all-or-nothing with respect to readers
        let mut tickets = self.tickets.lock().await;
        Ok(ids.iter().filter(|id| tickets.remove(id).is_some()).count())
    }

    async fn list(&self) -> Result<Vec<AccessTicket>, StoreError> {
        self.check_available()?;
        Ok(self.tickets.lock().await.values().cloned().collect())
    }
}
