//! TicketStore port - access tickets consumed by the purge task.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{AccessTicket, StoreError, TicketId};

#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn insert(&self, ticket: AccessTicket) -> Result<(), StoreError>;

    /// Tickets whose `expires_at` is at or before `now`.
    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<AccessTicket>, StoreError>;

    /// Delete all given tickets in one batch: either every id is removed or
    /// none is. Returns the number of tickets deleted.
    async fn delete_batch(&self, ids: &[TicketId]) -> Result<usize, StoreError>;

    async fn list(&self) -> Result<Vec<AccessTicket>, StoreError>;
}
