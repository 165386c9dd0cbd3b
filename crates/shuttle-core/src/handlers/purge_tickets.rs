//! PURGE_EXPIRED_TICKETS - 期限切れ access ticket の一括削除
//!
//! The scan and the delete form one batch. Any ticket store failure turns
//! into `Retry` for the whole batch; there is no partially purged state.
//!
//! On shutdown the handler also answers `Retry` before touching the store.
//! The worker puts such a record back in QUEUED without counting a retry, so
//! a restart does not use up the purge's retry limit.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{HandlerOutcome, TicketId};
use crate::ports::{Clock, TicketStore};
use crate::tasks::{TaskContext, TaskHandler};

/// Progress key holding the number of deleted tickets.
pub const DELETED_TICKETS: &str = "deleted_tickets";

const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(30);

pub struct PurgeExpiredTicketsHandler {
    tickets: Arc<dyn TicketStore>,
    clock: Arc<dyn Clock>,
    retry_delay: Duration,
}

impl PurgeExpiredTicketsHandler {
    pub fn new(tickets: Arc<dyn TicketStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            tickets,
            clock,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }
}

#[async_trait]
impl TaskHandler for PurgeExpiredTicketsHandler {
    async fn execute(&self, ctx: &TaskContext) -> HandlerOutcome {
        if ctx.is_cancelled() {
            return HandlerOutcome::retry(self.retry_delay);
        }

        let expired = match self.tickets.list_expired(self.clock.now()).await {
            Ok(expired) => expired,
            Err(e) => {
                tracing::warn!(message_id = %ctx.id(), error = %e, "listing expired tickets failed");
                return HandlerOutcome::retry(self.retry_delay);
            }
        };

        if ctx.is_cancelled() {
            return HandlerOutcome::retry(self.retry_delay);
        }

        let ids: Vec<TicketId> = expired.iter().map(|ticket| ticket.id).collect();
        let deleted = match self.tickets.delete_batch(&ids).await {
            Ok(deleted) => deleted,
            Err(e) => {
                tracing::warn!(message_id = %ctx.id(), error = %e, "deleting expired tickets failed");
                return HandlerOutcome::retry(self.retry_delay);
            }
        };

        ctx.record_progress(DELETED_TICKETS, deleted);
        tracing::info!(message_id = %ctx.id(), deleted, "expired tickets purged");
        HandlerOutcome::done()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccessTicket, MessageId, MessageRecord, Properties, TaskKind};
    use crate::impls::InMemoryTicketStore;
    use crate::ports::ManualClock;
    use chrono::{DateTime, TimeZone, Utc};
    use tokio::sync::watch;
    use ulid::Ulid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn context(shutdown: watch::Receiver<bool>) -> TaskContext {
        let record = MessageRecord::new(
            MessageId::from_ulid(Ulid::new()),
            TaskKind::PurgeExpiredTickets,
            Properties::new(),
            now(),
        );
        TaskContext::new(record, shutdown)
    }

    async fn seeded() -> (Arc<InMemoryTicketStore>, TicketId) {
        let store = Arc::new(InMemoryTicketStore::new());
        let valid = AccessTicket::new(
            TicketId::from_ulid(Ulid::new()),
            "PPN-valid",
            now() + chrono::Duration::hours(1),
        );
        let valid_id = valid.id;
        store.insert(valid).await.unwrap();
        store
            .insert(AccessTicket::new(
                TicketId::from_ulid(Ulid::new()),
                "PPN-expired",
                now() - chrono::Duration::hours(1),
            ))
            .await
            .unwrap();
        (store, valid_id)
    }

    #[tokio::test]
    async fn deletes_only_expired_tickets() {
        let (store, valid_id) = seeded().await;
        let handler = PurgeExpiredTicketsHandler::new(store.clone(), Arc::new(ManualClock::new(now())));
        let (_tx, rx) = watch::channel(false);
        let ctx = context(rx);

        assert_eq!(handler.execute(&ctx).await, HandlerOutcome::Done);

        let remaining = store.list().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, valid_id);
        assert_eq!(ctx.progress().get(DELETED_TICKETS).map(String::as_str), Some("1"));
    }

    #[tokio::test]
    async fn store_outage_retries_the_whole_batch() {
        let (store, _) = seeded().await;
        store.set_unavailable(true);
        let handler = PurgeExpiredTicketsHandler::new(store.clone(), Arc::new(ManualClock::new(now())))
            .with_retry_delay(Duration::from_secs(5));
        let (_tx, rx) = watch::channel(false);
        let ctx = context(rx);

        assert_eq!(
            handler.execute(&ctx).await,
            HandlerOutcome::retry(Duration::from_secs(5))
        );
        assert!(ctx.progress().is_empty());

        store.set_unavailable(false);
        assert_eq!(store.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn shutdown_defers_the_purge() {
        let (store, _) = seeded().await;
        let handler = PurgeExpiredTicketsHandler::new(store.clone(), Arc::new(ManualClock::new(now())));
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let ctx = context(rx);

        assert_eq!(handler.execute(&ctx).await, HandlerOutcome::retry(DEFAULT_RETRY_DELAY));
        assert_eq!(store.list().await.unwrap().len(), 2);
    }
}
