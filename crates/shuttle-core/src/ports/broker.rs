//! BrokerGateway port - 配送キュー
//!
//! The broker moves opaque payload bytes between producers and consumers. The
//! payload carries only the record id and task kind (see
//! [`PayloadCodec`](crate::tasks::PayloadCodec)); full state lives in the
//! record store, so a redelivery never loses data.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::BrokerError;

/// Broker-assigned handle of one delivery, used for ack/nack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryTag(pub u64);

/// One message handed to a consumer. It stays unacknowledged until `ack` or
/// `nack` is called with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub queue: String,
    pub body: Vec<u8>,
    /// True if this payload was handed out before and not acknowledged.
    pub redelivered: bool,
}

/// Minimal publish/consume/acknowledge contract.
///
/// # Lifecycle
/// The queue manager calls `connect` on start and `disconnect` on shutdown;
/// after a transport error it calls `connect` again with backoff.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    async fn connect(&self) -> Result<(), BrokerError>;

    async fn disconnect(&self) -> Result<(), BrokerError>;

    async fn publish(&self, queue: &str, body: &[u8]) -> Result<(), BrokerError>;

    /// Wait up to `timeout` for the next delivery; `Ok(None)` on timeout.
    async fn consume(&self, queue: &str, timeout: Duration)
    -> Result<Option<Delivery>, BrokerError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// Return the delivery to the queue; it becomes visible again after
    /// `requeue_delay`.
    async fn nack(&self, delivery: &Delivery, requeue_delay: Duration) -> Result<(), BrokerError>;
}
