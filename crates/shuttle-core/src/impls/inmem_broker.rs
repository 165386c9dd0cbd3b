//! InMemoryBroker - 開発・テスト用のブローカー
//!
//! Named queues of opaque payloads with ack/nack, delayed requeue, and
//! simulated connection loss. Unacknowledged deliveries are requeued (flagged
//! `redelivered`) when the connection drops, like an AMQP channel closing.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::domain::BrokerError;
use crate::ports::{BrokerGateway, Delivery, DeliveryTag};

#[derive(Debug, Clone)]
struct Pending {
    body: Vec<u8>,
    redelivered: bool,
}

/// Nacked payload waiting for its requeue delay.
///
/// Reverse ordering so `BinaryHeap` acts as a min-heap (earliest first).
#[derive(Debug)]
struct Delayed {
    ready_at: Instant,
    seq: u64,
    queue: String,
    pending: Pending,
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl Eq for Delayed {}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct BrokerState {
    queues: HashMap<String, VecDeque<Pending>>,
    delayed: BinaryHeap<Delayed>,
    unacked: HashMap<DeliveryTag, (String, Pending)>,
    next_tag: u64,
    next_seq: u64,
    connected: bool,
    /// Simulated network: `connect` fails while this is false.
    reachable: bool,
    published: usize,
}

impl BrokerState {
    fn new() -> Self {
        Self {
            queues: HashMap::new(),
            delayed: BinaryHeap::new(),
            unacked: HashMap::new(),
            next_tag: 1,
            next_seq: 0,
            connected: false,
            reachable: true,
            published: 0,
        }
    }

    fn ensure_connected(&self) -> Result<(), BrokerError> {
        if self.connected {
            Ok(())
        } else {
            Err(BrokerError::Disconnected)
        }
    }

    /// Move delayed payloads whose time has come back to their queues.
    fn promote_due(&mut self, now: Instant) {
        while let Some(entry) = self.delayed.peek() {
            if entry.ready_at > now {
                break;
            }
            let Some(entry) = self.delayed.pop() else {
                break;
            };
            self.queues
                .entry(entry.queue)
                .or_default()
                .push_back(entry.pending);
        }
    }

    fn requeue_unacked(&mut self) {
        let mut unacked: Vec<_> = self.unacked.drain().collect();
        // oldest tag first so original order is kept at the front
        unacked.sort_by_key(|(tag, _)| std::cmp::Reverse(*tag));
        for (_, (queue, mut pending)) in unacked {
            pending.redelivered = true;
            self.queues.entry(queue).or_default().push_front(pending);
        }
    }

    fn schedule(&mut self, queue: String, pending: Pending, delay: Duration) {
        if delay.is_zero() {
            self.queues.entry(queue).or_default().push_back(pending);
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.delayed.push(Delayed {
            ready_at: Instant::now() + delay,
            seq,
            queue,
            pending,
        });
    }
}

pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
    notify: Notify,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BrokerState::new()),
            notify: Notify::new(),
        }
    }

    /// Simulate losing (or regaining) the network path to the broker.
    ///
    /// Going unreachable drops the connection and requeues unacked deliveries.
    /// Coming back does not reconnect by itself; the consumer has to call
    /// `connect` again.
    pub async fn set_reachable(&self, reachable: bool) {
        {
            let mut state = self.state.lock().await;
            state.reachable = reachable;
            if !reachable {
                state.connected = false;
                state.requeue_unacked();
            }
        }
        self.notify.notify_waiters();
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.connected
    }

    /// Ready payloads in `queue` (excluding delayed and unacked ones).
    pub async fn queue_depth(&self, queue: &str) -> usize {
        let state = self.state.lock().await;
        state.queues.get(queue).map_or(0, VecDeque::len)
    }

    pub async fn delayed_count(&self) -> usize {
        self.state.lock().await.delayed.len()
    }

    pub async fn unacked_count(&self) -> usize {
        self.state.lock().await.unacked.len()
    }

    pub async fn published_count(&self) -> usize {
        self.state.lock().await.published
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerGateway for InMemoryBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        if !state.reachable {
            return Err(BrokerError::Unreachable("in-memory broker offline".to_string()));
        }
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        {
            let mut state = self.state.lock().await;
            state.connected = false;
            state.requeue_unacked();
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn publish(&self, queue: &str, body: &[u8]) -> Result<(), BrokerError> {
        {
            let mut state = self.state.lock().await;
            state.ensure_connected()?;
            state.queues.entry(queue.to_string()).or_default().push_back(Pending {
                body: body.to_vec(),
                redelivered: false,
            });
            state.published += 1;
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<Delivery>, BrokerError> {
        let deadline = Instant::now() + timeout;
        loop {
            let next_due = {
                let mut state = self.state.lock().await;
                state.ensure_connected()?;
                state.promote_due(Instant::now());

                if let Some(pending) = state.queues.get_mut(queue).and_then(VecDeque::pop_front) {
                    let tag = DeliveryTag(state.next_tag);
                    state.next_tag += 1;
                    let delivery = Delivery {
                        tag,
                        queue: queue.to_string(),
                        body: pending.body.clone(),
                        redelivered: pending.redelivered,
                    };
                    state.unacked.insert(tag, (queue.to_string(), pending));
                    return Ok(Some(delivery));
                }

                state.delayed.peek().map(|entry| entry.ready_at)
            };

            if Instant::now() >= deadline {
                return Ok(None);
            }
            let wake_at = next_due.map_or(deadline, |due| due.min(deadline));

            // woken by publish, nack or disconnect, or by the next due delivery
            tokio::select! {
                _ = self.notify.notified() => {},
                _ = tokio::time::sleep_until(wake_at) => {},
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        state.ensure_connected()?;
        state
            .unacked
            .remove(&delivery.tag)
            .map(|_| ())
            .ok_or(BrokerError::UnknownDelivery(delivery.tag.0))
    }

    async fn nack(&self, delivery: &Delivery, requeue_delay: Duration) -> Result<(), BrokerError> {
        {
            let mut state = self.state.lock().await;
            state.ensure_connected()?;
            let (queue, mut pending) = state
                .unacked
                .remove(&delivery.tag)
                .ok_or(BrokerError::UnknownDelivery(delivery.tag.0))?;
            pending.redelivered = true;
            state.schedule(queue, pending, requeue_delay);
        }
        self.notify.notify_one();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn connected() -> InMemoryBroker {
        let broker = InMemoryBroker::new();
        broker.connect().await.unwrap();
        broker
    }

    #[tokio::test(start_paused = true)]
    async fn publish_consume_ack() {
        let broker = connected().await;
        broker.publish("tasks", b"one").await.unwrap();

        let delivery = broker
            .consume("tasks", Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.body, b"one");
        assert!(!delivery.redelivered);
        assert_eq!(broker.unacked_count().await, 1);

        broker.ack(&delivery).await.unwrap();
        assert_eq!(broker.unacked_count().await, 0);
        assert!(matches!(
            broker.ack(&delivery).await,
            Err(BrokerError::UnknownDelivery(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn consume_times_out_on_empty_queue() {
        let broker = connected().await;
        let start = Instant::now();

        let delivery = broker.consume("tasks", Duration::from_millis(500)).await.unwrap();

        assert!(delivery.is_none());
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn nack_with_delay_hides_payload_until_due() {
        let broker = connected().await;
        broker.publish("tasks", b"later").await.unwrap();
        let first = broker.consume("tasks", Duration::from_secs(1)).await.unwrap().unwrap();

        broker.nack(&first, Duration::from_secs(10)).await.unwrap();
        assert_eq!(broker.delayed_count().await, 1);
        assert!(
            broker
                .consume("tasks", Duration::from_secs(5))
                .await
                .unwrap()
                .is_none()
        );

        let again = broker.consume("tasks", Duration::from_secs(10)).await.unwrap().unwrap();
        assert_eq!(again.body, b"later");
        assert!(again.redelivered);
    }

    #[tokio::test(start_paused = true)]
    async fn publish_wakes_waiting_consumer() {
        let broker = Arc::new(connected().await);
        let waiter = tokio::spawn({
            let broker = Arc::clone(&broker);
            async move { broker.consume("tasks", Duration::from_secs(30)).await }
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        broker.publish("tasks", b"wake").await.unwrap();

        let delivery = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(delivery.body, b"wake");
    }

    #[tokio::test(start_paused = true)]
    async fn losing_the_connection_requeues_unacked() {
        let broker = connected().await;
        broker.publish("tasks", b"in-flight").await.unwrap();
        let delivery = broker.consume("tasks", Duration::from_secs(1)).await.unwrap().unwrap();

        broker.set_reachable(false).await;
        assert_eq!(
            broker.consume("tasks", Duration::from_secs(1)).await,
            Err(BrokerError::Disconnected)
        );
        assert!(matches!(
            broker.connect().await,
            Err(BrokerError::Unreachable(_))
        ));
        assert!(broker.ack(&delivery).await.is_err());

        broker.set_reachable(true).await;
        broker.connect().await.unwrap();
        let again = broker.consume("tasks", Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(again.body, b"in-flight");
        assert!(again.redelivered);
    }

    #[tokio::test]
    async fn queues_are_independent() {
        let broker = connected().await;
        broker.publish("a", b"1").await.unwrap();
        broker.publish("b", b"2").await.unwrap();

        assert_eq!(broker.queue_depth("a").await, 1);
        let from_b = broker.consume("b", Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(from_b.body, b"2");
        assert_eq!(broker.queue_depth("a").await, 1);
        assert_eq!(broker.published_count().await, 2);
    }
}
