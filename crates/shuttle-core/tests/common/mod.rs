//! Shared wiring for the integration tests.
//!
//! Everything runs on tokio's paused clock: `TokioClock` follows it, so
//! record timestamps and broker delays agree, and multi-second retry delays
//! elapse instantly.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use shuttle_core::config::{ReconnectConfig, StoreRetryConfig};
use shuttle_core::impls::{InMemoryBroker, InMemoryRecordStore, InMemoryTicketStore};
use shuttle_core::ports::{Clock, TokioClock};
use shuttle_core::{
    EngineConfig, HandlerOutcome, MessageId, QueueManager, QueueManagerBuilder, StatusSnapshot,
    TaskContext, TaskHandler,
};

const WAIT_LIMIT: Duration = Duration::from_secs(600);
const POLL_EVERY: Duration = Duration::from_millis(20);

pub fn test_config() -> EngineConfig {
    EngineConfig {
        workers: 2,
        poll_timeout_ms: 100,
        sweep_interval_ms: 100,
        republish_after_ms: 5_000,
        created_redelivery_delay_ms: 50,
        store_retry: StoreRetryConfig {
            attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 100,
        },
        reconnect: ReconnectConfig {
            base_delay_ms: 50,
            max_delay_ms: 500,
        },
        ..EngineConfig::default()
    }
}

pub struct Harness {
    pub store: Arc<InMemoryRecordStore>,
    pub broker: Arc<InMemoryBroker>,
    pub tickets: Arc<InMemoryTicketStore>,
    pub clock: Arc<TokioClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            store: Arc::new(InMemoryRecordStore::new()),
            broker: Arc::new(InMemoryBroker::new()),
            tickets: Arc::new(InMemoryTicketStore::new()),
            clock: Arc::new(TokioClock::new()),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Builder wired to this harness's store, broker and clock.
    pub fn builder(&self) -> QueueManagerBuilder {
        self.builder_with(test_config())
    }

    pub fn builder_with(&self, config: EngineConfig) -> QueueManagerBuilder {
        QueueManagerBuilder::new()
            .store(self.store.clone())
            .broker(self.broker.clone())
            .clock(self.clock.clone())
            .config(config)
    }

    pub fn scripted(&self, outcomes: Vec<HandlerOutcome>, fallback: HandlerOutcome) -> Arc<Scripted> {
        Arc::new(Scripted {
            clock: self.clock.clone(),
            outcomes: Mutex::new(outcomes.into()),
            fallback,
            calls: Mutex::new(Vec::new()),
        })
    }
}

/// Returns queued outcomes in order, then `fallback` forever. Remembers when
/// it was called.
pub struct Scripted {
    clock: Arc<TokioClock>,
    outcomes: Mutex<VecDeque<HandlerOutcome>>,
    fallback: HandlerOutcome,
    calls: Mutex<Vec<DateTime<Utc>>>,
}

impl Scripted {
    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn call_times(&self) -> Vec<DateTime<Utc>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskHandler for Scripted {
    async fn execute(&self, _ctx: &TaskContext) -> HandlerOutcome {
        self.calls.lock().unwrap().push(self.clock.now());
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Sleeps for `duration` then returns Done.
pub struct Sleepy {
    pub duration: Duration,
    pub running: AtomicUsize,
    pub max_running: AtomicUsize,
}

impl Sleepy {
    pub fn new(duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            duration,
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl TaskHandler for Sleepy {
    async fn execute(&self, _ctx: &TaskContext) -> HandlerOutcome {
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);
        tokio::time::sleep(self.duration).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        HandlerOutcome::done()
    }
}

/// Blocks until the test opens the gate.
pub struct Gated {
    pub gate: Notify,
    pub calls: AtomicUsize,
}

impl Gated {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Notify::new(),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl TaskHandler for Gated {
    async fn execute(&self, _ctx: &TaskContext) -> HandlerOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate.notified().await;
        HandlerOutcome::done()
    }
}

/// Parks its first execution until shutdown and answers `Retry`; later
/// executions finish straight away.
pub struct YieldsOnShutdown {
    pub calls: AtomicUsize,
}

impl YieldsOnShutdown {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl TaskHandler for YieldsOnShutdown {
    async fn execute(&self, ctx: &TaskContext) -> HandlerOutcome {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            ctx.cancelled().await;
            ctx.record_progress("pages_done", 3);
            return HandlerOutcome::retry(Duration::from_secs(60));
        }
        HandlerOutcome::done()
    }
}

pub async fn wait_until<F>(manager: &QueueManager, id: MessageId, mut done: F) -> StatusSnapshot
where
    F: FnMut(&StatusSnapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    loop {
        let snapshot = manager.status(id).await.unwrap();
        if done(&snapshot) {
            return snapshot;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "{id} stuck in {}",
            snapshot.status
        );
        tokio::time::sleep(POLL_EVERY).await;
    }
}

pub async fn wait_terminal(manager: &QueueManager, id: MessageId) -> StatusSnapshot {
    wait_until(manager, id, StatusSnapshot::is_terminal).await
}
