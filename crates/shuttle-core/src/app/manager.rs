//! QueueManager - the engine's owner
//!
//! `QueueManager` is the operator surface (submit / cancel / status) and owns
//! the broker lifecycle. `start()` connects the broker, runs the recovery
//! sweep and spawns the loops; the returned [`ManagerHandle`] stops them.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;

use crate::app::gc_loop;
use crate::app::publisher_loop::PublisherLoop;
use crate::app::reaper_loop::{self, RecoveryReport};
use crate::app::status::{QueueCounts, StatusSnapshot};
use crate::app::worker_loop;
use crate::config::EngineConfig;
use crate::domain::{
    EngineError, MessageId, MessageRecord, MessageStatus, Properties, StatusUpdate, StoreError,
    TaskKind,
};
use crate::ports::{BrokerGateway, Clock, IdGenerator, MessageRecordStore};
use crate::queue::{StoreWriter, TaskPolicy};
use crate::tasks::{PayloadCodec, TaskPayload, TaskRegistry};

pub(crate) const CANCEL_REASON: &str = "cancelled by operator";

/// Everything the loops share. Built once by the builder.
pub(crate) struct Engine {
    pub(crate) store: Arc<dyn MessageRecordStore>,
    pub(crate) writer: StoreWriter,
    pub(crate) broker: Arc<dyn BrokerGateway>,
    pub(crate) registry: TaskRegistry,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) codec: PayloadCodec,
    pub(crate) config: EngineConfig,
    /// Per task-kind concurrency limits.
    pub(crate) limits: HashMap<TaskKind, Arc<Semaphore>>,
    pub(crate) running: AtomicBool,
}

impl Engine {
    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Registered policy for `kind`, or the configured one for records whose
    /// kind has no handler in this process.
    pub(crate) fn policy(&self, kind: TaskKind) -> TaskPolicy {
        self.registry
            .get(kind)
            .map(|entry| entry.policy.clone())
            .unwrap_or_else(|| self.config.policy_for(kind))
    }

    pub(crate) async fn publish(&self, record: &MessageRecord) -> Result<(), EngineError> {
        let body = self.codec.encode(&TaskPayload::from(record))?;
        self.broker.publish(&self.config.queue_name, &body).await?;
        Ok(())
    }

    /// Publish a CREATED record and mark it QUEUED.
    ///
    /// Returns false if the publish failed; the record then stays CREATED and
    /// the publisher sweep tries again.
    pub(crate) async fn enqueue_created(&self, record: &MessageRecord) -> bool {
        if let Err(e) = self.publish(record).await {
            tracing::warn!(
                message_id = %record.id,
                task_kind = %record.task_kind,
                error = %e,
                "publish failed; record stays CREATED until the next sweep"
            );
            return false;
        }

        match self
            .writer
            .transition(
                record.id,
                MessageStatus::Created,
                MessageStatus::Queued,
                StatusUpdate::at(self.now()),
            )
            .await
        {
            Ok(_) => {
                tracing::info!(
                    message_id = %record.id,
                    task_kind = %record.task_kind,
                    status = %MessageStatus::Queued,
                    "message queued"
                );
            }
            Err(StoreError::Conflict { actual, .. }) => {
                tracing::debug!(
                    message_id = %record.id,
                    status = %actual,
                    "record moved on before it was marked queued"
                );
            }
            // logged by the writer; the sweep retries the CREATED record
            Err(_) => {}
        }
        true
    }
}

/// Explicitly constructed queue manager. See [`QueueManagerBuilder`](super::QueueManagerBuilder).
pub struct QueueManager {
    engine: Arc<Engine>,
}

impl QueueManager {
    pub(crate) fn from_engine(engine: Engine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.engine.config
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.engine.registry
    }

    pub fn is_running(&self) -> bool {
        self.engine.running.load(Ordering::SeqCst)
    }

    /// Create a record for `kind` and hand it to the broker.
    ///
    /// A broker failure is not reported: the record stays CREATED and is
    /// published by a later sweep.
    pub async fn submit(
        &self,
        kind: TaskKind,
        properties: Properties,
    ) -> Result<MessageId, EngineError> {
        self.engine.registry.resolve(kind)?;
        let id = self.engine.ids.generate_message_id();
        match self.create_and_enqueue(id, kind, properties).await {
            // a freshly generated id only collides with our own earlier
            // attempt whose reply was lost
            Err(EngineError::Store(StoreError::AlreadyExists(_))) => {
                let existing = self
                    .engine
                    .store
                    .get(id)
                    .await?
                    .ok_or(EngineError::NotFound(id))?;
                if existing.status == MessageStatus::Created {
                    self.engine.enqueue_created(&existing).await;
                }
                Ok(id)
            }
            other => other,
        }
    }

    /// Submit under a caller-chosen id.
    ///
    /// If a record with `id` exists and is still active this is a no-op that
    /// returns `id`; if it is terminal the call fails with
    /// [`EngineError::AlreadyTerminal`].
    pub async fn submit_with_id(
        &self,
        id: MessageId,
        kind: TaskKind,
        properties: Properties,
    ) -> Result<MessageId, EngineError> {
        self.engine.registry.resolve(kind)?;

        if let Some(existing) = self.engine.store.get(id).await? {
            return self.deduplicate(existing);
        }

        match self.create_and_enqueue(id, kind, properties).await {
            Err(EngineError::Store(StoreError::AlreadyExists(_))) => {
                // lost a race with a concurrent submit of the same id
                match self.engine.store.get(id).await? {
                    Some(existing) => self.deduplicate(existing),
                    None => Err(EngineError::NotFound(id)),
                }
            }
            other => other,
        }
    }

    fn deduplicate(&self, existing: MessageRecord) -> Result<MessageId, EngineError> {
        if existing.status.is_terminal() {
            return Err(EngineError::AlreadyTerminal {
                id: existing.id,
                status: existing.status,
            });
        }
        tracing::debug!(
            message_id = %existing.id,
            status = %existing.status,
            "duplicate submit ignored"
        );
        Ok(existing.id)
    }

    async fn create_and_enqueue(
        &self,
        id: MessageId,
        kind: TaskKind,
        properties: Properties,
    ) -> Result<MessageId, EngineError> {
        let record = MessageRecord::new(id, kind, properties, self.engine.now());
        self.engine.writer.create(record.clone()).await?;
        tracing::info!(message_id = %id, task_kind = %kind, "message submitted");

        self.engine.enqueue_created(&record).await;
        Ok(id)
    }

    /// Cancel a record that is not running and not finished.
    pub async fn cancel(&self, id: MessageId) -> Result<StatusSnapshot, EngineError> {
        loop {
            let record = self
                .engine
                .store
                .get(id)
                .await?
                .ok_or(EngineError::NotFound(id))?;

            if record.status.is_terminal() {
                return Err(EngineError::AlreadyTerminal {
                    id,
                    status: record.status,
                });
            }
            if !record.status.is_cancellable() {
                return Err(EngineError::CancelWhileProcessing(id));
            }

            let update = StatusUpdate::at(self.engine.now()).with_reason(CANCEL_REASON);
            match self
                .engine
                .writer
                .transition(id, record.status, MessageStatus::Cancelled, update)
                .await
            {
                Ok(cancelled) => {
                    tracing::info!(
                        message_id = %id,
                        task_kind = %cancelled.task_kind,
                        status = %MessageStatus::Cancelled,
                        "message cancelled"
                    );
                    return Ok(cancelled.into());
                }
                // status changed under us; look again
                Err(StoreError::Conflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub async fn status(&self, id: MessageId) -> Result<StatusSnapshot, EngineError> {
        self.engine
            .store
            .get(id)
            .await?
            .map(StatusSnapshot::from)
            .ok_or(EngineError::NotFound(id))
    }

    pub async fn counts(&self) -> Result<QueueCounts, EngineError> {
        let pairs = self.engine.store.counts_by_status().await?;
        Ok(QueueCounts::from_pairs(pairs))
    }

    /// Delete terminal records last updated more than `older_than` ago.
    pub async fn purge_terminal(&self, older_than: Duration) -> Result<usize, EngineError> {
        Ok(gc_loop::purge_terminal(&self.engine, older_than).await?)
    }

    /// Connect the broker, recover work left behind by a previous process and
    /// spawn the worker, publisher and GC loops.
    pub async fn start(&self) -> Result<ManagerHandle, EngineError> {
        if self.engine.running.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyRunning);
        }

        if let Err(e) = self.engine.broker.connect().await {
            // workers keep reconnecting with backoff
            tracing::warn!(error = %e, "broker unavailable at start");
        }

        let recovery = reaper_loop::recover(&self.engine).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut joins = Vec::with_capacity(self.engine.config.workers + 2);

        for worker in 0..self.engine.config.workers {
            let engine = Arc::clone(&self.engine);
            let rx = shutdown_rx.clone();
            joins.push(tokio::spawn(async move {
                worker_loop::run(worker, engine, rx).await;
            }));
        }

        let publisher = PublisherLoop::new(Arc::clone(&self.engine));
        let rx = shutdown_rx.clone();
        joins.push(tokio::spawn(async move {
            publisher.run(rx).await;
        }));

        if let Some(retention) = self.engine.config.gc_retention() {
            let engine = Arc::clone(&self.engine);
            let rx = shutdown_rx.clone();
            joins.push(tokio::spawn(async move {
                gc_loop::run(engine, retention, rx).await;
            }));
        }

        tracing::info!(
            workers = self.engine.config.workers,
            queue = %self.engine.config.queue_name,
            kinds = ?self.engine.registry.registered_kinds(),
            "queue manager started"
        );

        Ok(ManagerHandle {
            engine: Arc::clone(&self.engine),
            shutdown_tx,
            joins,
            recovery,
        })
    }
}

/// Running manager.
///
/// `shutdown()` stops every loop and then disconnects the broker. Dropping
/// the handle only signals the loops to stop; it does not join them.
pub struct ManagerHandle {
    engine: Arc<Engine>,
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
    recovery: RecoveryReport,
}

impl ManagerHandle {
    /// What the startup recovery sweep did.
    pub fn recovery(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Ask every loop to stop. In-flight handlers run to completion; their
    /// contexts observe the cancellation.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop all loops, wait for them, then disconnect the broker.
    pub async fn shutdown(mut self) {
        self.request_shutdown();
        for join in std::mem::take(&mut self.joins) {
            if let Err(e) = join.await {
                tracing::error!(error = %e, "manager task ended abnormally");
            }
        }
        if let Err(e) = self.engine.broker.disconnect().await {
            tracing::warn!(error = %e, "broker disconnect failed");
        }
        self.engine.running.store(false, Ordering::SeqCst);
        tracing::info!("queue manager stopped");
    }
}

impl Drop for ManagerHandle {
    fn drop(&mut self) {
        self.request_shutdown();
        self.engine.running.store(false, Ordering::SeqCst);
    }
}
