//! PublisherLoop - 遅延再実行と再配送の sweep
//!
//! # フロー（sweep ごと）
//! 1. delay_until を過ぎた WAITING_RETRY を delay_until の早い順に QUEUED に戻してから publish
//! 2. publish に失敗したまま残った CREATED を publish して QUEUED へ
//! 3. 長く動きのない QUEUED を再 publish（配送が失われた場合の保険）
//!
//! 3 で重複した payload は無害: worker の claim CAS により handler を実行できるのは一つだけ。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::domain::{MessageId, MessageStatus, StatusUpdate};
use crate::ports::clock::elapsed_since;

use super::manager::Engine;
use super::worker_loop::stopped;

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SweepReport {
    /// WAITING_RETRY records moved back to QUEUED.
    pub(crate) promoted: usize,
    /// CREATED records published and marked QUEUED.
    pub(crate) enqueued: usize,
    /// QUEUED records published again.
    pub(crate) republished: usize,
}

pub(crate) struct PublisherLoop {
    engine: Arc<Engine>,
    /// Last time this process published a QUEUED record, so a backlog is not
    /// republished on every sweep.
    last_published: HashMap<MessageId, DateTime<Utc>>,
}

impl PublisherLoop {
    pub(crate) fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            last_published: HashMap::new(),
        }
    }

    pub(crate) async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.engine.config.sweep_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }
            let report = self.sweep().await;
            if report != SweepReport::default() {
                tracing::debug!(
                    promoted = report.promoted,
                    enqueued = report.enqueued,
                    republished = report.republished,
                    "publisher sweep"
                );
            }
        }
    }

    pub(crate) async fn sweep(&mut self) -> SweepReport {
        SweepReport {
            promoted: self.promote_due_retries().await,
            enqueued: self.enqueue_stale_created().await,
            republished: self.republish_stale_queued().await,
        }
    }

    async fn promote_due_retries(&self) -> usize {
        let engine = &self.engine;
        let due = match engine
            .store
            .list_due_retries(engine.now(), engine.config.sweep_batch_size)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(error = %e, "listing due WAITING_RETRY records failed");
                return 0;
            }
        };

        let mut promoted = 0;
        for record in due {
            let now = engine.now();

            // persist first, then publish
            let queued = match engine
                .writer
                .transition(
                    record.id,
                    MessageStatus::WaitingRetry,
                    MessageStatus::Queued,
                    StatusUpdate::at(now),
                )
                .await
            {
                Ok(queued) => queued,
                // cancelled meanwhile, or already logged by the writer
                Err(_) => continue,
            };
            promoted += 1;

            if let Err(e) = engine.publish(&queued).await {
                // QUEUED without a payload: picked up by the stale-QUEUED pass
                tracing::warn!(message_id = %queued.id, error = %e, "publish after retry delay failed");
            } else {
                tracing::info!(
                    message_id = %queued.id,
                    task_kind = %queued.task_kind,
                    status = %MessageStatus::Queued,
                    retry_count = queued.retry_count,
                    "retry released"
                );
            }
        }
        promoted
    }

    async fn enqueue_stale_created(&self) -> usize {
        let engine = &self.engine;
        let republish_after = engine.config.republish_after();
        let created = match engine
            .store
            .list_by_status(MessageStatus::Created, engine.config.sweep_batch_size)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(error = %e, "listing CREATED records failed");
                return 0;
            }
        };

        let mut enqueued = 0;
        for record in created {
            if elapsed_since(engine.now(), record.last_updated_at) < republish_after {
                // oldest first: the rest are younger still
                break;
            }
            if engine.enqueue_created(&record).await {
                enqueued += 1;
            }
        }
        enqueued
    }

    async fn republish_stale_queued(&mut self) -> usize {
        let republish_after = self.engine.config.republish_after();
        let queued = match self
            .engine
            .store
            .list_by_status(MessageStatus::Queued, self.engine.config.sweep_batch_size)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(error = %e, "listing QUEUED records failed");
                return 0;
            }
        };

        // forget records that have left QUEUED
        self.last_published
            .retain(|id, _| queued.iter().any(|record| record.id == *id));

        let mut republished = 0;
        for record in queued {
            let now = self.engine.now();
            let last_touched = self
                .last_published
                .get(&record.id)
                .map_or(record.last_updated_at, |published| {
                    (*published).max(record.last_updated_at)
                });
            if elapsed_since(now, last_touched) < republish_after {
                continue;
            }

            match self.engine.publish(&record).await {
                Ok(()) => {
                    self.last_published.insert(record.id, now);
                    republished += 1;
                    tracing::debug!(message_id = %record.id, "stale QUEUED record republished");
                }
                Err(e) => {
                    tracing::warn!(message_id = %record.id, error = %e, "republish failed");
                }
            }
        }
        republished
    }
}
