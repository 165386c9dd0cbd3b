//! ReaperLoop - 起動時の回収 sweep
//!
//! # 前のプロセスが残した仕事
//! 1. kind の実行予算より古い PROCESSING を QUEUED に戻して publish（CAS なので一度だけ）
//! 2. publish されないまま残った CREATED を publish
//! 3. 予算より古い QUEUED を再 publish（broker が失った可能性がある）

use std::collections::HashSet;

use serde::Serialize;

use crate::domain::{MessageId, MessageStatus, StatusUpdate};
use crate::ports::clock::elapsed_since;

use super::manager::Engine;

/// What the startup recovery sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Stale PROCESSING records moved back to QUEUED.
    pub requeued: usize,
    /// CREATED records published and marked QUEUED.
    pub enqueued: usize,
    /// QUEUED records published again.
    pub republished: usize,
}

pub(crate) async fn recover(engine: &Engine) -> RecoveryReport {
    let report = RecoveryReport {
        requeued: requeue_stale_processing(engine).await,
        enqueued: enqueue_created(engine).await,
        republished: republish_stale_queued(engine).await,
    };
    if report != RecoveryReport::default() {
        tracing::info!(
            requeued = report.requeued,
            enqueued = report.enqueued,
            republished = report.republished,
            "recovery sweep finished"
        );
    }
    report
}

async fn requeue_stale_processing(engine: &Engine) -> usize {
    let batch = engine.config.sweep_batch_size;
    let mut seen: HashSet<MessageId> = HashSet::new();
    let mut requeued = 0;

    loop {
        let processing = match engine.store.list_by_status(MessageStatus::Processing, batch).await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(error = %e, "listing PROCESSING records failed; recovery skipped");
                return requeued;
            }
        };

        let mut progressed = false;
        for record in processing {
            if !seen.insert(record.id) {
                continue;
            }
            progressed = true;

            let now = engine.now();
            let budget = engine.policy(record.task_kind).execution_budget;
            if elapsed_since(now, record.last_updated_at) < budget {
                // may still be running in another process
                continue;
            }

            // a conflict means another process recovered or finished it first
            if let Ok(queued) = engine
                .writer
                .transition(
                    record.id,
                    MessageStatus::Processing,
                    MessageStatus::Queued,
                    StatusUpdate::at(now),
                )
                .await
            {
                requeued += 1;
                tracing::warn!(
                    message_id = %queued.id,
                    task_kind = %queued.task_kind,
                    status = %MessageStatus::Queued,
                    "stale PROCESSING record requeued"
                );
                if let Err(e) = engine.publish(&queued).await {
                    tracing::warn!(message_id = %queued.id, error = %e, "publish after recovery failed");
                }
            }
        }

        if !progressed {
            return requeued;
        }
    }
}

async fn enqueue_created(engine: &Engine) -> usize {
    let batch = engine.config.sweep_batch_size;
    let mut seen: HashSet<MessageId> = HashSet::new();
    let mut enqueued = 0;

    loop {
        let created = match engine.store.list_by_status(MessageStatus::Created, batch).await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(error = %e, "listing CREATED records failed");
                return enqueued;
            }
        };

        let fresh: Vec<_> = created.into_iter().filter(|r| seen.insert(r.id)).collect();
        if fresh.is_empty() {
            return enqueued;
        }
        for record in fresh {
            if engine.enqueue_created(&record).await {
                enqueued += 1;
            }
        }
    }
}

async fn republish_stale_queued(engine: &Engine) -> usize {
    let queued = match engine
        .store
        .list_by_status(MessageStatus::Queued, engine.config.sweep_batch_size)
        .await
    {
        Ok(records) => records,
        Err(e) => {
            tracing::error!(error = %e, "listing QUEUED records failed");
            return 0;
        }
    };

    let mut republished = 0;
    for record in queued {
        let budget = engine.policy(record.task_kind).execution_budget;
        if elapsed_since(engine.now(), record.last_updated_at) < budget {
            continue;
        }
        match engine.publish(&record).await {
            Ok(()) => republished += 1,
            Err(e) => {
                tracing::warn!(message_id = %record.id, error = %e, "republish during recovery failed");
            }
        }
    }
    republished
}
