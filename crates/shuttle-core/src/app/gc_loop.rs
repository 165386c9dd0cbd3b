//! GCLoop - 終了済み record の削除
//!
//! record を削除するのはここだけ。対象は `last_updated_at` が保持期間より古い
//! 終了済み record。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::domain::{MessageId, MessageStatus, StoreError};
use crate::ports::clock::elapsed_since;

use super::manager::Engine;
use super::worker_loop::stopped;

const TERMINAL: [MessageStatus; 3] = [
    MessageStatus::Finished,
    MessageStatus::Error,
    MessageStatus::Cancelled,
];

pub(crate) async fn run(engine: Arc<Engine>, retention: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(engine.config.gc_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stopped(&mut shutdown) => break,
            _ = ticker.tick() => {}
        }
        match purge_terminal(&engine, retention).await {
            Ok(0) => {}
            Ok(purged) => tracing::info!(purged, "terminal records purged"),
            Err(e) => tracing::warn!(error = %e, "terminal record purge failed"),
        }
    }
}

/// Delete terminal records last updated more than `older_than` ago.
pub(crate) async fn purge_terminal(engine: &Engine, older_than: Duration) -> Result<usize, StoreError> {
    let batch = engine.config.sweep_batch_size;
    let mut purged = 0;

    for status in TERMINAL {
        let mut seen: HashSet<MessageId> = HashSet::new();
        'pages: loop {
            let records = engine.store.list_by_status(status, batch).await?;
            let mut progressed = false;
            for record in records {
                if !seen.insert(record.id) {
                    continue;
                }
                if elapsed_since(engine.now(), record.last_updated_at) < older_than {
                    // oldest first: everything after this is younger
                    break 'pages;
                }
                progressed = true;
                if engine.writer.delete(record.id).await? {
                    purged += 1;
                    tracing::debug!(message_id = %record.id, status = %status, "record purged");
                }
            }
            if !progressed {
                break;
            }
        }
    }
    Ok(purged)
}
