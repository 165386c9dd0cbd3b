//! TaskHandler trait - 各 task kind の処理単位
//!
//! A handler receives a [`TaskContext`] and reports a [`HandlerOutcome`]. It
//! never returns a Rust error; transient trouble is `Retry`, permanent trouble
//! is `Failed`.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::domain::{HandlerOutcome, MessageId, MessageRecord, Properties, TaskKind};

/// Handler は TaskContext を受け取って HandlerOutcome を返す
///
/// # 使用例
/// ```ignore
/// struct RebuildSitemap;
///
/// #[async_trait]
/// impl TaskHandler for RebuildSitemap {
///     async fn execute(&self, ctx: &TaskContext) -> HandlerOutcome {
///         ctx.record_progress("entries", 1200);
///         HandlerOutcome::done()
///     }
/// }
/// ```
///
/// 同じ record に対して複数回呼ばれることがある（クラッシュ後や retry 時）ので、
/// 冪等にするか progress の properties で進捗を確認すること。
///
/// 停止要求（`TaskContext::is_cancelled`）を見て `Retry` を返した場合は
/// リトライ回数を消費せず、record は QUEUED に戻される。
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn execute(&self, ctx: &TaskContext) -> HandlerOutcome;
}

/// What a handler can see and do during one execution.
pub struct TaskContext {
    record: MessageRecord,
    progress: Mutex<Properties>,
    shutdown: watch::Receiver<bool>,
}

impl TaskContext {
    pub fn new(record: MessageRecord, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            record,
            progress: Mutex::new(Properties::new()),
            shutdown,
        }
    }

    pub fn id(&self) -> MessageId {
        self.record.id
    }

    pub fn task_kind(&self) -> TaskKind {
        self.record.task_kind
    }

    /// Properties as stored when the execution started.
    pub fn properties(&self) -> &Properties {
        &self.record.properties
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.record.properties.get(key).map(String::as_str)
    }

    /// Retries already accepted for this record (0 on the first execution).
    pub fn retry_count(&self) -> u32 {
        self.record.retry_count
    }

    pub fn record(&self) -> &MessageRecord {
        &self.record
    }

    /// Append a progress property. It is persisted together with the
    /// outcome's status transition; a later value for the same key wins.
    pub fn record_progress(&self, key: impl Into<String>, value: impl ToString) {
        let mut progress = self.progress.lock().unwrap_or_else(|e| e.into_inner());
        progress.insert(key.into(), value.to_string());
    }

    /// Progress recorded so far.
    pub fn progress(&self) -> Properties {
        self.progress
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// True once the manager is shutting down.
    pub fn is_cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Resolves when the manager starts shutting down.
    pub async fn cancelled(&self) {
        let mut shutdown = self.shutdown.clone();
        // a closed channel means the manager is gone
        let _ = shutdown.wait_for(|stop| *stop).await;
    }
}
