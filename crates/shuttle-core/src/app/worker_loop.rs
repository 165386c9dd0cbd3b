//! WorkerLoop - タスク実行ループ
//!
//! # フロー
//! 1. BrokerGateway::consume() で payload を取得
//! 2. record を読み、QUEUED -> PROCESSING を CAS で claim
//! 3. task kind の semaphore を取得して handler を実行（watchdog 付き）
//! 4. outcome を status に反映してから ack
//!
//! handler より先に claim を永続化するので、再配送された payload（broker の再接続や
//! 重複 publish）が同じ record を二重に実行することはない。
//!
//! 停止要求を受けて handler が Retry を返した場合は、リトライ回数を増やさずに
//! QUEUED に戻して再 publish する。

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::domain::{
    HandlerOutcome, MessageRecord, MessageStatus, Properties, StatusUpdate, StoreError,
};
use crate::ports::Delivery;
use crate::ports::clock::after;
use crate::queue::TaskPolicy;
use crate::tasks::{RegistryEntry, TaskContext};

use super::manager::Engine;

const DEFAULT_FAILURE_REASON: &str = "handler failed without a reason";

/// How one handler execution ended, as seen by the watchdog.
#[derive(Debug)]
pub(crate) enum Execution {
    Completed {
        outcome: HandlerOutcome,
        progress: Properties,
    },
    TimedOut,
    Panicked(String),
}

pub(crate) async fn run(worker: usize, engine: Arc<Engine>, mut shutdown: watch::Receiver<bool>) {
    let queue = engine.config.queue_name.clone();
    tracing::debug!(worker, queue = %queue, "worker started");

    loop {
        // stop before polling again once shutdown is requested
        if *shutdown.borrow() {
            break;
        }

        // consume may block for the poll timeout; race it with shutdown
        let polled = tokio::select! {
            _ = shutdown.changed() => continue,
            polled = engine.broker.consume(&queue, engine.config.poll_timeout()) => polled,
        };

        match polled {
            Ok(Some(delivery)) => process_delivery(worker, &engine, delivery, &mut shutdown).await,
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(worker, error = %e, "consume failed; reconnecting");
                if !reconnect(worker, &engine, &mut shutdown).await {
                    break;
                }
            }
        }
    }

    tracing::debug!(worker, "worker stopped");
}

/// Reconnect with capped exponential backoff. Returns false if shutdown was
/// requested while waiting.
async fn reconnect(worker: usize, engine: &Engine, shutdown: &mut watch::Receiver<bool>) -> bool {
    let backoff = engine.config.reconnect_backoff();
    let mut attempt = 1;
    loop {
        let delay = backoff.delay_for(attempt);
        tokio::select! {
            _ = stopped(shutdown) => return false,
            _ = tokio::time::sleep(delay) => {}
        }

        match engine.broker.connect().await {
            Ok(()) => {
                tracing::info!(worker, attempt, "broker reconnected");
                return true;
            }
            Err(e) => {
                tracing::warn!(
                    worker,
                    attempt,
                    retry_in_ms = backoff.delay_for(attempt + 1).as_millis() as u64,
                    error = %e,
                    "broker reconnect failed"
                );
                attempt = attempt.saturating_add(1);
            }
        }
    }
}

async fn process_delivery(
    worker: usize,
    engine: &Arc<Engine>,
    delivery: Delivery,
    shutdown: &mut watch::Receiver<bool>,
) {
    let payload = match engine.codec.decode(&delivery.body) {
        Ok(payload) => payload,
        Err(e) => {
            // nothing to map it to a record; drop it
            tracing::error!(worker, error = %e, "undecodable payload dropped");
            ack(worker, engine, &delivery).await;
            return;
        }
    };
    let id = payload.id;

    let record = match engine.store.get(id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            tracing::warn!(worker, message_id = %id, "delivery for unknown record dropped");
            ack(worker, engine, &delivery).await;
            return;
        }
        Err(e) => {
            tracing::warn!(worker, message_id = %id, error = %e, "record lookup failed; requeueing");
            nack(worker, engine, &delivery, engine.config.created_redelivery_delay()).await;
            return;
        }
    };

    match record.status {
        MessageStatus::Queued => {}
        MessageStatus::Created => {
            // publish overtook the CREATED -> QUEUED write
            nack(worker, engine, &delivery, engine.config.created_redelivery_delay()).await;
            return;
        }
        status => {
            tracing::debug!(worker, message_id = %id, status = %status, "stale delivery dropped");
            ack(worker, engine, &delivery).await;
            return;
        }
    }

    let Some(entry) = engine.registry.get(record.task_kind).cloned() else {
        // a record from a deployment that had a handler for this kind
        let reason = format!("no handler registered for task kind {}", record.task_kind);
        if let Some(claimed) = claim(worker, engine, &record, &delivery).await {
            let policy = engine.policy(claimed.task_kind);
            settle(
                worker,
                engine,
                &claimed,
                &policy,
                Execution::Completed {
                    outcome: HandlerOutcome::failed(reason),
                    progress: Properties::new(),
                },
            )
            .await;
            ack(worker, engine, &delivery).await;
        }
        return;
    };

    // per-kind concurrency limit
    let Some(limit) = engine.limits.get(&record.task_kind).cloned() else {
        tracing::error!(worker, task_kind = %record.task_kind, "no concurrency limit for task kind");
        nack(worker, engine, &delivery, Duration::ZERO).await;
        return;
    };
    let permit = tokio::select! {
        permit = limit.acquire_owned() => permit,
        _ = stopped(shutdown) => {
            nack(worker, engine, &delivery, Duration::ZERO).await;
            return;
        }
    };
    let Ok(_permit) = permit else {
        nack(worker, engine, &delivery, Duration::ZERO).await;
        return;
    };

    let Some(claimed) = claim(worker, engine, &record, &delivery).await else {
        return;
    };

    tracing::info!(
        worker,
        message_id = %id,
        task_kind = %claimed.task_kind,
        status = %MessageStatus::Processing,
        retry_count = claimed.retry_count,
        redelivered = delivery.redelivered,
        "processing message"
    );

    let execution = execute(&entry, claimed.clone(), shutdown.clone()).await;
    match execution {
        // a retry caused by shutdown does not count against the retry limit
        Execution::Completed {
            outcome: HandlerOutcome::Retry { .. },
            progress,
        } if *shutdown.borrow() => requeue_interrupted(worker, engine, &claimed, progress).await,
        execution => settle(worker, engine, &claimed, &entry.policy, execution).await,
    }
    ack(worker, engine, &delivery).await;
}

/// Resolves once shutdown has been requested (or the sender is gone).
pub(crate) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let stop = *shutdown.borrow_and_update();
        if stop || shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// CAS QUEUED -> PROCESSING. On `None` the delivery has been acked or nacked.
async fn claim(
    worker: usize,
    engine: &Engine,
    record: &MessageRecord,
    delivery: &Delivery,
) -> Option<MessageRecord> {
    match engine
        .writer
        .transition(
            record.id,
            MessageStatus::Queued,
            MessageStatus::Processing,
            StatusUpdate::at(engine.now()),
        )
        .await
    {
        Ok(claimed) => Some(claimed),
        Err(StoreError::Conflict { actual, .. }) => {
            // someone else owns it
            tracing::debug!(worker, message_id = %record.id, status = %actual, "claim lost");
            ack(worker, engine, delivery).await;
            None
        }
        Err(_) => {
            nack(worker, engine, delivery, engine.config.created_redelivery_delay()).await;
            None
        }
    }
}

/// Run the handler on its own task under the kind's execution budget.
///
/// On timeout the handler task is detached: it keeps running but its result
/// is discarded.
pub(crate) async fn execute(
    entry: &RegistryEntry,
    record: MessageRecord,
    shutdown: watch::Receiver<bool>,
) -> Execution {
    let ctx = Arc::new(TaskContext::new(record, shutdown));
    let handler = Arc::clone(&entry.handler);
    let task_ctx = Arc::clone(&ctx);
    let join = tokio::spawn(async move { handler.execute(&task_ctx).await });

    match tokio::time::timeout(entry.policy.execution_budget, join).await {
        Err(_) => Execution::TimedOut,
        Ok(Err(e)) if e.is_panic() => Execution::Panicked(panic_message(e.into_panic())),
        Ok(Err(e)) => Execution::Panicked(e.to_string()),
        Ok(Ok(outcome)) => Execution::Completed {
            outcome,
            progress: ctx.progress(),
        },
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Persist the status that follows `execution`.
pub(crate) async fn settle(
    worker: usize,
    engine: &Engine,
    record: &MessageRecord,
    policy: &TaskPolicy,
    execution: Execution,
) {
    let now = engine.now();
    let (to, update) = match execution {
        Execution::Completed {
            outcome: HandlerOutcome::Done,
            progress,
        } => (
            MessageStatus::Finished,
            StatusUpdate::at(now).with_properties(progress),
        ),
        Execution::Completed {
            outcome: HandlerOutcome::Failed { reason },
            progress,
        } => {
            let reason = if reason.trim().is_empty() {
                DEFAULT_FAILURE_REASON.to_string()
            } else {
                reason
            };
            (
                MessageStatus::Error,
                StatusUpdate::at(now).with_reason(reason).with_properties(progress),
            )
        }
        Execution::Completed {
            outcome: HandlerOutcome::Retry { after: requested },
            progress,
        } => {
            let (to, update) = retry_or_give_up(record, policy, requested, now);
            (to, update.with_properties(progress))
        }
        Execution::TimedOut if policy.retry_on_timeout => {
            retry_or_give_up(record, policy, Duration::ZERO, now)
        }
        Execution::TimedOut => {
            tracing::warn!(
                worker,
                message_id = %record.id,
                task_kind = %record.task_kind,
                budget_ms = policy.execution_budget.as_millis() as u64,
                "handler exceeded its execution budget"
            );
            (MessageStatus::Error, StatusUpdate::at(now).with_reason("timeout"))
        }
        Execution::Panicked(message) => (
            MessageStatus::Error,
            StatusUpdate::at(now).with_reason(format!("handler panicked: {message}")),
        ),
    };

    match engine
        .writer
        .transition(record.id, MessageStatus::Processing, to, update)
        .await
    {
        Ok(updated) => {
            if to == MessageStatus::Error {
                tracing::warn!(
                    worker,
                    message_id = %record.id,
                    task_kind = %record.task_kind,
                    status = %to,
                    reason = updated.error_reason.as_deref().unwrap_or_default(),
                    "message failed"
                );
            } else {
                tracing::info!(
                    worker,
                    message_id = %record.id,
                    task_kind = %record.task_kind,
                    status = %to,
                    retry_count = updated.retry_count,
                    "message settled"
                );
            }
        }
        Err(StoreError::Conflict { actual, .. }) => {
            tracing::warn!(
                worker,
                message_id = %record.id,
                status = %actual,
                "record changed while its handler ran; outcome discarded"
            );
        }
        // logged by the writer; the record stays PROCESSING until recovery
        Err(_) => {}
    }
}

/// PROCESSING -> QUEUED for a handler that gave up because of shutdown.
///
/// `retry_count` and `delay_until` are left alone and the record is published
/// again, so the next process runs it as soon as it starts consuming.
async fn requeue_interrupted(
    worker: usize,
    engine: &Engine,
    record: &MessageRecord,
    progress: Properties,
) {
    let requeued = match engine
        .writer
        .transition(
            record.id,
            MessageStatus::Processing,
            MessageStatus::Queued,
            StatusUpdate::at(engine.now()).with_properties(progress),
        )
        .await
    {
        Ok(requeued) => requeued,
        Err(StoreError::Conflict { actual, .. }) => {
            tracing::warn!(
                worker,
                message_id = %record.id,
                status = %actual,
                "record changed while its handler ran; outcome discarded"
            );
            return;
        }
        // logged by the writer; the record stays PROCESSING until recovery
        Err(_) => return,
    };

    match engine.publish(&requeued).await {
        Ok(()) => tracing::info!(
            worker,
            message_id = %record.id,
            task_kind = %record.task_kind,
            status = %MessageStatus::Queued,
            retry_count = requeued.retry_count,
            "interrupted by shutdown; requeued"
        ),
        // QUEUED without a payload: the stale-QUEUED passes republish it
        Err(e) => tracing::warn!(
            worker,
            message_id = %record.id,
            error = %e,
            "publish after shutdown requeue failed"
        ),
    }
}

/// WAITING_RETRY with the policy's delay, or ERROR once the retry cap is hit.
fn retry_or_give_up(
    record: &MessageRecord,
    policy: &TaskPolicy,
    requested: Duration,
    now: chrono::DateTime<chrono::Utc>,
) -> (MessageStatus, StatusUpdate) {
    if record.retry_count >= policy.max_retries {
        let reason = format!(
            "retry limit exceeded ({}/{})",
            record.retry_count, policy.max_retries
        );
        return (MessageStatus::Error, StatusUpdate::at(now).with_reason(reason));
    }

    let attempt = record.retry_count + 1;
    let delay = policy.backoff.effective_delay(requested, attempt);
    (
        MessageStatus::WaitingRetry,
        StatusUpdate::at(now)
            .with_retry_count(attempt)
            .with_delay_until(after(now, delay)),
    )
}

async fn ack(worker: usize, engine: &Engine, delivery: &Delivery) {
    if let Err(e) = engine.broker.ack(delivery).await {
        // the broker will redeliver; the record status makes it a no-op
        tracing::warn!(worker, tag = delivery.tag.0, error = %e, "ack failed");
    }
}

async fn nack(worker: usize, engine: &Engine, delivery: &Delivery, delay: Duration) {
    if let Err(e) = engine.broker.nack(delivery, delay).await {
        tracing::warn!(worker, tag = delivery.tag.0, error = %e, "nack failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MessageId, TaskKind};
    use crate::queue::BackoffPolicy;
    use crate::tasks::TaskHandler;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use rstest::rstest;
    use ulid::Ulid;

    fn record(retry_count: u32) -> MessageRecord {
        let mut record = MessageRecord::new(
            MessageId::from_ulid(Ulid::new()),
            TaskKind::GeneratePdf,
            Properties::new(),
            Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
        );
        record.retry_count = retry_count;
        record
    }

    fn policy(max_retries: u32) -> TaskPolicy {
        TaskPolicy {
            max_retries,
            backoff: BackoffPolicy::fixed(Duration::from_secs(1)),
            execution_budget: Duration::from_millis(50),
            ..TaskPolicy::default()
        }
    }

    #[rstest]
    #[case(0, 5, MessageStatus::WaitingRetry)]
    #[case(4, 5, MessageStatus::WaitingRetry)]
    #[case(5, 5, MessageStatus::Error)]
    #[case(1, 1, MessageStatus::Error)]
    fn retry_cap_decides_next_status(
        #[case] retry_count: u32,
        #[case] max_retries: u32,
        #[case] expected: MessageStatus,
    ) {
        let now = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let (to, update) = retry_or_give_up(
            &record(retry_count),
            &policy(max_retries),
            Duration::from_secs(2),
            now,
        );

        assert_eq!(to, expected);
        if expected == MessageStatus::WaitingRetry {
            assert_eq!(update.retry_count, Some(retry_count + 1));
            assert_eq!(update.delay_until, Some(now + chrono::Duration::seconds(2)));
        } else {
            assert!(update.error_reason.unwrap().contains("retry limit exceeded"));
        }
    }

    struct Sleepy;

    #[async_trait]
    impl TaskHandler for Sleepy {
        async fn execute(&self, _ctx: &TaskContext) -> HandlerOutcome {
            tokio::time::sleep(Duration::from_secs(60)).await;
            HandlerOutcome::done()
        }
    }

    struct Panicky;

    #[async_trait]
    impl TaskHandler for Panicky {
        async fn execute(&self, _ctx: &TaskContext) -> HandlerOutcome {
            panic!("page 3 is corrupt");
        }
    }

    struct Progressing;

    #[async_trait]
    impl TaskHandler for Progressing {
        async fn execute(&self, ctx: &TaskContext) -> HandlerOutcome {
            ctx.record_progress("pages", 3);
            HandlerOutcome::done()
        }
    }

    fn entry(handler: Arc<dyn TaskHandler>) -> RegistryEntry {
        RegistryEntry {
            handler,
            policy: policy(3),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_times_out_slow_handlers() {
        let (_tx, rx) = watch::channel(false);
        let execution = execute(&entry(Arc::new(Sleepy)), record(0), rx).await;
        assert!(matches!(execution, Execution::TimedOut));
    }

    #[tokio::test]
    async fn panics_become_executions_not_crashes() {
        let (_tx, rx) = watch::channel(false);
        let execution = execute(&entry(Arc::new(Panicky)), record(0), rx).await;
        match execution {
            Execution::Panicked(message) => assert!(message.contains("page 3 is corrupt")),
            other => panic!("unexpected execution: {other:?}"),
        }
    }

    #[tokio::test]
    async fn progress_is_collected_on_completion() {
        let (_tx, rx) = watch::channel(false);
        let execution = execute(&entry(Arc::new(Progressing)), record(0), rx).await;
        match execution {
            Execution::Completed { outcome, progress } => {
                assert_eq!(outcome, HandlerOutcome::Done);
                assert_eq!(progress.get("pages").map(String::as_str), Some("3"));
            }
            other => panic!("unexpected execution: {other:?}"),
        }
    }
}
