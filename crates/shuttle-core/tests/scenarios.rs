//! End-to-end scenarios against the in-memory broker and stores.

mod common;

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use ulid::Ulid;

use shuttle_core::config::PolicyConfig;
use shuttle_core::domain::{AccessTicket, TicketId};
use shuttle_core::handlers::PurgeExpiredTicketsHandler;
use shuttle_core::handlers::purge_tickets::DELETED_TICKETS;
use shuttle_core::ports::TicketStore;
use shuttle_core::{HandlerOutcome, MessageStatus, Properties, TaskKind};

use common::{Harness, test_config, wait_terminal};

use MessageStatus::*;

#[tokio::test(start_paused = true)]
async fn purge_removes_only_expired_tickets() {
    let h = Harness::new();
    let valid = AccessTicket::new(
        TicketId::from_ulid(Ulid::new()),
        "PPN-valid",
        h.now() + ChronoDuration::hours(1),
    );
    let valid_id = valid.id;
    h.tickets.insert(valid).await.unwrap();
    h.tickets
        .insert(AccessTicket::new(
            TicketId::from_ulid(Ulid::new()),
            "PPN-expired",
            h.now() - ChronoDuration::hours(1),
        ))
        .await
        .unwrap();

    let manager = h
        .builder()
        .register(
            TaskKind::PurgeExpiredTickets,
            PurgeExpiredTicketsHandler::new(h.tickets.clone(), h.clock.clone()),
        )
        .unwrap()
        .build()
        .unwrap();
    let handle = manager.start().await.unwrap();

    let id = manager
        .submit(TaskKind::PurgeExpiredTickets, Properties::new())
        .await
        .unwrap();
    let snapshot = wait_terminal(&manager, id).await;

    assert_eq!(snapshot.status, Finished);
    assert_eq!(
        snapshot.properties.get(DELETED_TICKETS).map(String::as_str),
        Some("1")
    );
    let remaining = h.tickets.list().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, valid_id);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn generate_pdf_retries_twice_then_finishes() {
    let h = Harness::new();
    let mut config = test_config();
    config.policies = HashMap::from([(
        "GENERATE_PDF".to_string(),
        PolicyConfig {
            max_retries: Some(5),
            ..PolicyConfig::default()
        },
    )]);

    let handler = h.scripted(
        vec![
            HandlerOutcome::retry(Duration::from_secs(2)),
            HandlerOutcome::retry(Duration::from_secs(2)),
        ],
        HandlerOutcome::done(),
    );
    let manager = h
        .builder_with(config)
        .register_shared(TaskKind::GeneratePdf, handler.clone())
        .unwrap()
        .build()
        .unwrap();
    let handle = manager.start().await.unwrap();

    let mut properties = Properties::new();
    properties.insert("pi".to_string(), "PPN615650858".to_string());
    let id = manager.submit(TaskKind::GeneratePdf, properties).await.unwrap();
    let snapshot = wait_terminal(&manager, id).await;

    assert_eq!(snapshot.status, Finished);
    assert_eq!(snapshot.retry_count, 2);
    assert_eq!(snapshot.properties.get("pi").map(String::as_str), Some("PPN615650858"));
    assert_eq!(handler.calls(), 3);
    assert_eq!(
        h.store.status_history(id).await,
        vec![
            Created, Queued, Processing, WaitingRetry, Queued, Processing, WaitingRetry, Queued,
            Processing, Finished,
        ]
    );

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn endless_retry_hits_the_cap() {
    let h = Harness::new();
    let mut config = test_config();
    config.policies = HashMap::from([(
        "update_sitemap".to_string(),
        PolicyConfig {
            max_retries: Some(1),
            ..PolicyConfig::default()
        },
    )]);

    let handler = h.scripted(vec![], HandlerOutcome::retry(Duration::from_secs(1)));
    let manager = h
        .builder_with(config)
        .register_shared(TaskKind::UpdateSitemap, handler.clone())
        .unwrap()
        .build()
        .unwrap();
    let handle = manager.start().await.unwrap();

    let id = manager
        .submit(TaskKind::UpdateSitemap, Properties::new())
        .await
        .unwrap();
    let snapshot = wait_terminal(&manager, id).await;

    assert_eq!(snapshot.status, Error);
    assert_eq!(snapshot.retry_count, 1);
    assert!(
        snapshot
            .error_reason
            .as_deref()
            .is_some_and(|reason| reason.contains("retry limit exceeded")),
        "unexpected reason: {:?}",
        snapshot.error_reason
    );
    assert_eq!(handler.calls(), 2);
    assert_eq!(
        h.store.status_history(id).await,
        vec![Created, Queued, Processing, WaitingRetry, Queued, Processing, Error]
    );

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn kinds_run_side_by_side() {
    let h = Harness::new();
    let pdf = h.scripted(vec![], HandlerOutcome::done());
    let sitemap = h.scripted(vec![], HandlerOutcome::failed("sitemap template missing"));
    let manager = h
        .builder()
        .register_shared(TaskKind::GeneratePdf, pdf.clone())
        .unwrap()
        .register_shared(TaskKind::UpdateSitemap, sitemap.clone())
        .unwrap()
        .expect_kinds(&[TaskKind::GeneratePdf, TaskKind::UpdateSitemap])
        .build()
        .unwrap();
    let handle = manager.start().await.unwrap();

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(manager.submit(TaskKind::GeneratePdf, Properties::new()).await.unwrap());
    }
    let failing = manager
        .submit(TaskKind::UpdateSitemap, Properties::new())
        .await
        .unwrap();

    for id in ids {
        assert_eq!(wait_terminal(&manager, id).await.status, Finished);
    }
    let failed = wait_terminal(&manager, failing).await;
    assert_eq!(failed.status, Error);
    assert_eq!(failed.error_reason.as_deref(), Some("sitemap template missing"));

    let counts = manager.counts().await.unwrap();
    assert_eq!(counts.finished, 3);
    assert_eq!(counts.error, 1);
    assert_eq!(counts.active(), 0);
    assert_eq!(pdf.calls(), 3);
    assert_eq!(sitemap.calls(), 1);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn concurrency_limit_is_per_kind() {
    let h = Harness::new();
    let mut config = test_config();
    config.workers = 4;
    config.policies = HashMap::from([(
        "GENERATE_PDF".to_string(),
        PolicyConfig {
            concurrency: Some(1),
            ..PolicyConfig::default()
        },
    )]);

    let handler = common::Sleepy::new(Duration::from_millis(300));
    let manager = h
        .builder_with(config)
        .register_shared(TaskKind::GeneratePdf, handler.clone())
        .unwrap()
        .build()
        .unwrap();
    let handle = manager.start().await.unwrap();

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(manager.submit(TaskKind::GeneratePdf, Properties::new()).await.unwrap());
    }
    for id in ids {
        assert_eq!(wait_terminal(&manager, id).await.status, Finished);
    }
    assert_eq!(handler.max_running.load(Ordering::SeqCst), 1);

    handle.shutdown().await;
}
