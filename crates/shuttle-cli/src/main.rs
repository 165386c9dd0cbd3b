use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::sleep;

use shuttle_core::domain::AccessTicket;
use shuttle_core::handlers::PurgeExpiredTicketsHandler;
use shuttle_core::impls::{InMemoryBroker, InMemoryRecordStore, InMemoryTicketStore};
use shuttle_core::observability::init_tracing;
use shuttle_core::ports::{Clock, IdGenerator, SystemClock, TicketStore, UlidGenerator};
use shuttle_core::{
    EngineConfig, MessageId, Properties, QueueCounts, QueueManager, QueueManagerBuilder,
    StatusSnapshot, TaskKind,
};

mod demo;

use demo::{GeneratePdfHandler, UpdateSitemapHandler};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Serialize)]
struct Report {
    messages: Vec<StatusSnapshot>,
    counts: QueueCounts,
    remaining_tickets: usize,
}

/// 全 record が終了状態になるまでポーリング
async fn wait_all(manager: &QueueManager, ids: &[MessageId]) -> Result<(), BoxError> {
    loop {
        let mut done = true;
        for id in ids {
            done &= manager.status(*id).await?.is_terminal();
        }
        if done {
            return Ok(());
        }
        sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // (A) 設定とログ
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("SHUTTLE_CONFIG").ok())
        .map(PathBuf::from);
    init_tracing(std::env::var("SHUTTLE_LOG_JSON").is_ok_and(|v| v == "1"));
    let config = EngineConfig::load(config_path.as_deref())?;
    tracing::info!(?config, "configuration loaded");

    // (B) in-memory の store / broker / ticket store を用意
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ids = UlidGenerator::new(Arc::clone(&clock));
    let store = Arc::new(InMemoryRecordStore::new());
    let broker = Arc::new(InMemoryBroker::new());
    let tickets = Arc::new(InMemoryTicketStore::new());

    let now = clock.now();
    tickets
        .insert(AccessTicket::new(
            ids.generate_ticket_id(),
            "PPN615650858",
            now - chrono::Duration::hours(2),
        ))
        .await?;
    tickets
        .insert(AccessTicket::new(
            ids.generate_ticket_id(),
            "PPN517154005",
            now + chrono::Duration::hours(2),
        ))
        .await?;

    // (C) handler を登録して manager を構築
    let manager = QueueManagerBuilder::new()
        .store(store)
        .broker(broker)
        .clock(Arc::clone(&clock))
        .config(config)
        .register(
            TaskKind::PurgeExpiredTickets,
            PurgeExpiredTicketsHandler::new(tickets.clone(), Arc::clone(&clock)),
        )?
        .register(TaskKind::GeneratePdf, GeneratePdfHandler)?
        .register(TaskKind::UpdateSitemap, UpdateSitemapHandler { entries: 1_200 })?
        .expect_kinds(&[
            TaskKind::PurgeExpiredTickets,
            TaskKind::GeneratePdf,
            TaskKind::UpdateSitemap,
        ])
        .build()?;

    // (D) 起動してタスクを投入
    let handle = manager.start().await?;

    let mut pdf = Properties::new();
    pdf.insert("pi".to_string(), "PPN615650858".to_string());
    let submitted = vec![
        manager
            .submit(TaskKind::PurgeExpiredTickets, Properties::new())
            .await?,
        manager.submit(TaskKind::GeneratePdf, pdf).await?,
        manager
            .submit(TaskKind::UpdateSitemap, Properties::new())
            .await?,
    ];
    for id in &submitted {
        println!("submitted: {id}");
    }

    // (E) 完了を待つ（Ctrl-C で中断）
    tokio::select! {
        waited = wait_all(&manager, &submitted) => waited?,
        _ = tokio::signal::ctrl_c() => tracing::warn!("interrupted; shutting down"),
    }

    // (F) 結果を出力して停止
    let mut messages = Vec::with_capacity(submitted.len());
    for id in &submitted {
        messages.push(manager.status(*id).await?);
    }
    let report = Report {
        messages,
        counts: manager.counts().await?,
        remaining_tickets: tickets.list().await?.len(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    handle.shutdown().await;
    Ok(())
}
