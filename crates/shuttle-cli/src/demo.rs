//! Demo handlers for the kinds the binary does not get from shuttle-core.

use std::time::Duration;

use async_trait::async_trait;
use shuttle_core::{HandlerOutcome, TaskContext, TaskHandler};

/// Pretends the page images are not ready on the first attempt.
pub struct GeneratePdfHandler;

#[async_trait]
impl TaskHandler for GeneratePdfHandler {
    async fn execute(&self, ctx: &TaskContext) -> HandlerOutcome {
        let Some(pi) = ctx.property("pi") else {
            return HandlerOutcome::failed("missing property pi");
        };

        if ctx.retry_count() == 0 {
            tracing::info!(message_id = %ctx.id(), pi, "page images not ready yet");
            return HandlerOutcome::retry(Duration::from_secs(1));
        }

        tokio::select! {
            _ = ctx.cancelled() => return HandlerOutcome::retry(Duration::from_secs(5)),
            _ = tokio::time::sleep(Duration::from_millis(200)) => {}
        }
        ctx.record_progress("pdf_path", format!("/var/cache/pdf/{pi}.pdf"));
        HandlerOutcome::done()
    }
}

pub struct UpdateSitemapHandler {
    pub entries: usize,
}

#[async_trait]
impl TaskHandler for UpdateSitemapHandler {
    async fn execute(&self, ctx: &TaskContext) -> HandlerOutcome {
        if ctx.is_cancelled() {
            return HandlerOutcome::retry(Duration::from_secs(5));
        }
        ctx.record_progress("sitemap_entries", self.entries);
        HandlerOutcome::done()
    }
}
