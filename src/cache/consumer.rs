//! Event consumer for queued lifecycle events.
//!
//! Drains the queue in batches and routes each event, isolating failures to
//! the event that caused them.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::config::CacheConfig;
use super::events::EventQueue;
use super::router::EventRouter;

const METRIC_EVENT_CONSUME_MS: &str = "seoforge_event_consume_ms";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumeReport {
    pub processed: usize,
    pub failed: usize,
    /// Envelopes skipped because their id was already seen in the batch.
    pub duplicates: usize,
}

impl ConsumeReport {
    pub fn is_empty(&self) -> bool {
        self.processed == 0 && self.failed == 0 && self.duplicates == 0
    }
}

pub struct EventConsumer {
    config: CacheConfig,
    queue: Arc<EventQueue>,
    router: Arc<EventRouter>,
}

impl EventConsumer {
    pub fn new(config: CacheConfig, queue: Arc<EventQueue>, router: Arc<EventRouter>) -> Self {
        Self {
            config,
            queue,
            router,
        }
    }

    /// Route up to one batch of queued events.
    #[instrument(skip(self))]
    pub async fn consume(&self) -> ConsumeReport {
        let started_at = Instant::now();
        let batch = self
            .queue
            .drain(self.config.consume_batch_limit_non_zero().get());
        if batch.is_empty() {
            return ConsumeReport::default();
        }

        let event_ids: Vec<Uuid> = batch.iter().map(|envelope| envelope.id).collect();
        info!(
            event_count = batch.len(),
            event_ids = ?event_ids,
            "Event consumption starting"
        );

        let mut report = ConsumeReport::default();
        let mut seen = HashSet::with_capacity(batch.len());
        for envelope in batch {
            if !seen.insert(envelope.id) {
                report.duplicates += 1;
                continue;
            }
            match self.router.handle(&envelope.event).await {
                Ok(_) => report.processed += 1,
                Err(error) => {
                    report.failed += 1;
                    warn!(
                        event_id = %envelope.id,
                        event_epoch = envelope.epoch,
                        container_id = %envelope.event.container_id(),
                        error = %error,
                        "Queued event failed"
                    );
                }
            }
        }

        info!(
            processed = report.processed,
            failed = report.failed,
            duplicates = report.duplicates,
            "Event consumption complete"
        );
        histogram!(METRIC_EVENT_CONSUME_MS)
            .record(started_at.elapsed().as_secs_f64() * 1000.0);

        report
    }

    /// Consume until the queue is empty.
    pub async fn consume_all(&self) -> ConsumeReport {
        let mut total = ConsumeReport::default();
        loop {
            let report = self.consume().await;
            if report.is_empty() {
                return total;
            }
            total.processed += report.processed;
            total.failed += report.failed;
            total.duplicates += report.duplicates;
        }
    }
}
