//! Content lifecycle events.
//!
//! Defines the events a host reports and an in-memory queue for deferred
//! routing.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::gauge;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::domain::entities::{ContentContainer, ContentItem};
use crate::domain::types::{ContainerId, ContainerKind, ItemId, SiteId};

use super::lock::mutex_lock;

const SOURCE: &str = "cache::events";

const METRIC_EVENT_QUEUE_LEN: &str = "seoforge_event_queue_len";

/// Monotonic epoch for ordering events within this process.
pub type Epoch = u64;

/// A change notification from the host content system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    ContainerSaved {
        container: ContentContainer,
        #[serde(default)]
        is_new: bool,
    },
    ContainerDeleted {
        container_id: ContainerId,
        kind: ContainerKind,
    },
    ItemSaved {
        item: ContentItem,
        #[serde(default)]
        is_new: bool,
    },
    ItemDeleted {
        item_id: ItemId,
        container_id: ContainerId,
        site_id: SiteId,
    },
}

impl LifecycleEvent {
    /// Container the event is serialized under.
    pub fn container_id(&self) -> ContainerId {
        match self {
            LifecycleEvent::ContainerSaved { container, .. } => container.id,
            LifecycleEvent::ContainerDeleted { container_id, .. } => *container_id,
            LifecycleEvent::ItemSaved { item, .. } => item.container_id,
            LifecycleEvent::ItemDeleted { container_id, .. } => *container_id,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            LifecycleEvent::ContainerSaved { .. } => "container_saved",
            LifecycleEvent::ContainerDeleted { .. } => "container_deleted",
            LifecycleEvent::ItemSaved { .. } => "item_saved",
            LifecycleEvent::ItemDeleted { .. } => "item_deleted",
        }
    }
}

/// Queued event with idempotency and ordering metadata.
#[derive(Debug, Clone)]
pub struct LifecycleEnvelope {
    /// Unique identifier for idempotency (UUIDv4).
    pub id: Uuid,
    pub epoch: Epoch,
    pub event: LifecycleEvent,
    pub received_at: OffsetDateTime,
}

impl LifecycleEnvelope {
    pub fn new(event: LifecycleEvent, epoch: Epoch) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            event,
            received_at: OffsetDateTime::now_utc(),
        }
    }
}

/// In-memory FIFO of lifecycle events awaiting the consumer.
pub struct EventQueue {
    queue: Mutex<VecDeque<LifecycleEnvelope>>,
    epoch_counter: AtomicU64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            epoch_counter: AtomicU64::new(0),
        }
    }

    pub fn next_epoch(&self) -> Epoch {
        self.epoch_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Enqueue an event; returns the envelope id assigned to it.
    pub fn publish(&self, event: LifecycleEvent) -> Uuid {
        let envelope = LifecycleEnvelope::new(event, self.next_epoch());
        self.push(envelope)
    }

    /// Enqueue a pre-built envelope, keeping its id (used for redelivery).
    pub fn push(&self, envelope: LifecycleEnvelope) -> Uuid {
        let id = envelope.id;

        info!(
            event_id = %id,
            event_epoch = envelope.epoch,
            event_kind = envelope.event.label(),
            container_id = %envelope.event.container_id(),
            "Lifecycle event enqueued"
        );

        let mut queue = mutex_lock(&self.queue, SOURCE, "publish");
        queue.push_back(envelope);
        gauge!(METRIC_EVENT_QUEUE_LEN).set(queue.len() as f64);
        id
    }

    /// Drain up to `limit` envelopes in FIFO order.
    pub fn drain(&self, limit: usize) -> Vec<LifecycleEnvelope> {
        let mut queue = mutex_lock(&self.queue, SOURCE, "drain");
        let count = limit.min(queue.len());
        let batch = queue.drain(..count).collect();
        gauge!(METRIC_EVENT_QUEUE_LEN).set(queue.len() as f64);
        batch
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.queue, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        mutex_lock(&self.queue, SOURCE, "clear").clear();
        gauge!(METRIC_EVENT_QUEUE_LEN).set(0.0);
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
