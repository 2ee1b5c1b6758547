//! seoforge cache system
//!
//! Keeps derived SEO artifacts consistent with the content they were
//! rendered from:
//!
//! - **Tracker**: version counters per bundle; artifacts carry the counters
//!   they were built against and go stale when any of them moves
//! - **Store**: pluggable artifact storage with build coalescing
//! - **Router**: applies content lifecycle events to bundles, counters,
//!   stored artifacts, and the sitemap index
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! artifact_limit = 1000
//! auto_consume_interval_ms = 5000
//! consume_batch_limit = 100
//! ```

mod config;
mod consumer;
mod events;
mod keys;
pub(crate) mod lock;
mod registry;
mod router;
mod store;
mod tracker;

pub use config::CacheConfig;
pub use consumer::{ConsumeReport, EventConsumer};
pub use events::{Epoch, EventQueue, LifecycleEnvelope, LifecycleEvent};
pub use keys::{ArtifactKey, ArtifactOwner, ItemKey};
pub use registry::ArtifactIndex;
pub use router::{EventRouter, RoutingOutcome, SitemapChange};
pub use store::{
    Artifact, ArtifactBackend, ArtifactStore, BackendError, Lookup, MemoryBackend, MissReason,
};
pub use tracker::{Counter, InvalidationReport, InvalidationScope, InvalidationTracker};
