//! Cache configuration.
//!
//! Controls artifact storage and event consumption via `seoforge.toml`.

use std::num::NonZeroUsize;

use serde::Deserialize;

const DEFAULT_ARTIFACT_LIMIT: usize = 1000;
const DEFAULT_AUTO_CONSUME_INTERVAL_MS: u64 = 5000;
const DEFAULT_CONSUME_BATCH_LIMIT: usize = 100;

/// Cache configuration from `seoforge.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum artifacts held by the in-memory backend.
    pub artifact_limit: usize,
    /// Auto-consume interval (ms) for queued lifecycle events.
    pub auto_consume_interval_ms: u64,
    /// Maximum events per consumption batch.
    pub consume_batch_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            artifact_limit: DEFAULT_ARTIFACT_LIMIT,
            auto_consume_interval_ms: DEFAULT_AUTO_CONSUME_INTERVAL_MS,
            consume_batch_limit: DEFAULT_CONSUME_BATCH_LIMIT,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            artifact_limit: settings.artifact_limit,
            auto_consume_interval_ms: settings.auto_consume_interval_ms,
            consume_batch_limit: settings.consume_batch_limit,
        }
    }
}

impl CacheConfig {
    /// Returns the artifact limit as NonZeroUsize, clamping to 1 if zero.
    pub fn artifact_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.artifact_limit).unwrap_or(NonZeroUsize::MIN)
    }

    /// Batch size used by the consumer; zero is treated as one.
    pub fn consume_batch_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.consume_batch_limit).unwrap_or(NonZeroUsize::MIN)
    }
}
