//! Artifact storage.
//!
//! `ArtifactStore` fronts a pluggable [`ArtifactBackend`], filters stale
//! entries on read, and coalesces concurrent builds of the same key.

use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use lru::LruCache;
use metrics::{counter, histogram};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::domain::bundle::BundleStamp;
use crate::domain::error::DomainError;

use super::config::CacheConfig;
use super::keys::ArtifactKey;
use super::lock::{rw_read, rw_write};
use super::tracker::InvalidationTracker;

const SOURCE: &str = "cache::store";

const METRIC_ARTIFACT_HIT: &str = "seoforge_artifact_hit_total";
const METRIC_ARTIFACT_MISS: &str = "seoforge_artifact_miss_total";
const METRIC_ARTIFACT_STALE: &str = "seoforge_artifact_stale_total";
const METRIC_ARTIFACT_BUILD_FAILED: &str = "seoforge_artifact_build_failed_total";
const METRIC_ARTIFACT_BUILD_MS: &str = "seoforge_artifact_build_ms";

/// Rendered output for one item, stamped with the bundle versions it used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub key: ArtifactKey,
    pub payload: String,
    pub content_type: &'static str,
    /// Hex sha-256 of `payload`.
    pub etag: String,
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
    pub source_bundle_version: BundleStamp,
    /// Rendered against the global chain only (container-less fallback).
    pub global_chain: bool,
}

impl Artifact {
    pub fn new(key: ArtifactKey, payload: String, stamp: BundleStamp) -> Self {
        let etag = payload_etag(&payload);
        Self {
            key,
            content_type: key.kind.content_type(),
            payload,
            etag,
            generated_at: OffsetDateTime::now_utc(),
            source_bundle_version: stamp,
            global_chain: false,
        }
    }

    pub fn from_global_chain(mut self) -> Self {
        self.global_chain = true;
        self
    }
}

fn payload_etag(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    Absent,
    Stale,
}

#[derive(Debug, Clone)]
pub enum Lookup {
    Hit(Arc<Artifact>),
    Miss(MissReason),
}

impl Lookup {
    pub fn hit(self) -> Option<Arc<Artifact>> {
        match self {
            Lookup::Hit(artifact) => Some(artifact),
            Lookup::Miss(_) => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("artifact backend unavailable: {0}")]
    Unavailable(String),
    #[error("artifact `{key}` could not be decoded: {message}")]
    Corrupt { key: String, message: String },
}

impl From<BackendError> for DomainError {
    fn from(error: BackendError) -> Self {
        DomainError::storage(error.to_string())
    }
}

/// Storage behind the artifact store. Implementations only need to make a
/// `store` visible to later `load` calls from the same process.
#[async_trait]
pub trait ArtifactBackend: Send + Sync {
    async fn load(&self, key: &ArtifactKey) -> Result<Option<Arc<Artifact>>, BackendError>;

    /// Returns the key pushed out by capacity limits, if any.
    async fn store(&self, artifact: Arc<Artifact>) -> Result<Option<ArtifactKey>, BackendError>;

    async fn remove(&self, key: &ArtifactKey) -> Result<bool, BackendError>;

    /// Returns the number of removed entries.
    async fn clear(&self) -> Result<usize, BackendError>;

    async fn len(&self) -> Result<usize, BackendError>;
}

/// In-process LRU backend.
pub struct MemoryBackend {
    entries: RwLock<LruCache<ArtifactKey, Arc<Artifact>>>,
}

impl MemoryBackend {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.artifact_limit_non_zero())),
        }
    }
}

#[async_trait]
impl ArtifactBackend for MemoryBackend {
    async fn load(&self, key: &ArtifactKey) -> Result<Option<Arc<Artifact>>, BackendError> {
        Ok(rw_write(&self.entries, SOURCE, "load").get(key).cloned())
    }

    async fn store(&self, artifact: Arc<Artifact>) -> Result<Option<ArtifactKey>, BackendError> {
        let key = artifact.key;
        let pushed_out = rw_write(&self.entries, SOURCE, "store")
            .push(key, artifact)
            .map(|(evicted_key, _)| evicted_key)
            .filter(|evicted_key| *evicted_key != key);
        Ok(pushed_out)
    }

    async fn remove(&self, key: &ArtifactKey) -> Result<bool, BackendError> {
        Ok(rw_write(&self.entries, SOURCE, "remove").pop(key).is_some())
    }

    async fn clear(&self) -> Result<usize, BackendError> {
        let mut entries = rw_write(&self.entries, SOURCE, "clear");
        let removed = entries.len();
        entries.clear();
        Ok(removed)
    }

    async fn len(&self) -> Result<usize, BackendError> {
        Ok(rw_read(&self.entries, SOURCE, "len").len())
    }
}

/// Removes the per-key build slot once its last holder is gone, whether the
/// build finished, failed, or the caller was cancelled.
struct BuildSlot<'a> {
    slots: &'a DashMap<ArtifactKey, Arc<AsyncMutex<()>>>,
    key: ArtifactKey,
    lock: Arc<AsyncMutex<()>>,
}

impl Drop for BuildSlot<'_> {
    fn drop(&mut self) {
        // The map and this guard hold one reference each.
        self.slots
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) <= 2);
    }
}

pub struct ArtifactStore {
    backend: Arc<dyn ArtifactBackend>,
    tracker: Arc<InvalidationTracker>,
    building: DashMap<ArtifactKey, Arc<AsyncMutex<()>>>,
}

impl ArtifactStore {
    pub fn new(backend: Arc<dyn ArtifactBackend>, tracker: Arc<InvalidationTracker>) -> Self {
        Self {
            backend,
            tracker,
            building: DashMap::new(),
        }
    }

    pub fn tracker(&self) -> &Arc<InvalidationTracker> {
        &self.tracker
    }

    /// Fetch a fresh artifact. Stale entries are reported as misses and left
    /// in place until overwritten.
    pub async fn get(&self, key: &ArtifactKey) -> Result<Lookup, DomainError> {
        let lookup = self.lookup(key).await?;
        let kind = key.kind.as_str();
        match &lookup {
            Lookup::Hit(_) => counter!(METRIC_ARTIFACT_HIT, "kind" => kind).increment(1),
            Lookup::Miss(MissReason::Absent) => {
                counter!(METRIC_ARTIFACT_MISS, "kind" => kind).increment(1)
            }
            Lookup::Miss(MissReason::Stale) => {
                counter!(METRIC_ARTIFACT_STALE, "kind" => kind).increment(1)
            }
        }
        Ok(lookup)
    }

    async fn lookup(&self, key: &ArtifactKey) -> Result<Lookup, DomainError> {
        match self.backend.load(key).await? {
            None => Ok(Lookup::Miss(MissReason::Absent)),
            Some(artifact) if self.tracker.is_stale(&artifact) => {
                debug!(artifact_key = %key, "Stale artifact treated as miss");
                Ok(Lookup::Miss(MissReason::Stale))
            }
            Some(artifact) => Ok(Lookup::Hit(artifact)),
        }
    }

    pub async fn put(&self, artifact: Artifact) -> Result<Arc<Artifact>, DomainError> {
        let artifact = Arc::new(artifact);
        let key = artifact.key;
        let index = self.tracker.index();

        index.register(key);
        if let Some(pushed_out) = self.backend.store(Arc::clone(&artifact)).await? {
            index.unregister(&pushed_out);
        }
        self.tracker
            .mark_fresh(&key, &artifact.source_bundle_version, artifact.global_chain);

        Ok(artifact)
    }

    pub async fn evict(&self, key: &ArtifactKey) -> Result<bool, DomainError> {
        self.tracker.index().unregister(key);
        Ok(self.backend.remove(key).await?)
    }

    pub async fn evict_many<'a, I>(&self, keys: I) -> Result<usize, DomainError>
    where
        I: IntoIterator<Item = &'a ArtifactKey>,
    {
        let mut removed = 0;
        for key in keys {
            if self.evict(key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub async fn evict_all(&self) -> Result<usize, DomainError> {
        self.tracker.index().clear();
        Ok(self.backend.clear().await?)
    }

    pub async fn len(&self) -> Result<usize, DomainError> {
        Ok(self.backend.len().await?)
    }

    /// Return a fresh artifact, building it at most once across concurrent
    /// callers for the same key. Build errors are returned and never stored;
    /// callers waiting on a failed build retry one at a time.
    pub async fn get_or_build<F, Fut>(
        &self,
        key: ArtifactKey,
        build: F,
    ) -> Result<Arc<Artifact>, DomainError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Artifact, DomainError>>,
    {
        if let Lookup::Hit(artifact) = self.get(&key).await? {
            return Ok(artifact);
        }

        let lock = self
            .building
            .entry(key)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .value()
            .clone();
        let slot = BuildSlot {
            slots: &self.building,
            key,
            lock,
        };
        let _producer = slot.lock.lock().await;

        if let Lookup::Hit(artifact) = self.lookup(&key).await? {
            return Ok(artifact);
        }

        let started_at = Instant::now();
        match build().await {
            Ok(artifact) => {
                histogram!(METRIC_ARTIFACT_BUILD_MS, "kind" => key.kind.as_str())
                    .record(started_at.elapsed().as_secs_f64() * 1000.0);
                let stored = self.put(artifact).await?;
                debug!(artifact_key = %key, stamp = %stored.source_bundle_version, "Artifact built");
                Ok(stored)
            }
            Err(error) => {
                counter!(METRIC_ARTIFACT_BUILD_FAILED, "kind" => key.kind.as_str()).increment(1);
                warn!(artifact_key = %key, error = %error, "Artifact build failed");
                Err(error)
            }
        }
    }

    /// Number of keys that currently have a build slot; zero when idle.
    pub fn pending_builds(&self) -> usize {
        self.building.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::registry::ArtifactIndex;
    use crate::cache::tracker::InvalidationScope;
    use crate::domain::bundle::BundleKey;
    use crate::domain::types::{ArtifactKind, ContainerId, ItemId, SiteId};

    fn store_with_limit(limit: usize) -> ArtifactStore {
        let config = CacheConfig {
            artifact_limit: limit,
            ..Default::default()
        };
        let tracker = Arc::new(InvalidationTracker::new(Arc::new(ArtifactIndex::new())));
        ArtifactStore::new(Arc::new(MemoryBackend::new(&config)), tracker)
    }

    fn key(item: u64) -> ArtifactKey {
        ArtifactKey::new(ContainerId(1), ItemId(item), SiteId(1), ArtifactKind::MetaTags)
    }

    fn artifact(store: &ArtifactStore, item: u64, payload: &str) -> Artifact {
        let stamp = store.tracker().stamp_for(ContainerId(1), SiteId(1));
        Artifact::new(key(item), payload.to_string(), stamp)
    }

    #[tokio::test]
    async fn put_then_get_returns_the_same_artifact() {
        let store = store_with_limit(10);
        let stored = store
            .put(artifact(&store, 1, "<title>a</title>"))
            .await
            .expect("put");

        let fetched = store.get(&key(1)).await.expect("get").hit().expect("hit");
        assert_eq!(*fetched, *stored);
        assert_eq!(fetched.etag.len(), 64);
    }

    #[tokio::test]
    async fn stale_artifact_is_a_miss_but_stays_stored() {
        let store = store_with_limit(10);
        store.put(artifact(&store, 1, "a")).await.expect("put");

        store
            .tracker()
            .invalidate(InvalidationScope::Bundle(BundleKey::container(ContainerId(1))));

        let lookup = store.get(&key(1)).await.expect("get");
        assert!(matches!(lookup, Lookup::Miss(MissReason::Stale)));
        assert_eq!(store.len().await.expect("len"), 1);
    }

    #[tokio::test]
    async fn capacity_eviction_unregisters_from_index() {
        let store = store_with_limit(1);
        store.put(artifact(&store, 1, "a")).await.expect("put");
        store.put(artifact(&store, 2, "b")).await.expect("put");

        assert!(matches!(
            store.get(&key(1)).await.expect("get"),
            Lookup::Miss(MissReason::Absent)
        ));
        assert_eq!(store.tracker().index().key_count(), 1);
    }

    #[tokio::test]
    async fn failed_build_is_not_cached() {
        let store = store_with_limit(10);

        let err = store
            .get_or_build(key(1), || async {
                Err(DomainError::computation_failed(key(1), "renderer offline"))
            })
            .await
            .expect_err("build should fail");
        assert!(matches!(err, DomainError::ComputationFailed { .. }));
        assert_eq!(store.pending_builds(), 0);

        let fresh = artifact(&store, 1, "ok");
        let built = store
            .get_or_build(key(1), || async move { Ok(fresh) })
            .await
            .expect("retry succeeds");
        assert_eq!(built.payload, "ok");
    }

    #[tokio::test]
    async fn evict_all_empties_backend_and_index() {
        let store = store_with_limit(10);
        store.put(artifact(&store, 1, "a")).await.expect("put");
        store.put(artifact(&store, 2, "b")).await.expect("put");

        assert_eq!(store.evict_all().await.expect("evict all"), 2);
        assert_eq!(store.len().await.expect("len"), 0);
        assert_eq!(store.tracker().index().key_count(), 0);
    }
}
