//! Version counters for meta bundles and the staleness check built on them.
//!
//! Each stored bundle key owns a monotonic counter. An artifact records the
//! counters of its whole precedence chain (a [`BundleStamp`]); it is stale
//! as soon as any counter moved past the recorded value.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::domain::bundle::{BundleKey, BundleSource, BundleStamp};
use crate::domain::types::{ContainerId, SiteId};

use super::keys::{ArtifactKey, ArtifactOwner, ItemKey};
use super::lock::{rw_read, rw_write};
use super::registry::ArtifactIndex;
use super::store::Artifact;

const SOURCE: &str = "cache::tracker";

/// What a single `invalidate` call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationScope {
    Bundle(BundleKey),
    Item(ItemKey),
    Container(ContainerId),
    All,
}

impl fmt::Display for InvalidationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidationScope::Bundle(key) => write!(f, "bundle:{key}"),
            InvalidationScope::Item(item) => write!(f, "item:{}@{}", item.item_id, item.site_id),
            InvalidationScope::Container(id) => write!(f, "container:{id}"),
            InvalidationScope::All => f.write_str("all"),
        }
    }
}

/// A counter that moved during an invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Epoch,
    Bundle(BundleKey),
}

#[derive(Debug, Default)]
pub struct InvalidationReport {
    /// Counters incremented by this call.
    pub bumped: Vec<Counter>,
    /// Counters left alone because nothing was stored since their last bump.
    pub already_stale: usize,
    /// Artifact keys the caller must evict from the store.
    pub evict: Vec<ArtifactKey>,
}

impl InvalidationReport {
    pub fn is_noop(&self) -> bool {
        self.bumped.is_empty() && self.evict.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct CounterState {
    version: u64,
    /// Bumped and not yet observed by a stored artifact.
    stale: bool,
}

impl CounterState {
    /// Returns true if the version moved.
    fn bump(&mut self) -> bool {
        if self.stale {
            return false;
        }
        self.version += 1;
        self.stale = true;
        true
    }

    fn observe(&mut self, version: u64) {
        if self.version == version {
            self.stale = false;
        }
    }
}

#[derive(Default)]
struct TrackerState {
    epoch: CounterState,
    bundles: HashMap<BundleKey, CounterState>,
    container_sites: HashMap<ContainerId, BTreeSet<SiteId>>,
}

impl TrackerState {
    fn version(&self, key: &BundleKey) -> u64 {
        self.bundles.get(key).map_or(0, |state| state.version)
    }

    fn bump(&mut self, key: BundleKey, report: &mut InvalidationReport) {
        if self.bundles.entry(key).or_default().bump() {
            report.bumped.push(Counter::Bundle(key));
        } else {
            report.already_stale += 1;
        }
    }
}

/// Holds version stamps and artifact keys; never artifact payloads.
pub struct InvalidationTracker {
    state: RwLock<TrackerState>,
    index: Arc<ArtifactIndex>,
}

impl InvalidationTracker {
    pub fn new(index: Arc<ArtifactIndex>) -> Self {
        Self {
            state: RwLock::new(TrackerState::default()),
            index,
        }
    }

    pub fn index(&self) -> &Arc<ArtifactIndex> {
        &self.index
    }

    /// Record the sites a container publishes to so `Container` scope can
    /// reach their per-site counters.
    pub fn track_sites(&self, container_id: ContainerId, sites: impl IntoIterator<Item = SiteId>) {
        let mut state = rw_write(&self.state, SOURCE, "track_sites");
        state
            .container_sites
            .entry(container_id)
            .or_default()
            .extend(sites);
    }

    /// Stop tracking a deleted container's sites. Versions are kept so a
    /// re-created container with the same id never reuses an old stamp.
    pub fn forget_container(&self, container_id: ContainerId) -> Vec<ArtifactKey> {
        rw_write(&self.state, SOURCE, "forget_container")
            .container_sites
            .remove(&container_id);
        self.index
            .take_owner(&ArtifactOwner::Container(container_id))
            .into_iter()
            .collect()
    }

    pub fn invalidate(&self, scope: InvalidationScope) -> InvalidationReport {
        let mut report = InvalidationReport::default();

        match scope {
            InvalidationScope::Bundle(key) => {
                let mut state = rw_write(&self.state, SOURCE, "invalidate_bundle");
                if let (Some(container_id), Some(site_id)) = (key.container_id(), key.site_id()) {
                    state
                        .container_sites
                        .entry(container_id)
                        .or_default()
                        .insert(site_id);
                }
                state.bump(key, &mut report);
            }
            InvalidationScope::Container(container_id) => {
                let mut state = rw_write(&self.state, SOURCE, "invalidate_container");
                let mut keys: BTreeSet<BundleKey> = state
                    .container_sites
                    .get(&container_id)
                    .into_iter()
                    .flatten()
                    .map(|site| BundleKey::container_site(container_id, *site))
                    .collect();
                keys.extend(
                    state
                        .bundles
                        .keys()
                        .filter(|key| key.source == BundleSource::Container(container_id))
                        .copied(),
                );
                keys.insert(BundleKey::container(container_id));
                for key in keys {
                    state.bump(key, &mut report);
                }
            }
            InvalidationScope::Item(item) => {
                report.evict = self
                    .index
                    .take_owner(&ArtifactOwner::Item(item))
                    .into_iter()
                    .collect();
            }
            InvalidationScope::All => {
                let mut state = rw_write(&self.state, SOURCE, "invalidate_all");
                if state.epoch.bump() {
                    report.bumped.push(Counter::Epoch);
                } else {
                    report.already_stale += 1;
                }
            }
        }

        info!(
            scope = %scope,
            bumped = report.bumped.len(),
            already_stale = report.already_stale,
            evict = report.evict.len(),
            "Invalidation applied"
        );
        report
    }

    /// Current versions of every counter in the chain for `(container, site)`.
    pub fn stamp_for(&self, container_id: ContainerId, site_id: SiteId) -> BundleStamp {
        let state = rw_read(&self.state, SOURCE, "stamp_for");
        BundleStamp {
            epoch: state.epoch.version,
            container_site: state.version(&BundleKey::container_site(container_id, site_id)),
            container: state.version(&BundleKey::container(container_id)),
            global_site: state.version(&BundleKey::global_site(site_id)),
            global: state.version(&BundleKey::global()),
        }
    }

    /// Stamp for the global chain of a site; container counters read as zero.
    pub fn global_stamp(&self, site_id: SiteId) -> BundleStamp {
        let state = rw_read(&self.state, SOURCE, "global_stamp");
        BundleStamp {
            epoch: state.epoch.version,
            container_site: 0,
            container: 0,
            global_site: state.version(&BundleKey::global_site(site_id)),
            global: state.version(&BundleKey::global()),
        }
    }

    pub fn version(&self, key: &BundleKey) -> u64 {
        rw_read(&self.state, SOURCE, "version").version(key)
    }

    pub fn epoch(&self) -> u64 {
        rw_read(&self.state, SOURCE, "epoch").epoch.version
    }

    pub fn is_stale(&self, artifact: &Artifact) -> bool {
        let key = &artifact.key;
        let current = if artifact.global_chain {
            self.global_stamp(key.site_id)
        } else {
            self.stamp_for(key.container_id, key.site_id)
        };
        current != artifact.source_bundle_version
    }

    /// Called after an artifact rendered against `stamp` was stored: the
    /// counters it observed become eligible for another bump.
    pub fn mark_fresh(&self, key: &ArtifactKey, stamp: &BundleStamp, global_chain: bool) {
        let mut state = rw_write(&self.state, SOURCE, "mark_fresh");
        state.epoch.observe(stamp.epoch);

        let mut chain = vec![
            (BundleKey::global_site(key.site_id), stamp.global_site),
            (BundleKey::global(), stamp.global),
        ];
        if !global_chain {
            chain.push((
                BundleKey::container_site(key.container_id, key.site_id),
                stamp.container_site,
            ));
            chain.push((BundleKey::container(key.container_id), stamp.container));
        }
        for (bundle_key, version) in chain {
            if let Some(counter) = state.bundles.get_mut(&bundle_key) {
                counter.observe(version);
            }
        }

        debug!(artifact_key = %key, stamp = %stamp, "Artifact stamp observed");
    }
}
