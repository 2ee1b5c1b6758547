//! Routes lifecycle events to the bundle table, tracker, store, and
//! sitemap index.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use metrics::counter;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, instrument, warn};

use crate::application::bundles::BundleTable;
use crate::application::sitemap::SitemapIndexBuilder;
use crate::domain::entities::{ContentContainer, ContentItem};
use crate::domain::error::DomainError;
use crate::domain::types::{ContainerId, ContainerKind, ItemId, SiteId};

use super::events::LifecycleEvent;
use super::keys::ItemKey;
use super::store::ArtifactStore;
use super::tracker::{InvalidationScope, InvalidationTracker};

const METRIC_EVENT_ROUTED: &str = "seoforge_event_routed_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SitemapChange {
    Added,
    Removed,
    Updated,
    Unchanged,
}

impl SitemapChange {
    fn as_str(self) -> &'static str {
        match self {
            SitemapChange::Added => "added",
            SitemapChange::Removed => "removed",
            SitemapChange::Updated => "updated",
            SitemapChange::Unchanged => "unchanged",
        }
    }
}

/// Summary of what one event changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingOutcome {
    pub event: &'static str,
    pub container_id: ContainerId,
    /// Bundle records created.
    pub seeded: usize,
    /// Version counters incremented.
    pub invalidated: usize,
    pub removed_bundles: usize,
    /// Artifacts removed from the store.
    pub evicted: usize,
    pub sitemap: SitemapChange,
}

impl RoutingOutcome {
    fn new(event: &'static str, container_id: ContainerId) -> Self {
        Self {
            event,
            container_id,
            seeded: 0,
            invalidated: 0,
            removed_bundles: 0,
            evicted: 0,
            sitemap: SitemapChange::Unchanged,
        }
    }
}

impl fmt::Display for RoutingOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} container={} seeded={} invalidated={} removed_bundles={} evicted={} sitemap={}",
            self.event,
            self.container_id,
            self.seeded,
            self.invalidated,
            self.removed_bundles,
            self.evicted,
            self.sitemap.as_str()
        )
    }
}

pub struct EventRouter {
    table: Arc<BundleTable>,
    tracker: Arc<InvalidationTracker>,
    store: Arc<ArtifactStore>,
    sitemap: Arc<SitemapIndexBuilder>,
    container_locks: DashMap<ContainerId, Arc<AsyncMutex<()>>>,
}

impl EventRouter {
    pub fn new(
        table: Arc<BundleTable>,
        tracker: Arc<InvalidationTracker>,
        store: Arc<ArtifactStore>,
        sitemap: Arc<SitemapIndexBuilder>,
    ) -> Self {
        Self {
            table,
            tracker,
            store,
            sitemap,
            container_locks: DashMap::new(),
        }
    }

    /// Apply one event. Events for the same container run one at a time;
    /// other containers are not blocked.
    #[instrument(skip(self, event), fields(event_kind = event.label(), container_id = %event.container_id()))]
    pub async fn handle(&self, event: &LifecycleEvent) -> Result<RoutingOutcome, DomainError> {
        let container_id = event.container_id();
        let lock = self
            .container_locks
            .entry(container_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .value()
            .clone();
        let guard = lock.lock().await;

        let result = match event {
            LifecycleEvent::ContainerSaved { container, is_new } => {
                self.container_saved(container, *is_new).await
            }
            LifecycleEvent::ContainerDeleted { container_id, kind } => {
                self.container_deleted(*container_id, *kind).await
            }
            LifecycleEvent::ItemSaved { item, is_new } => {
                self.item_saved(item, *is_new || item.is_new).await
            }
            LifecycleEvent::ItemDeleted {
                item_id,
                container_id,
                site_id,
            } => self.item_deleted(*item_id, *container_id, *site_id).await,
        };

        drop(guard);
        if matches!(event, LifecycleEvent::ContainerDeleted { .. }) {
            drop(lock);
            self.container_locks
                .remove_if(&container_id, |_, lock| Arc::strong_count(lock) == 1);
        }

        match &result {
            Ok(outcome) => {
                counter!(METRIC_EVENT_ROUTED, "event" => event.label(), "outcome" => "ok")
                    .increment(1);
                info!(outcome = %outcome, "Lifecycle event routed");
            }
            Err(error) => {
                counter!(METRIC_EVENT_ROUTED, "event" => event.label(), "outcome" => "error")
                    .increment(1);
                warn!(error = %error, "Lifecycle event failed");
            }
        }
        result
    }

    async fn container_saved(
        &self,
        container: &ContentContainer,
        is_new: bool,
    ) -> Result<RoutingOutcome, DomainError> {
        container.validate()?;
        let mut outcome = RoutingOutcome::new("container_saved", container.id);

        let previous = self.table.upsert_container(container.clone());
        if previous.is_none() && !is_new {
            warn!(
                container_id = %container.id,
                "Update received for unknown container; treating it as a creation"
            );
        }
        if previous.is_none() {
            // Anything indexed under a container we did not know was
            // rendered against the global chain only.
            let orphans = self.tracker.forget_container(container.id);
            outcome.evicted = self.store.evict_many(&orphans).await?;
        }
        self.tracker
            .track_sites(container.id, container.site_ids.iter().copied());

        for site_id in &container.site_ids {
            outcome.seeded += self.table.seed_global(*site_id).len();
        }
        outcome.seeded += self.table.seed_container(container).len();

        if previous.is_some() && !is_new {
            let report = self
                .tracker
                .invalidate(InvalidationScope::Container(container.id));
            outcome.invalidated = report.bumped.len();
        }

        let listed = self.sitemap.contains(container.id);
        outcome.sitemap = match (container.sitemap_eligible, listed) {
            (true, false) => {
                self.sitemap.add_container(container);
                SitemapChange::Added
            }
            (true, true) if previous.as_ref().is_some_and(|old| sitemap_differs(old, container)) => {
                self.sitemap.update_container(container);
                SitemapChange::Updated
            }
            (false, true) => {
                self.sitemap.remove_container(container.id);
                SitemapChange::Removed
            }
            _ => SitemapChange::Unchanged,
        };

        Ok(outcome)
    }

    async fn container_deleted(
        &self,
        container_id: ContainerId,
        kind: ContainerKind,
    ) -> Result<RoutingOutcome, DomainError> {
        let mut outcome = RoutingOutcome::new("container_deleted", container_id);

        if let Some(stored) = self.table.container(container_id).filter(|stored| stored.kind != kind) {
            warn!(
                container_id = %container_id,
                stored_kind = stored.kind.as_str(),
                event_kind = kind.as_str(),
                "Container kind mismatch on delete; deleting anyway"
            );
        }

        if let Some(removed) = self.table.remove_container(container_id) {
            outcome.removed_bundles = removed.removed_records.len();
        }

        let keys = self.tracker.forget_container(container_id);
        outcome.evicted = self.store.evict_many(&keys).await?;

        if self.sitemap.remove_container(container_id) {
            outcome.sitemap = SitemapChange::Removed;
        }

        Ok(outcome)
    }

    async fn item_saved(&self, item: &ContentItem, is_new: bool) -> Result<RoutingOutcome, DomainError> {
        let mut outcome = self
            .evict_item("item_saved", item.id, item.container_id, item.site_id)
            .await?;
        let at = item.updated_at.unwrap_or_else(OffsetDateTime::now_utc);
        if self.sitemap.touch(item.container_id, at) {
            outcome.sitemap = SitemapChange::Updated;
        }
        if is_new {
            info!(item_id = %item.id, uri = %item.uri, "New item reported");
        }
        Ok(outcome)
    }

    async fn item_deleted(
        &self,
        item_id: ItemId,
        container_id: ContainerId,
        site_id: SiteId,
    ) -> Result<RoutingOutcome, DomainError> {
        let mut outcome = self
            .evict_item("item_deleted", item_id, container_id, site_id)
            .await?;
        if self.sitemap.touch(container_id, OffsetDateTime::now_utc()) {
            outcome.sitemap = SitemapChange::Updated;
        }
        Ok(outcome)
    }

    async fn evict_item(
        &self,
        event: &'static str,
        item_id: ItemId,
        container_id: ContainerId,
        site_id: SiteId,
    ) -> Result<RoutingOutcome, DomainError> {
        let mut outcome = RoutingOutcome::new(event, container_id);
        if self.table.container(container_id).is_none() {
            warn!(container_id = %container_id, item_id = %item_id, "Item event for unknown container");
        }

        let report = self
            .tracker
            .invalidate(InvalidationScope::Item(ItemKey::new(item_id, site_id)));
        outcome.evicted = self.store.evict_many(&report.evict).await?;
        Ok(outcome)
    }
}

fn sitemap_differs(old: &ContentContainer, new: &ContentContainer) -> bool {
    old.handle != new.handle || old.kind != new.kind || old.site_ids != new.site_ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::config::CacheConfig;
    use crate::cache::registry::ArtifactIndex;
    use crate::cache::store::{Artifact, MemoryBackend};
    use crate::cache::keys::ArtifactKey;
    use crate::domain::bundle::{BundleKey, MetaSettings};
    use crate::domain::types::ArtifactKind;

    struct Fixture {
        table: Arc<BundleTable>,
        tracker: Arc<InvalidationTracker>,
        store: Arc<ArtifactStore>,
        sitemap: Arc<SitemapIndexBuilder>,
        router: EventRouter,
    }

    fn fixture() -> Fixture {
        let table = Arc::new(BundleTable::new(MetaSettings::new()));
        let tracker = Arc::new(InvalidationTracker::new(Arc::new(ArtifactIndex::new())));
        let store = Arc::new(ArtifactStore::new(
            Arc::new(MemoryBackend::new(&CacheConfig::default())),
            Arc::clone(&tracker),
        ));
        let sitemap = Arc::new(SitemapIndexBuilder::new());
        let router = EventRouter::new(
            Arc::clone(&table),
            Arc::clone(&tracker),
            Arc::clone(&store),
            Arc::clone(&sitemap),
        );
        Fixture {
            table,
            tracker,
            store,
            sitemap,
            router,
        }
    }

    fn section(id: u64) -> ContentContainer {
        ContentContainer::new(ContainerId(id), "news", ContainerKind::Section, [SiteId(1)])
    }

    fn saved(container: ContentContainer, is_new: bool) -> LifecycleEvent {
        LifecycleEvent::ContainerSaved { container, is_new }
    }

    async fn put_artifact(fx: &Fixture, container: u64, item: u64) -> ArtifactKey {
        let key = ArtifactKey::new(ContainerId(container), ItemId(item), SiteId(1), ArtifactKind::MetaTags);
        let stamp = fx.tracker.stamp_for(ContainerId(container), SiteId(1));
        fx.store
            .put(Artifact::new(key, "payload".to_string(), stamp))
            .await
            .expect("put");
        key
    }

    #[tokio::test]
    async fn new_container_seeds_bundles_and_sitemap() {
        let fx = fixture();
        let outcome = fx.router.handle(&saved(section(1), true)).await.expect("routed");

        assert_eq!(outcome.seeded, 4);
        assert_eq!(outcome.sitemap, SitemapChange::Added);
        assert!(fx.table.record(&BundleKey::container_site(ContainerId(1), SiteId(1))).is_some());
        assert!(fx.table.has_global(SiteId(1)));
    }

    #[tokio::test]
    async fn replaying_creation_changes_nothing() {
        let fx = fixture();
        fx.router.handle(&saved(section(1), true)).await.expect("first");
        let replay = fx.router.handle(&saved(section(1), true)).await.expect("replay");

        assert_eq!(replay.seeded, 0);
        assert_eq!(replay.invalidated, 0);
        assert_eq!(replay.sitemap, SitemapChange::Unchanged);
        assert_eq!(fx.sitemap.current_index().len(), 1);
    }

    #[tokio::test]
    async fn update_marks_existing_artifacts_stale() {
        let fx = fixture();
        fx.router.handle(&saved(section(1), true)).await.expect("create");
        let key = put_artifact(&fx, 1, 10).await;

        let outcome = fx.router.handle(&saved(section(1), false)).await.expect("update");

        assert_eq!(outcome.invalidated, 2);
        assert!(!fx.store.get(&key).await.expect("get").is_hit());
    }

    #[tokio::test]
    async fn update_for_unknown_container_behaves_like_creation() {
        let fx = fixture();
        let outcome = fx.router.handle(&saved(section(2), false)).await.expect("routed");

        assert_eq!(outcome.sitemap, SitemapChange::Added);
        assert_eq!(outcome.invalidated, 0);
        assert!(fx.table.container(ContainerId(2)).is_some());
    }

    #[tokio::test]
    async fn losing_sitemap_eligibility_removes_entry() {
        let fx = fixture();
        fx.router.handle(&saved(section(1), true)).await.expect("create");

        let mut hidden = section(1);
        hidden.sitemap_eligible = false;
        let outcome = fx.router.handle(&saved(hidden, false)).await.expect("update");

        assert_eq!(outcome.sitemap, SitemapChange::Removed);
        assert!(fx.sitemap.current_index().is_empty());
    }

    #[tokio::test]
    async fn delete_cascades_to_bundles_artifacts_and_sitemap() {
        let fx = fixture();
        fx.router.handle(&saved(section(1), true)).await.expect("create");
        put_artifact(&fx, 1, 10).await;
        put_artifact(&fx, 1, 11).await;

        let outcome = fx
            .router
            .handle(&LifecycleEvent::ContainerDeleted {
                container_id: ContainerId(1),
                kind: ContainerKind::CategoryGroup,
            })
            .await
            .expect("delete");

        assert_eq!(outcome.removed_bundles, 2);
        assert_eq!(outcome.evicted, 2);
        assert_eq!(outcome.sitemap, SitemapChange::Removed);
        assert!(fx.table.container(ContainerId(1)).is_none());
        assert_eq!(fx.store.len().await.expect("len"), 0);
        assert!(fx.router.container_locks.is_empty());
    }

    #[tokio::test]
    async fn item_events_evict_only_that_item() {
        let fx = fixture();
        fx.router.handle(&saved(section(1), true)).await.expect("create");
        let edited = put_artifact(&fx, 1, 10).await;
        let sibling = put_artifact(&fx, 1, 11).await;
        let container_version = fx.tracker.version(&BundleKey::container(ContainerId(1)));

        let item = ContentItem::new(ItemId(10), ContainerId(1), SiteId(1), "news/a");
        let outcome = fx
            .router
            .handle(&LifecycleEvent::ItemSaved { item, is_new: false })
            .await
            .expect("item saved");

        assert_eq!(outcome.evicted, 1);
        assert_eq!(outcome.invalidated, 0);
        assert_eq!(outcome.sitemap, SitemapChange::Updated);
        assert!(!fx.store.get(&edited).await.expect("get").is_hit());
        assert!(fx.store.get(&sibling).await.expect("get").is_hit());
        assert_eq!(
            fx.tracker.version(&BundleKey::container(ContainerId(1))),
            container_version
        );
    }
}
