//! Render entry point: serves artifacts from the cache and builds them on a
//! miss, plus the bundle editing and cache administration surface.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::cache::{Artifact, ArtifactKey, ArtifactStore, InvalidationScope, InvalidationTracker};
use crate::domain::bundle::{BundleKey, BundleRecord, MetaBundle, MetaSettings};
use crate::domain::entities::{ContentItem, Site};
use crate::domain::error::DomainError;
use crate::domain::types::{ArtifactKind, ContainerId, SiteId};

use super::bundles::BundleTable;
use super::render::{ArtifactRenderer, RenderRequest};
use super::resolver::BundleResolver;
use super::site::SiteDirectory;

/// One artifact requested by the render layer.
#[derive(Debug, Clone)]
pub struct ArtifactRequest {
    pub item: ContentItem,
    pub kind: ArtifactKind,
    /// Render against the global chain when the container is unknown or
    /// not published to the item's site.
    pub fallback_to_global: bool,
}

impl ArtifactRequest {
    pub fn new(item: ContentItem, kind: ArtifactKind) -> Self {
        Self {
            item,
            kind,
            fallback_to_global: false,
        }
    }

    pub fn with_global_fallback(mut self) -> Self {
        self.fallback_to_global = true;
        self
    }

    pub fn key(&self) -> ArtifactKey {
        ArtifactKey::new(self.item.container_id, self.item.id, self.item.site_id, self.kind)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    pub invalidated: bool,
    pub evicted: usize,
}

pub struct SeoService {
    sites: Arc<SiteDirectory>,
    table: Arc<BundleTable>,
    resolver: Arc<BundleResolver>,
    tracker: Arc<InvalidationTracker>,
    store: Arc<ArtifactStore>,
    renderer: Arc<dyn ArtifactRenderer>,
}

impl SeoService {
    pub fn new(
        sites: Arc<SiteDirectory>,
        table: Arc<BundleTable>,
        resolver: Arc<BundleResolver>,
        store: Arc<ArtifactStore>,
        renderer: Arc<dyn ArtifactRenderer>,
    ) -> Self {
        let tracker = Arc::clone(store.tracker());
        Self {
            sites,
            table,
            resolver,
            tracker,
            store,
            renderer,
        }
    }

    pub fn sites(&self) -> &SiteDirectory {
        &self.sites
    }

    /// Create the global bundles of `site_id` if they are missing.
    /// Returns true when anything was created.
    pub fn ensure_seeded(&self, site_id: SiteId) -> Result<bool, DomainError> {
        self.sites.get(site_id)?;
        Ok(!self.table.seed_global(site_id).is_empty())
    }

    /// Return a fresh artifact, building and storing it on a miss.
    #[instrument(skip(self, request), fields(artifact_key = %request.key()))]
    pub async fn artifact(&self, request: &ArtifactRequest) -> Result<Arc<Artifact>, DomainError> {
        let site = self.sites.get(request.item.site_id)?;
        self.ensure_seeded(site.id)?;

        let key = request.key();
        self.store
            .get_or_build(key, || self.build(key, request, site))
            .await
    }

    async fn build(
        &self,
        key: ArtifactKey,
        request: &ArtifactRequest,
        site: &Site,
    ) -> Result<Artifact, DomainError> {
        let item = &request.item;
        let (bundle, global_chain) = match self.resolve_with_reseed(item.container_id, site.id) {
            Ok(bundle) => (bundle, false),
            Err(DomainError::NotFound { entity, id }) if request.fallback_to_global => {
                info!(
                    artifact_key = %key,
                    entity,
                    id = %id,
                    "Rendering against global bundle"
                );
                (self.resolve_global_with_reseed(site.id)?, true)
            }
            Err(error) => return Err(error),
        };

        let payload = self
            .renderer
            .render(&RenderRequest {
                kind: key.kind,
                site,
                item,
                bundle: &bundle,
            })
            .await
            .map_err(|error| DomainError::computation_failed(key, error.to_string()))?;

        let artifact = Artifact::new(key, payload, bundle.stamp);
        Ok(if global_chain {
            artifact.from_global_chain()
        } else {
            artifact
        })
    }

    /// Resolve the bundle of a container on a site.
    pub fn bundle(&self, container_id: ContainerId, site_id: SiteId) -> Result<MetaBundle, DomainError> {
        self.sites.get(site_id)?;
        self.resolve_with_reseed(container_id, site_id)
    }

    pub fn global_bundle(&self, site_id: SiteId) -> Result<MetaBundle, DomainError> {
        self.sites.get(site_id)?;
        self.resolve_global_with_reseed(site_id)
    }

    fn resolve_with_reseed(
        &self,
        container_id: ContainerId,
        site_id: SiteId,
    ) -> Result<MetaBundle, DomainError> {
        match self.resolver.resolve(container_id, site_id) {
            Err(DomainError::InconsistentState { message }) => {
                self.reseed(site_id, &message);
                self.resolver.resolve(container_id, site_id)
            }
            other => other,
        }
    }

    fn resolve_global_with_reseed(&self, site_id: SiteId) -> Result<MetaBundle, DomainError> {
        match self.resolver.resolve_global(site_id) {
            Err(DomainError::InconsistentState { message }) => {
                self.reseed(site_id, &message);
                self.resolver.resolve_global(site_id)
            }
            other => other,
        }
    }

    fn reseed(&self, site_id: SiteId, message: &str) {
        error!(
            site_id = %site_id,
            reason = message,
            "Bundle state inconsistent; re-seeding global bundles"
        );
        self.table.seed_global(site_id);
    }

    /// Replace the overrides under `key` and mark dependent artifacts stale.
    #[instrument(skip(self, settings), fields(bundle_key = %key))]
    pub fn update_bundle(
        &self,
        key: BundleKey,
        settings: MetaSettings,
    ) -> Result<BundleRecord, DomainError> {
        if let Some(site_id) = key.site_id() {
            self.sites.get(site_id)?;
        }
        let record = self.table.set_settings(key, settings)?;
        let report = self.tracker.invalidate(InvalidationScope::Bundle(key));
        info!(
            bundle_key = %key,
            fields = record.settings.len(),
            bumped = report.bumped.len(),
            "Bundle settings updated"
        );
        Ok(record)
    }

    /// Mark every stored artifact stale without removing it.
    pub fn invalidate_all(&self) -> bool {
        let report = self.tracker.invalidate(InvalidationScope::All);
        !report.bumped.is_empty()
    }

    pub async fn evict_all(&self) -> Result<usize, DomainError> {
        let evicted = self.store.evict_all().await?;
        warn!(evicted, "Artifact cache emptied");
        Ok(evicted)
    }

    pub async fn clear_caches(&self) -> Result<ClearReport, DomainError> {
        let invalidated = self.invalidate_all();
        let evicted = self.evict_all().await?;
        Ok(ClearReport {
            invalidated,
            evicted,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use url::Url;

    use super::*;
    use crate::application::render::{RenderError, StandardRenderer};
    use crate::application::resolver::PrecedencePolicy;
    use crate::cache::{ArtifactIndex, CacheConfig, MemoryBackend};
    use crate::domain::bundle::MetaField;
    use crate::domain::entities::ContentContainer;
    use crate::domain::types::{ContainerKind, ItemId};

    const C: ContainerId = ContainerId(4);
    const S: SiteId = SiteId(1);

    struct FailingRenderer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ArtifactRenderer for FailingRenderer {
        async fn render(&self, _request: &RenderRequest<'_>) -> Result<String, RenderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(RenderError::Unavailable {
                message: "template engine offline".to_string(),
            })
        }
    }

    fn service_with(renderer: Arc<dyn ArtifactRenderer>) -> (Arc<BundleTable>, SeoService) {
        let sites = Arc::new(SiteDirectory::new([Site {
            id: S,
            handle: "default".to_string(),
            name: "Example".to_string(),
            base_url: Url::parse("https://example.com").expect("url"),
            language: "en".to_string(),
        }]));
        let table = Arc::new(BundleTable::new(MetaSettings::new()));
        let tracker = Arc::new(InvalidationTracker::new(Arc::new(ArtifactIndex::new())));
        let store = Arc::new(ArtifactStore::new(
            Arc::new(MemoryBackend::new(&CacheConfig::default())),
            Arc::clone(&tracker),
        ));
        let resolver = Arc::new(BundleResolver::new(
            Arc::clone(&table),
            tracker,
            PrecedencePolicy::default(),
        ));
        let service = SeoService::new(sites, Arc::clone(&table), resolver, store, renderer);
        (table, service)
    }

    fn service() -> (Arc<BundleTable>, SeoService) {
        service_with(Arc::new(StandardRenderer::new()))
    }

    fn item() -> ContentItem {
        ContentItem::new(ItemId(1), C, S, "news/launch").with_title("Launch")
    }

    fn register_container(table: &BundleTable) {
        let container = ContentContainer::new(C, "news", ContainerKind::Section, [S]);
        table.upsert_container(container.clone());
        table.seed_container(&container);
    }

    #[test]
    fn ensure_seeded_is_idempotent() {
        let (_, service) = service();
        assert!(service.ensure_seeded(S).expect("seed"));
        assert!(!service.ensure_seeded(S).expect("seed again"));
        assert!(matches!(
            service.ensure_seeded(SiteId(9)),
            Err(DomainError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn artifact_is_built_once_then_served_from_cache() {
        let (table, service) = service();
        register_container(&table);
        let request = ArtifactRequest::new(item(), ArtifactKind::MetaTags);

        let first = service.artifact(&request).await.expect("build");
        let second = service.artifact(&request).await.expect("hit");
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.payload.contains("<title>Launch | Example</title>"));
    }

    #[tokio::test]
    async fn unknown_container_is_not_found_without_fallback() {
        let (_, service) = service();
        let request = ArtifactRequest::new(item(), ArtifactKind::MetaTags);
        assert!(matches!(
            service.artifact(&request).await,
            Err(DomainError::NotFound { .. })
        ));

        let fallback = service
            .artifact(&request.with_global_fallback())
            .await
            .expect("global fallback");
        assert!(fallback.global_chain);
    }

    #[tokio::test]
    async fn bundle_update_makes_cached_artifact_stale() {
        let (table, service) = service();
        register_container(&table);
        let request = ArtifactRequest::new(item(), ArtifactKind::MetaTags);
        service.artifact(&request).await.expect("build");

        service
            .update_bundle(
                BundleKey::container(C),
                MetaSettings::new().with(MetaField::Description, "Company news"),
            )
            .expect("update");

        let rebuilt = service.artifact(&request).await.expect("rebuild");
        assert!(rebuilt.payload.contains("Company news"));
    }

    #[tokio::test]
    async fn render_failure_surfaces_as_computation_failed_and_is_retried() {
        let renderer = Arc::new(FailingRenderer {
            calls: AtomicUsize::new(0),
        });
        let (table, service) = service_with(renderer.clone());
        register_container(&table);
        let request = ArtifactRequest::new(item(), ArtifactKind::JsonLd);

        for _ in 0..2 {
            assert!(matches!(
                service.artifact(&request).await,
                Err(DomainError::ComputationFailed { .. })
            ));
        }
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn clear_caches_reports_evictions() {
        let (table, service) = service();
        register_container(&table);
        service
            .artifact(&ArtifactRequest::new(item(), ArtifactKind::MetaTags))
            .await
            .expect("build");

        let report = service.clear_caches().await.expect("clear");
        assert!(report.invalidated);
        assert_eq!(report.evicted, 1);
    }
}
