//! Wiring of the SEO subsystem. Every component receives its collaborators
//! here; nothing is reachable through process-wide state.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::cache::{
    ArtifactBackend, ArtifactIndex, ArtifactStore, CacheConfig, EventConsumer, EventQueue,
    EventRouter, InvalidationTracker, MemoryBackend,
};
use crate::domain::bundle::MetaSettings;
use crate::domain::entities::Site;
use crate::infra::error::InfraError;

use super::bundles::BundleTable;
use super::render::ArtifactRenderer;
use super::resolver::{BundleResolver, PrecedencePolicy};
use super::seo::SeoService;
use super::site::SiteDirectory;
use super::sitemap::{SitemapIndexBuilder, SitemapService};
use super::snapshot::StateSnapshot;

#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    pub cache: CacheConfig,
    /// Values of the global all-sites bundle when it is first seeded.
    pub defaults: MetaSettings,
    pub precedence: PrecedencePolicy,
    pub sites: Vec<Site>,
}

#[derive(Clone)]
pub struct SeoRuntime {
    pub sites: Arc<SiteDirectory>,
    pub table: Arc<BundleTable>,
    pub tracker: Arc<InvalidationTracker>,
    pub store: Arc<ArtifactStore>,
    pub resolver: Arc<BundleResolver>,
    pub sitemap: Arc<SitemapIndexBuilder>,
    pub sitemap_service: SitemapService,
    pub router: Arc<EventRouter>,
    pub queue: Arc<EventQueue>,
    pub consumer: Arc<EventConsumer>,
    pub seo: Arc<SeoService>,
}

impl SeoRuntime {
    /// Runtime backed by the in-process LRU artifact backend.
    pub fn new(options: RuntimeOptions, renderer: Arc<dyn ArtifactRenderer>) -> Self {
        let backend = Arc::new(MemoryBackend::new(&options.cache));
        Self::with_backend(options, backend, renderer)
    }

    pub fn with_backend(
        options: RuntimeOptions,
        backend: Arc<dyn ArtifactBackend>,
        renderer: Arc<dyn ArtifactRenderer>,
    ) -> Self {
        let RuntimeOptions {
            cache,
            defaults,
            precedence,
            sites,
        } = options;

        let sites = Arc::new(SiteDirectory::new(sites));
        let table = Arc::new(BundleTable::new(defaults));
        let tracker = Arc::new(InvalidationTracker::new(Arc::new(ArtifactIndex::new())));
        let store = Arc::new(ArtifactStore::new(backend, Arc::clone(&tracker)));
        let resolver = Arc::new(BundleResolver::new(
            Arc::clone(&table),
            Arc::clone(&tracker),
            precedence,
        ));
        let sitemap = Arc::new(SitemapIndexBuilder::new());
        let sitemap_service = SitemapService::new(Arc::clone(&sitemap), Arc::clone(&sites));
        let router = Arc::new(EventRouter::new(
            Arc::clone(&table),
            Arc::clone(&tracker),
            Arc::clone(&store),
            Arc::clone(&sitemap),
        ));
        let queue = Arc::new(EventQueue::new());
        let consumer = Arc::new(EventConsumer::new(
            cache,
            Arc::clone(&queue),
            Arc::clone(&router),
        ));
        let seo = Arc::new(SeoService::new(
            Arc::clone(&sites),
            Arc::clone(&table),
            Arc::clone(&resolver),
            Arc::clone(&store),
            renderer,
        ));

        Self {
            sites,
            table,
            tracker,
            store,
            resolver,
            sitemap,
            sitemap_service,
            router,
            queue,
            consumer,
            seo,
        }
    }

    /// Seed the global bundles of every configured site.
    pub fn seed_sites(&self) -> usize {
        self.sites
            .iter()
            .map(|site| self.table.seed_global(site.id).len())
            .sum()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot::new(self.table.snapshot(), self.sitemap.snapshot())
    }

    /// Replace bundle and sitemap state. The tracker learns the restored
    /// containers' sites so container invalidation reaches every site.
    pub fn restore(&self, snapshot: StateSnapshot) -> Result<(), InfraError> {
        let (table, sitemap) = snapshot.into_parts()?;
        for container in &table.containers {
            self.tracker
                .track_sites(container.id, container.site_ids.iter().copied());
        }
        info!(
            containers = table.containers.len(),
            bundles = table.records.len(),
            sitemap_entries = sitemap.len(),
            "State restored"
        );
        self.table.restore(table);
        self.sitemap.restore(sitemap);
        Ok(())
    }

    /// Restore from `path` if it exists. Returns whether anything was loaded.
    pub fn restore_from(&self, path: &Path) -> Result<bool, InfraError> {
        match StateSnapshot::load(path)? {
            Some(snapshot) => {
                self.restore(snapshot)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn flush_to(&self, path: &Path) -> Result<(), InfraError> {
        self.snapshot().save(path)
    }
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;
    use crate::application::render::StandardRenderer;
    use crate::cache::LifecycleEvent;
    use crate::domain::entities::ContentContainer;
    use crate::domain::types::{ContainerId, ContainerKind, SiteId};

    fn options() -> RuntimeOptions {
        RuntimeOptions {
            sites: vec![Site {
                id: SiteId(1),
                handle: "default".to_string(),
                name: "Example".to_string(),
                base_url: Url::parse("https://example.com").expect("url"),
                language: "en".to_string(),
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn state_survives_flush_and_restore() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.toml");

        let runtime = SeoRuntime::new(options(), Arc::new(StandardRenderer::new()));
        runtime
            .router
            .handle(&LifecycleEvent::ContainerSaved {
                container: ContentContainer::new(
                    ContainerId(3),
                    "news",
                    ContainerKind::Section,
                    [SiteId(1)],
                ),
                is_new: true,
            })
            .await
            .expect("route");
        runtime.flush_to(&path).expect("flush");

        let restored = SeoRuntime::new(options(), Arc::new(StandardRenderer::new()));
        assert!(restored.restore_from(&path).expect("restore"));
        assert!(restored.table.container(ContainerId(3)).is_some());
        assert_eq!(restored.sitemap.current_index().len(), 1);
        assert!(restored.resolver.resolve(ContainerId(3), SiteId(1)).is_ok());
    }

    #[test]
    fn seed_sites_creates_global_bundles_once() {
        let runtime = SeoRuntime::new(options(), Arc::new(StandardRenderer::new()));
        assert_eq!(runtime.seed_sites(), 2);
        assert_eq!(runtime.seed_sites(), 0);
    }
}
