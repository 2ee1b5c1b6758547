use std::sync::Arc;

use seoforge::application::render::StandardRenderer;
use seoforge::application::runtime::{RuntimeOptions, SeoRuntime};
use seoforge::application::seo::ArtifactRequest;
use seoforge::cache::{ArtifactKey, InvalidationScope, LifecycleEvent, Lookup, MissReason, SitemapChange};
use seoforge::domain::bundle::{BundleKey, MetaField, MetaSettings};
use seoforge::domain::entities::{ContentContainer, ContentItem, Site};
use seoforge::domain::error::DomainError;
use seoforge::domain::types::{ArtifactKind, ContainerId, ContainerKind, ItemId, SiteId};
use url::Url;

fn site(id: u64, host: &str) -> Site {
    Site {
        id: SiteId(id),
        handle: format!("site-{id}"),
        name: format!("Site {id}"),
        base_url: Url::parse(&format!("https://{host}/")).expect("url"),
        language: "en".to_string(),
    }
}

fn runtime() -> SeoRuntime {
    let options = RuntimeOptions {
        defaults: MetaSettings::new().with(MetaField::Description, "Welcome"),
        sites: vec![site(1, "one.example"), site(2, "two.example")],
        ..Default::default()
    };
    let runtime = SeoRuntime::new(options, Arc::new(StandardRenderer::new()));
    runtime.seed_sites();
    runtime
}

fn section(id: u64, handle: &str, sites: &[u64]) -> ContentContainer {
    ContentContainer::new(
        ContainerId(id),
        handle,
        ContainerKind::Section,
        sites.iter().copied().map(SiteId),
    )
}

fn item(id: u64, container: u64, site: u64) -> ContentItem {
    ContentItem::new(ItemId(id), ContainerId(container), SiteId(site), format!("posts/{id}"))
        .with_title(format!("Post {id}"))
}

async fn save(runtime: &SeoRuntime, container: ContentContainer, is_new: bool) -> seoforge::cache::RoutingOutcome {
    runtime
        .router
        .handle(&LifecycleEvent::ContainerSaved { container, is_new })
        .await
        .expect("container saved")
}

#[tokio::test]
async fn new_container_seeds_bundles_and_lists_in_sitemap() {
    let runtime = runtime();
    let outcome = save(&runtime, section(10, "news", &[1, 2]), true).await;

    // Container-wide record plus one per site; globals were seeded up front.
    assert_eq!(outcome.seeded, 3);
    assert_eq!(outcome.invalidated, 0);
    assert_eq!(outcome.sitemap, SitemapChange::Added);
    assert!(runtime.table.record(&BundleKey::container(ContainerId(10))).is_some());
    assert!(
        runtime
            .table
            .record(&BundleKey::container_site(ContainerId(10), SiteId(2)))
            .is_some()
    );

    let bundle = runtime.seo.bundle(ContainerId(10), SiteId(1)).expect("bundle");
    assert_eq!(bundle.value(MetaField::Description), "Welcome");
}

#[tokio::test]
async fn repeated_requests_return_the_cached_artifact() {
    let runtime = runtime();
    save(&runtime, section(10, "news", &[1]), true).await;

    let request = ArtifactRequest::new(item(1, 10, 1), ArtifactKind::MetaTags);
    let first = runtime.seo.artifact(&request).await.expect("first");
    let second = runtime.seo.artifact(&request).await.expect("second");

    assert!(Arc::ptr_eq(&first, &second));
    assert!(first.payload.contains("<title>Post 1 | Site 1</title>"));
    assert!(first.payload.contains("content=\"Welcome\""));
}

#[tokio::test]
async fn container_update_marks_artifacts_stale_without_removing_them() {
    let runtime = runtime();
    save(&runtime, section(10, "news", &[1]), true).await;
    let request = ArtifactRequest::new(item(1, 10, 1), ArtifactKind::JsonLd);
    let before = runtime.seo.artifact(&request).await.expect("artifact");

    let outcome = save(&runtime, section(10, "news", &[1]), false).await;
    assert!(outcome.invalidated > 0);
    assert_eq!(outcome.evicted, 0);

    assert_eq!(runtime.store.len().await.expect("len"), 1);
    let lookup = runtime.store.get(&request.key()).await.expect("lookup");
    assert!(matches!(lookup, Lookup::Miss(MissReason::Stale)));

    let after = runtime.seo.artifact(&request).await.expect("rebuilt");
    assert!(!Arc::ptr_eq(&before, &after));
    assert_ne!(before.source_bundle_version, after.source_bundle_version);
    assert_eq!(runtime.store.len().await.expect("len"), 1);
}

#[tokio::test]
async fn invalidating_a_stale_scope_again_is_a_no_op() {
    let runtime = runtime();
    save(&runtime, section(10, "news", &[1]), true).await;
    let request = ArtifactRequest::new(item(1, 10, 1), ArtifactKind::MetaTags);
    runtime.seo.artifact(&request).await.expect("artifact");

    let scope = InvalidationScope::Container(ContainerId(10));
    let first = runtime.tracker.invalidate(scope);
    let second = runtime.tracker.invalidate(scope);
    assert!(!first.bumped.is_empty());
    assert!(second.bumped.is_empty());

    // A rebuild consumes the stale mark, so the next change counts again.
    runtime.seo.artifact(&request).await.expect("rebuilt");
    assert!(!runtime.tracker.invalidate(scope).bumped.is_empty());
}

#[tokio::test]
async fn global_update_reaches_every_container_on_the_site() {
    let runtime = runtime();
    save(&runtime, section(10, "news", &[1]), true).await;
    save(&runtime, section(11, "blog", &[1]), true).await;

    let news = ArtifactRequest::new(item(1, 10, 1), ArtifactKind::MetaTags);
    let blog = ArtifactRequest::new(item(2, 11, 1), ArtifactKind::MetaTags);
    runtime.seo.artifact(&news).await.expect("news");
    runtime.seo.artifact(&blog).await.expect("blog");

    runtime
        .seo
        .update_bundle(
            BundleKey::global_site(SiteId(1)),
            MetaSettings::new().with(MetaField::Description, "Updated"),
        )
        .expect("update");

    for request in [&news, &blog] {
        let lookup = runtime.store.get(&request.key()).await.expect("lookup");
        assert!(matches!(lookup, Lookup::Miss(MissReason::Stale)));
        let rebuilt = runtime.seo.artifact(request).await.expect("rebuilt");
        assert!(rebuilt.payload.contains("content=\"Updated\""));
    }
}

#[tokio::test]
async fn item_save_evicts_only_that_item() {
    let runtime = runtime();
    save(&runtime, section(10, "news", &[1]), true).await;
    let first = ArtifactRequest::new(item(1, 10, 1), ArtifactKind::MetaTags);
    let first_ld = ArtifactRequest::new(item(1, 10, 1), ArtifactKind::JsonLd);
    let other = ArtifactRequest::new(item(2, 10, 1), ArtifactKind::MetaTags);
    for request in [&first, &first_ld, &other] {
        runtime.seo.artifact(request).await.expect("artifact");
    }

    let outcome = runtime
        .router
        .handle(&LifecycleEvent::ItemSaved {
            item: item(1, 10, 1),
            is_new: false,
        })
        .await
        .expect("item saved");

    assert_eq!(outcome.evicted, 2);
    assert_eq!(outcome.sitemap, SitemapChange::Updated);
    assert!(matches!(
        runtime.store.get(&first.key()).await.expect("lookup"),
        Lookup::Miss(MissReason::Absent)
    ));
    assert!(runtime.store.get(&other.key()).await.expect("lookup").is_hit());
}

#[tokio::test]
async fn container_delete_cascades_to_bundles_artifacts_and_sitemap() {
    let runtime = runtime();
    save(&runtime, section(10, "news", &[1, 2]), true).await;
    for site_id in [1, 2] {
        let request = ArtifactRequest::new(item(1, 10, site_id), ArtifactKind::MetaTags);
        runtime.seo.artifact(&request).await.expect("artifact");
    }

    let outcome = runtime
        .router
        .handle(&LifecycleEvent::ContainerDeleted {
            container_id: ContainerId(10),
            kind: ContainerKind::Section,
        })
        .await
        .expect("deleted");

    assert_eq!(outcome.removed_bundles, 3);
    assert_eq!(outcome.evicted, 2);
    assert_eq!(outcome.sitemap, SitemapChange::Removed);
    assert_eq!(runtime.store.len().await.expect("len"), 0);
    assert!(runtime.table.container(ContainerId(10)).is_none());
    assert!(runtime.sitemap.current_index().is_empty());

    let request = ArtifactRequest::new(item(1, 10, 1), ArtifactKind::MetaTags);
    let error = runtime.seo.artifact(&request).await.expect_err("gone");
    assert!(matches!(error, DomainError::NotFound { .. }));
}

#[tokio::test]
async fn sitemap_keeps_creation_order_after_removal() {
    let runtime = runtime();
    save(&runtime, section(1, "alpha", &[1]), true).await;
    save(&runtime, section(2, "bravo", &[1]), true).await;
    save(&runtime, section(3, "charlie", &[1]), true).await;

    runtime
        .router
        .handle(&LifecycleEvent::ContainerDeleted {
            container_id: ContainerId(1),
            kind: ContainerKind::Section,
        })
        .await
        .expect("deleted");

    let ids: Vec<_> = runtime
        .sitemap
        .current_index()
        .into_iter()
        .map(|entry| entry.container_id)
        .collect();
    assert_eq!(ids, vec![ContainerId(2), ContainerId(3)]);

    let xml = runtime.sitemap_service.sitemap_xml(SiteId(1)).expect("xml");
    let bravo = xml.find("sitemaps/bravo-1.xml").expect("bravo listed");
    let charlie = xml.find("sitemaps/charlie-1.xml").expect("charlie listed");
    assert!(bravo < charlie);
    assert!(!xml.contains("alpha"));
}

#[tokio::test]
async fn global_chain_artifact_is_dropped_once_container_appears() {
    let runtime = runtime();
    let request =
        ArtifactRequest::new(item(1, 42, 1), ArtifactKind::MetaTags).with_global_fallback();
    let fallback = runtime.seo.artifact(&request).await.expect("fallback");
    assert!(fallback.global_chain);

    let outcome = save(&runtime, section(42, "late", &[1]), false).await;
    assert_eq!(outcome.evicted, 1);

    let rebuilt = runtime.seo.artifact(&request).await.expect("rebuilt");
    assert!(!rebuilt.global_chain);
}

#[tokio::test]
async fn unknown_container_without_fallback_is_not_found() {
    let runtime = runtime();
    let request = ArtifactRequest::new(item(1, 99, 1), ArtifactKind::MetaTags);
    let error = runtime.seo.artifact(&request).await.expect_err("missing");
    assert!(matches!(error, DomainError::NotFound { .. }));
    assert_eq!(runtime.store.len().await.expect("len"), 0);
}

#[tokio::test]
async fn queued_events_apply_in_order() {
    let runtime = runtime();
    runtime.queue.publish(LifecycleEvent::ContainerSaved {
        container: section(5, "docs", &[1]),
        is_new: true,
    });
    runtime.queue.publish(LifecycleEvent::ContainerDeleted {
        container_id: ContainerId(5),
        kind: ContainerKind::Section,
    });

    let report = runtime.consumer.consume_all().await;
    assert_eq!(report.processed, 2);
    assert_eq!(report.failed, 0);
    assert!(runtime.queue.is_empty());
    assert!(runtime.table.container(ContainerId(5)).is_none());
    assert!(!runtime.sitemap.contains(ContainerId(5)));

    let key = ArtifactKey::new(ContainerId(5), ItemId(1), SiteId(1), ArtifactKind::MetaTags);
    assert!(matches!(
        runtime.store.get(&key).await.expect("lookup"),
        Lookup::Miss(MissReason::Absent)
    ));
}
