use std::collections::HashSet;
use std::sync::Arc;

use metrics_util::debugging::DebuggingRecorder;
use seoforge::application::render::StandardRenderer;
use seoforge::application::runtime::{RuntimeOptions, SeoRuntime};
use seoforge::application::seo::ArtifactRequest;
use seoforge::cache::LifecycleEvent;
use seoforge::domain::bundle::{BundleKey, MetaField, MetaSettings};
use seoforge::domain::entities::{ContentContainer, ContentItem, Site};
use seoforge::domain::types::{ArtifactKind, ContainerId, ContainerKind, ItemId, SiteId};
use url::Url;

#[tokio::test]
async fn artifact_and_event_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let options = RuntimeOptions {
        sites: vec![Site {
            id: SiteId(1),
            handle: "main".to_string(),
            name: "Main".to_string(),
            base_url: Url::parse("https://main.example/").expect("url"),
            language: "en".to_string(),
        }],
        ..Default::default()
    };
    let runtime = SeoRuntime::new(options, Arc::new(StandardRenderer::new()));
    runtime.seed_sites();

    runtime.queue.publish(LifecycleEvent::ContainerSaved {
        container: ContentContainer::new(ContainerId(1), "news", ContainerKind::Section, [SiteId(1)]),
        is_new: true,
    });
    assert_eq!(runtime.consumer.consume().await.processed, 1);

    let item = ContentItem::new(ItemId(1), ContainerId(1), SiteId(1), "news/first");
    let meta = ArtifactRequest::new(item.clone(), ArtifactKind::MetaTags);
    runtime.seo.artifact(&meta).await.expect("miss then build");
    runtime.seo.artifact(&meta).await.expect("hit");

    runtime
        .seo
        .update_bundle(
            BundleKey::container(ContainerId(1)),
            MetaSettings::new().with(MetaField::Robots, "noindex"),
        )
        .expect("update");
    runtime.seo.artifact(&meta).await.expect("stale then rebuild");

    runtime
        .seo
        .update_bundle(
            BundleKey::container(ContainerId(1)),
            MetaSettings::new().with(MetaField::SitemapPriority, "7"),
        )
        .expect("update");
    let fragment = ArtifactRequest::new(item, ArtifactKind::SitemapFragment);
    assert!(runtime.seo.artifact(&fragment).await.is_err());

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "seoforge_artifact_hit_total",
        "seoforge_artifact_miss_total",
        "seoforge_artifact_stale_total",
        "seoforge_artifact_build_failed_total",
        "seoforge_artifact_build_ms",
        "seoforge_event_routed_total",
        "seoforge_event_queue_len",
        "seoforge_event_consume_ms",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
