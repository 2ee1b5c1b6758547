use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    application::{
        error::HttpError,
        runtime::SeoRuntime,
        seo::{ClearReport, SeoService},
        sitemap::{SitemapIndexBuilder, SitemapIndexEntry},
    },
    cache::{ArtifactStore, ConsumeReport, EventConsumer, EventQueue, EventRouter, LifecycleEvent, RoutingOutcome},
    domain::{
        bundle::{BundleKey, BundleRecord, MetaBundle, MetaSettings},
        types::{ContainerId, SiteId},
    },
};

use super::middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct AdminState {
    pub seo: Arc<SeoService>,
    pub router: Arc<EventRouter>,
    pub queue: Arc<EventQueue>,
    pub consumer: Arc<EventConsumer>,
    pub store: Arc<ArtifactStore>,
    pub sitemap: Arc<SitemapIndexBuilder>,
}

impl AdminState {
    pub fn from_runtime(runtime: &SeoRuntime) -> Self {
        Self {
            seo: Arc::clone(&runtime.seo),
            router: Arc::clone(&runtime.router),
            queue: Arc::clone(&runtime.queue),
            consumer: Arc::clone(&runtime.consumer),
            store: Arc::clone(&runtime.store),
            sitemap: Arc::clone(&runtime.sitemap),
        }
    }
}

pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/events", post(route_event))
        .route("/events/queue", post(enqueue_event))
        .route("/events/consume", post(consume_events))
        .route("/cache/invalidate", post(invalidate_cache))
        .route("/cache/evict", post(evict_cache))
        .route("/cache/clear", post(clear_cache))
        .route("/bundles/global", put(put_global))
        .route(
            "/bundles/global/{site}",
            get(get_global).put(put_global_site),
        )
        .route("/bundles/containers/{container}", put(put_container))
        .route(
            "/bundles/containers/{container}/sites/{site}",
            put(put_container_site),
        )
        .route("/bundles/{container}/{site}", get(get_bundle))
        .route("/sitemap/index", get(sitemap_index))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

#[derive(Debug, Serialize)]
struct HealthView {
    status: &'static str,
    artifacts: usize,
    queued_events: usize,
    pending_builds: usize,
    sitemap_entries: usize,
}

async fn health(State(state): State<AdminState>) -> Result<Json<HealthView>, HttpError> {
    let artifacts = state.store.len().await?;
    Ok(Json(HealthView {
        status: "ok",
        artifacts,
        queued_events: state.queue.len(),
        pending_builds: state.store.pending_builds(),
        sitemap_entries: state.sitemap.current_index().len(),
    }))
}

async fn route_event(
    State(state): State<AdminState>,
    Json(event): Json<LifecycleEvent>,
) -> Result<Json<RoutingOutcome>, HttpError> {
    Ok(Json(state.router.handle(&event).await?))
}

#[derive(Debug, Serialize)]
struct EnqueuedView {
    id: Uuid,
    queued_events: usize,
}

async fn enqueue_event(
    State(state): State<AdminState>,
    Json(event): Json<LifecycleEvent>,
) -> Response {
    let id = state.queue.publish(event);
    let view = EnqueuedView {
        id,
        queued_events: state.queue.len(),
    };
    (StatusCode::ACCEPTED, Json(view)).into_response()
}

async fn consume_events(State(state): State<AdminState>) -> Json<ConsumeReport> {
    Json(state.consumer.consume_all().await)
}

async fn invalidate_cache(State(state): State<AdminState>) -> Json<serde_json::Value> {
    Json(json!({ "invalidated": state.seo.invalidate_all() }))
}

async fn evict_cache(
    State(state): State<AdminState>,
) -> Result<Json<serde_json::Value>, HttpError> {
    let evicted = state.seo.evict_all().await?;
    Ok(Json(json!({ "evicted": evicted })))
}

async fn clear_cache(State(state): State<AdminState>) -> Result<Json<ClearReport>, HttpError> {
    Ok(Json(state.seo.clear_caches().await?))
}

async fn get_bundle(
    State(state): State<AdminState>,
    Path((container, site)): Path<(u64, u64)>,
) -> Result<Json<MetaBundle>, HttpError> {
    Ok(Json(
        state
            .seo
            .bundle(ContainerId::from(container), SiteId::from(site))?,
    ))
}

async fn get_global(
    State(state): State<AdminState>,
    Path(site): Path<u64>,
) -> Result<Json<MetaBundle>, HttpError> {
    Ok(Json(state.seo.global_bundle(SiteId::from(site))?))
}

async fn put_global(
    State(state): State<AdminState>,
    Json(body): Json<BTreeMap<String, String>>,
) -> Result<Json<BundleRecord>, HttpError> {
    update(&state, BundleKey::global(), body)
}

async fn put_global_site(
    State(state): State<AdminState>,
    Path(site): Path<u64>,
    Json(body): Json<BTreeMap<String, String>>,
) -> Result<Json<BundleRecord>, HttpError> {
    update(&state, BundleKey::global_site(SiteId::from(site)), body)
}

async fn put_container(
    State(state): State<AdminState>,
    Path(container): Path<u64>,
    Json(body): Json<BTreeMap<String, String>>,
) -> Result<Json<BundleRecord>, HttpError> {
    update(&state, BundleKey::container(ContainerId::from(container)), body)
}

async fn put_container_site(
    State(state): State<AdminState>,
    Path((container, site)): Path<(u64, u64)>,
    Json(body): Json<BTreeMap<String, String>>,
) -> Result<Json<BundleRecord>, HttpError> {
    let key = BundleKey::container_site(ContainerId::from(container), SiteId::from(site));
    update(&state, key, body)
}

fn update(
    state: &AdminState,
    key: BundleKey,
    body: BTreeMap<String, String>,
) -> Result<Json<BundleRecord>, HttpError> {
    let settings = MetaSettings::from_pairs(body)?;
    Ok(Json(state.seo.update_bundle(key, settings)?))
}

async fn sitemap_index(State(state): State<AdminState>) -> Json<Vec<SitemapIndexEntry>> {
    Json(state.sitemap.current_index())
}
