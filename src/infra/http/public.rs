use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{Path, Query, State},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_TYPE, ETAG, IF_NONE_MATCH},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use time::OffsetDateTime;

use crate::{
    application::{
        error::HttpError,
        runtime::SeoRuntime,
        seo::{ArtifactRequest, SeoService},
        sitemap::SitemapService,
    },
    cache::Artifact,
    domain::{
        entities::ContentItem,
        error::DomainError,
        types::{ArtifactKind, ContainerId, ItemId, SiteId},
    },
};

use super::middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct HttpState {
    pub seo: Arc<SeoService>,
    pub sitemap: SitemapService,
}

impl HttpState {
    pub fn from_runtime(runtime: &SeoRuntime) -> Self {
        Self {
            seo: Arc::clone(&runtime.seo),
            sitemap: runtime.sitemap_service.clone(),
        }
    }

    /// Site named by the query, or the lowest configured site id.
    fn site_id(&self, requested: Option<u64>) -> Result<SiteId, HttpError> {
        match requested {
            Some(id) => Ok(SiteId::from(id)),
            None => self
                .seo
                .sites()
                .primary()
                .map(|site| site.id)
                .ok_or_else(|| {
                    HttpError::new(
                        "infra::http::public::site_id",
                        StatusCode::NOT_FOUND,
                        "No site configured",
                        "no sites are configured",
                    )
                }),
        }
    }
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/sitemap.xml", get(sitemap))
        .route("/robots.txt", get(robots_txt))
        .route(
            "/artifacts/{site}/{container}/{item}",
            get(artifact),
        )
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SiteQuery {
    site: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ArtifactQuery {
    kind: Option<String>,
    uri: Option<String>,
    title: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    updated_at: Option<OffsetDateTime>,
    fallback: bool,
}

async fn sitemap(State(state): State<HttpState>, Query(query): Query<SiteQuery>) -> Response {
    let result = state
        .site_id(query.site)
        .and_then(|site_id| state.sitemap.sitemap_xml(site_id).map_err(HttpError::from));
    match result {
        Ok(body) => text_response(body, "application/xml"),
        Err(err) => err.into_response(),
    }
}

async fn robots_txt(State(state): State<HttpState>, Query(query): Query<SiteQuery>) -> Response {
    let result = state
        .site_id(query.site)
        .and_then(|site_id| state.sitemap.robots_txt(site_id).map_err(HttpError::from));
    match result {
        Ok(body) => text_response(body, "text/plain; charset=utf-8"),
        Err(err) => err.into_response(),
    }
}

async fn artifact(
    State(state): State<HttpState>,
    Path((site, container, item)): Path<(u64, u64, u64)>,
    Query(query): Query<ArtifactQuery>,
    headers: HeaderMap,
) -> Response {
    let kind = match query.kind.as_deref() {
        None => ArtifactKind::MetaTags,
        Some(raw) => match ArtifactKind::parse(raw) {
            Some(kind) => kind,
            None => {
                return HttpError::from(DomainError::validation(format!(
                    "unknown artifact kind `{raw}`"
                )))
                .into_response();
            }
        },
    };

    let mut content = ContentItem::new(
        ItemId::from(item),
        ContainerId::from(container),
        SiteId::from(site),
        query.uri.unwrap_or_default(),
    );
    content.title = query.title;
    content.updated_at = query.updated_at;

    let mut request = ArtifactRequest::new(content, kind);
    request.fallback_to_global = query.fallback;

    match state.seo.artifact(&request).await {
        Ok(artifact) => artifact_response(&artifact, &headers),
        Err(err) => HttpError::from(err).into_response(),
    }
}

fn artifact_response(artifact: &Artifact, headers: &HeaderMap) -> Response {
    let etag = format!("\"{}\"", artifact.etag);
    let matches = headers
        .get(IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| {
            value
                .split(',')
                .any(|candidate| candidate.trim() == etag || candidate.trim() == "*")
        });

    let builder = Response::builder()
        .header(ETAG, etag.as_str())
        .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    let response = if matches {
        builder.status(StatusCode::NOT_MODIFIED).body(Body::empty())
    } else {
        builder
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, artifact.content_type)
            .body(Body::from(artifact.payload.clone()))
    };
    response.unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn text_response(body: String, content_type: &'static str) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
