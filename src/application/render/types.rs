use async_trait::async_trait;
use thiserror::Error;

use crate::application::jsonld::JsonLdError;
use crate::domain::bundle::{MetaBundle, MetaField};
use crate::domain::entities::{ContentItem, Site};
use crate::domain::types::ArtifactKind;

/// Everything a renderer may read to produce one artifact payload.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    pub kind: ArtifactKind,
    pub site: &'a Site,
    pub item: &'a ContentItem,
    pub bundle: &'a MetaBundle,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("invalid value `{value}` for `{field}`")]
    InvalidSetting { field: MetaField, value: String },
    #[error("structured data rejected: {0}")]
    StructuredData(#[from] JsonLdError),
    #[error("structured data could not be encoded: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("renderer unavailable: {message}")]
    Unavailable { message: String },
}

impl RenderError {
    pub fn invalid_setting(field: MetaField, value: impl Into<String>) -> Self {
        Self::InvalidSetting {
            field,
            value: value.into(),
        }
    }
}

/// Turns a resolved bundle and an item into an artifact payload.
/// Implementations must not perform cache writes.
#[async_trait]
pub trait ArtifactRenderer: Send + Sync {
    async fn render(&self, request: &RenderRequest<'_>) -> Result<String, RenderError>;
}
