//! Content records reported by the host.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;

use super::error::DomainError;
use super::types::{BundleType, ContainerId, ContainerKind, ItemId, SiteId};

/// A group of content items sharing one configuration scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentContainer {
    pub id: ContainerId,
    pub handle: String,
    pub kind: ContainerKind,
    pub site_ids: BTreeSet<SiteId>,
    #[serde(default = "default_sitemap_eligible")]
    pub sitemap_eligible: bool,
}

fn default_sitemap_eligible() -> bool {
    true
}

impl ContentContainer {
    pub fn new(
        id: ContainerId,
        handle: impl Into<String>,
        kind: ContainerKind,
        site_ids: impl IntoIterator<Item = SiteId>,
    ) -> Self {
        Self {
            id,
            handle: handle.into(),
            kind,
            site_ids: site_ids.into_iter().collect(),
            sitemap_eligible: true,
        }
    }

    pub fn bundle_type(&self) -> BundleType {
        BundleType::from(self.kind)
    }

    pub fn publishes_to(&self, site_id: SiteId) -> bool {
        self.site_ids.contains(&site_id)
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.handle.trim().is_empty() {
            return Err(DomainError::validation(format!(
                "container {} has an empty handle",
                self.id
            )));
        }
        Ok(())
    }
}

/// A single piece of content. Referenced by id only; never stored here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: ItemId,
    pub container_id: ContainerId,
    pub site_id: SiteId,
    pub uri: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
    /// Event-scoped flag; meaningless outside the event that carried it.
    #[serde(default)]
    pub is_new: bool,
}

impl ContentItem {
    pub fn new(id: ItemId, container_id: ContainerId, site_id: SiteId, uri: impl Into<String>) -> Self {
        Self {
            id,
            container_id,
            site_id,
            uri: uri.into(),
            title: None,
            updated_at: None,
            is_new: false,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// A site the host publishes under, as configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Site {
    pub id: SiteId,
    pub handle: String,
    pub name: String,
    pub base_url: Url,
    pub language: String,
}

impl Site {
    /// Absolute URL for a site-relative path.
    pub fn absolute_url(&self, path: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            format!("{base}/")
        } else {
            format!("{base}/{path}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_defaults_to_sitemap_eligible_when_field_missing() {
        let container: ContentContainer = serde_json::from_str(
            r#"{"id":3,"handle":"news","kind":"section","site_ids":[1,2]}"#,
        )
        .expect("deserialize container");

        assert!(container.sitemap_eligible);
        assert!(container.publishes_to(SiteId(2)));
        assert!(!container.publishes_to(SiteId(9)));
    }

    #[test]
    fn absolute_url_joins_without_double_slashes() {
        let site = Site {
            id: SiteId(1),
            handle: "default".to_string(),
            name: "Example".to_string(),
            base_url: Url::parse("https://example.com/").expect("url"),
            language: "en".to_string(),
        };
        assert_eq!(site.absolute_url("/blog/post"), "https://example.com/blog/post");
        assert_eq!(site.absolute_url(""), "https://example.com/");
    }

    #[test]
    fn blank_handle_is_rejected() {
        let container = ContentContainer::new(ContainerId(1), "  ", ContainerKind::Section, [SiteId(1)]);
        assert!(matches!(
            container.validate(),
            Err(DomainError::Validation { .. })
        ));
    }
}
