//! Meta bundle model: stored overrides, resolved bundles, and version stamps.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::error::DomainError;
use super::types::{BundleType, ContainerId, SiteId};

/// SEO settings a bundle can carry. Declaration order is the render order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetaField {
    Title,
    TitleSeparator,
    SiteName,
    Description,
    Keywords,
    Robots,
    CanonicalUrl,
    OgType,
    OgTitle,
    OgDescription,
    OgImage,
    TwitterCard,
    TwitterCreator,
    SchemaType,
    SitemapEnabled,
    SitemapPriority,
    SitemapChangeFrequency,
}

impl MetaField {
    pub const ALL: [MetaField; 17] = [
        MetaField::Title,
        MetaField::TitleSeparator,
        MetaField::SiteName,
        MetaField::Description,
        MetaField::Keywords,
        MetaField::Robots,
        MetaField::CanonicalUrl,
        MetaField::OgType,
        MetaField::OgTitle,
        MetaField::OgDescription,
        MetaField::OgImage,
        MetaField::TwitterCard,
        MetaField::TwitterCreator,
        MetaField::SchemaType,
        MetaField::SitemapEnabled,
        MetaField::SitemapPriority,
        MetaField::SitemapChangeFrequency,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MetaField::Title => "title",
            MetaField::TitleSeparator => "title_separator",
            MetaField::SiteName => "site_name",
            MetaField::Description => "description",
            MetaField::Keywords => "keywords",
            MetaField::Robots => "robots",
            MetaField::CanonicalUrl => "canonical_url",
            MetaField::OgType => "og_type",
            MetaField::OgTitle => "og_title",
            MetaField::OgDescription => "og_description",
            MetaField::OgImage => "og_image",
            MetaField::TwitterCard => "twitter_card",
            MetaField::TwitterCreator => "twitter_creator",
            MetaField::SchemaType => "schema_type",
            MetaField::SitemapEnabled => "sitemap_enabled",
            MetaField::SitemapPriority => "sitemap_priority",
            MetaField::SitemapChangeFrequency => "sitemap_change_frequency",
        }
    }

    /// Built-in value used when no bundle in the chain sets the field.
    pub fn default_value(self) -> &'static str {
        match self {
            MetaField::Title => "{title}",
            MetaField::TitleSeparator => "|",
            MetaField::SiteName => "{site_name}",
            MetaField::Description => "",
            MetaField::Keywords => "",
            MetaField::Robots => "all",
            MetaField::CanonicalUrl => "{url}",
            MetaField::OgType => "website",
            MetaField::OgTitle => "{title}",
            MetaField::OgDescription => "",
            MetaField::OgImage => "",
            MetaField::TwitterCard => "summary",
            MetaField::TwitterCreator => "",
            MetaField::SchemaType => "WebPage",
            MetaField::SitemapEnabled => "true",
            MetaField::SitemapPriority => "0.5",
            MetaField::SitemapChangeFrequency => "weekly",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.as_str() == value)
    }
}

impl fmt::Display for MetaField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered field overrides. Serialized as a plain string table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct MetaSettings {
    values: BTreeMap<MetaField, String>,
}

impl MetaSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every field at its built-in default.
    pub fn builtin() -> Self {
        Self {
            values: MetaField::ALL
                .into_iter()
                .map(|field| (field, field.default_value().to_string()))
                .collect(),
        }
    }

    pub fn get(&self, field: MetaField) -> Option<&str> {
        self.values.get(&field).map(String::as_str)
    }

    pub fn set(&mut self, field: MetaField, value: impl Into<String>) {
        self.values.insert(field, value.into());
    }

    pub fn with(mut self, field: MetaField, value: impl Into<String>) -> Self {
        self.set(field, value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (MetaField, &str)> {
        self.values.iter().map(|(field, value)| (*field, value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parse a string table, rejecting unknown field names.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, DomainError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut settings = Self::new();
        for (name, value) in pairs {
            let name = name.as_ref();
            let field = MetaField::parse(name)
                .ok_or_else(|| DomainError::validation(format!("unknown meta field `{name}`")))?;
            settings.set(field, value);
        }
        Ok(settings)
    }
}

impl TryFrom<BTreeMap<String, String>> for MetaSettings {
    type Error = DomainError;

    fn try_from(value: BTreeMap<String, String>) -> Result<Self, Self::Error> {
        Self::from_pairs(value)
    }
}

impl From<MetaSettings> for BTreeMap<String, String> {
    fn from(value: MetaSettings) -> Self {
        value
            .values
            .into_iter()
            .map(|(field, value)| (field.as_str().to_string(), value))
            .collect()
    }
}

/// Owner of a bundle record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BundleSource {
    Global,
    Container(ContainerId),
}

/// Site scope of a bundle record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BundleSite {
    All,
    Site(SiteId),
}

/// Addresses exactly one stored bundle record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "BundleKeyRepr", into = "BundleKeyRepr")]
pub struct BundleKey {
    pub source: BundleSource,
    pub site: BundleSite,
}

impl BundleKey {
    pub const fn global() -> Self {
        Self {
            source: BundleSource::Global,
            site: BundleSite::All,
        }
    }

    pub const fn global_site(site_id: SiteId) -> Self {
        Self {
            source: BundleSource::Global,
            site: BundleSite::Site(site_id),
        }
    }

    pub const fn container(container_id: ContainerId) -> Self {
        Self {
            source: BundleSource::Container(container_id),
            site: BundleSite::All,
        }
    }

    pub const fn container_site(container_id: ContainerId, site_id: SiteId) -> Self {
        Self {
            source: BundleSource::Container(container_id),
            site: BundleSite::Site(site_id),
        }
    }

    pub fn container_id(&self) -> Option<ContainerId> {
        match self.source {
            BundleSource::Container(id) => Some(id),
            BundleSource::Global => None,
        }
    }

    pub fn site_id(&self) -> Option<SiteId> {
        match self.site {
            BundleSite::Site(id) => Some(id),
            BundleSite::All => None,
        }
    }
}

impl fmt::Display for BundleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.source {
            BundleSource::Global => f.write_str("global")?,
            BundleSource::Container(id) => write!(f, "container:{id}")?,
        }
        match self.site {
            BundleSite::All => f.write_str("/*"),
            BundleSite::Site(id) => write!(f, "/{id}"),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct BundleKeyRepr {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    container_id: Option<ContainerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    site_id: Option<SiteId>,
}

impl From<BundleKeyRepr> for BundleKey {
    fn from(repr: BundleKeyRepr) -> Self {
        Self {
            source: repr
                .container_id
                .map_or(BundleSource::Global, BundleSource::Container),
            site: repr.site_id.map_or(BundleSite::All, BundleSite::Site),
        }
    }
}

impl From<BundleKey> for BundleKeyRepr {
    fn from(key: BundleKey) -> Self {
        Self {
            container_id: key.container_id(),
            site_id: key.site_id(),
        }
    }
}

/// Stored per-scope configuration: partial overrides only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleRecord {
    pub key: BundleKey,
    pub bundle_type: BundleType,
    #[serde(default)]
    pub settings: MetaSettings,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl BundleRecord {
    pub fn new(key: BundleKey, bundle_type: BundleType, settings: MetaSettings) -> Self {
        Self {
            key,
            bundle_type,
            settings,
            updated_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Which level of the precedence chain supplied a resolved value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingSource {
    ContainerSite,
    Container,
    GlobalSite,
    Global,
    Default,
}

/// Versions of every counter an artifact was rendered against.
///
/// Two stamps compare equal only if no bundle in the chain (and no
/// invalidate-all) changed in between.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BundleStamp {
    pub epoch: u64,
    pub container_site: u64,
    pub container: u64,
    pub global_site: u64,
    pub global: u64,
}

impl fmt::Display for BundleStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}.{}",
            self.epoch, self.container_site, self.container, self.global_site, self.global
        )
    }
}

/// Fully resolved configuration for one container on one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetaBundle {
    pub bundle_type: BundleType,
    pub source_id: Option<ContainerId>,
    pub site_id: SiteId,
    pub settings: MetaSettings,
    pub sources: BTreeMap<MetaField, SettingSource>,
    pub stamp: BundleStamp,
}

impl MetaBundle {
    /// Resolved value; always present after resolution.
    pub fn value(&self, field: MetaField) -> &str {
        self.settings
            .get(field)
            .unwrap_or_else(|| field.default_value())
    }

    pub fn source_of(&self, field: MetaField) -> SettingSource {
        self.sources
            .get(&field)
            .copied()
            .unwrap_or(SettingSource::Default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_reject_unknown_fields() {
        let err = MetaSettings::from_pairs([("title", "A"), ("colour", "red")])
            .expect_err("unknown field must fail");
        assert!(err.to_string().contains("colour"));
    }

    #[test]
    fn settings_iterate_in_declaration_order() {
        let settings = MetaSettings::new()
            .with(MetaField::Robots, "noindex")
            .with(MetaField::Title, "Home");
        let fields: Vec<_> = settings.iter().map(|(field, _)| field).collect();
        assert_eq!(fields, vec![MetaField::Title, MetaField::Robots]);
    }

    #[test]
    fn builtin_covers_every_field() {
        assert_eq!(MetaSettings::builtin().len(), MetaField::ALL.len());
    }

    #[test]
    fn bundle_key_serializes_as_optional_ids() {
        let json = serde_json::to_string(&BundleKey::container_site(ContainerId(4), SiteId(2)))
            .expect("serialize key");
        assert_eq!(json, r#"{"container_id":4,"site_id":2}"#);

        let global: BundleKey = serde_json::from_str("{}").expect("deserialize key");
        assert_eq!(global, BundleKey::global());
    }

    #[test]
    fn bundle_key_display_names_scope() {
        assert_eq!(BundleKey::global().to_string(), "global/*");
        assert_eq!(
            BundleKey::container_site(ContainerId(9), SiteId(1)).to_string(),
            "container:9/1"
        );
    }
}
