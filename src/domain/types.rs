//! Identifier newtypes and shared enumerations.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

id_type!(
    /// Identifier of a content container. Unique across container kinds.
    ContainerId
);
id_type!(
    /// Identifier of a single content item (entry, category).
    ItemId
);
id_type!(
    /// Identifier of a site the host publishes under.
    SiteId
);

/// Logical grouping kinds a host can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    Section,
    CategoryGroup,
    Global,
}

impl ContainerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContainerKind::Section => "section",
            ContainerKind::CategoryGroup => "category_group",
            ContainerKind::Global => "global",
        }
    }
}

/// Type label carried by a meta bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleType {
    Global,
    Section,
    CategoryGroup,
}

impl BundleType {
    pub fn as_str(self) -> &'static str {
        match self {
            BundleType::Global => "global",
            BundleType::Section => "section",
            BundleType::CategoryGroup => "category_group",
        }
    }
}

impl From<ContainerKind> for BundleType {
    fn from(kind: ContainerKind) -> Self {
        match kind {
            ContainerKind::Section => BundleType::Section,
            ContainerKind::CategoryGroup => BundleType::CategoryGroup,
            ContainerKind::Global => BundleType::Global,
        }
    }
}

/// Kinds of derived output cached per content item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    MetaTags,
    JsonLd,
    SitemapFragment,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [
        ArtifactKind::MetaTags,
        ArtifactKind::JsonLd,
        ArtifactKind::SitemapFragment,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::MetaTags => "meta_tags",
            ArtifactKind::JsonLd => "json_ld",
            ArtifactKind::SitemapFragment => "sitemap_fragment",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ArtifactKind::MetaTags => "text/html; charset=utf-8",
            ArtifactKind::JsonLd => "application/ld+json",
            ArtifactKind::SitemapFragment => "application/xml",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
