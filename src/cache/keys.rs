//! Cache key definitions.
//!
//! Defines `ArtifactKey` for stored artifacts and `ArtifactOwner` for the
//! entities an artifact is indexed under.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::types::{ArtifactKind, ContainerId, ItemId, SiteId};

/// Identifies one derived artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactKey {
    pub container_id: ContainerId,
    pub item_id: ItemId,
    pub site_id: SiteId,
    pub kind: ArtifactKind,
}

impl ArtifactKey {
    pub fn new(container_id: ContainerId, item_id: ItemId, site_id: SiteId, kind: ArtifactKind) -> Self {
        Self {
            container_id,
            item_id,
            site_id,
            kind,
        }
    }

    pub fn item(&self) -> ItemKey {
        ItemKey {
            item_id: self.item_id,
            site_id: self.site_id,
        }
    }

    /// Flat string form for external key-value backends.
    pub fn storage_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "artifact:{}:{}:{}:{}",
            self.container_id, self.item_id, self.site_id, self.kind
        )
    }
}

/// An item on one site, independent of the container it lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey {
    pub item_id: ItemId,
    pub site_id: SiteId,
}

impl ItemKey {
    pub fn new(item_id: ItemId, site_id: SiteId) -> Self {
        Self { item_id, site_id }
    }
}

/// Entities an artifact is registered under for bulk eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactOwner {
    Container(ContainerId),
    Item(ItemKey),
}

impl ArtifactOwner {
    pub fn for_key(key: &ArtifactKey) -> [ArtifactOwner; 2] {
        [
            ArtifactOwner::Container(key.container_id),
            ArtifactOwner::Item(key.item()),
        ]
    }
}
