//! Configured sites.

use std::collections::BTreeMap;

use crate::domain::entities::Site;
use crate::domain::error::DomainError;
use crate::domain::types::SiteId;

/// Read-only lookup of the sites this process serves.
#[derive(Debug, Clone, Default)]
pub struct SiteDirectory {
    sites: BTreeMap<SiteId, Site>,
}

impl SiteDirectory {
    pub fn new(sites: impl IntoIterator<Item = Site>) -> Self {
        Self {
            sites: sites.into_iter().map(|site| (site.id, site)).collect(),
        }
    }

    pub fn get(&self, id: SiteId) -> Result<&Site, DomainError> {
        self.sites
            .get(&id)
            .ok_or_else(|| DomainError::not_found("site", id))
    }

    pub fn contains(&self, id: SiteId) -> bool {
        self.sites.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Site> {
        self.sites.values()
    }

    /// First configured site; used when a request does not name one.
    pub fn primary(&self) -> Option<&Site> {
        self.sites.values().next()
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}
