//! Per-field bundle resolution.
//!
//! Walks the precedence chain for a container on a site and fills every
//! field from the first level that sets it, falling back to built-in
//! defaults. Reads only.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::cache::InvalidationTracker;
use crate::domain::bundle::{BundleKey, MetaBundle, MetaField, MetaSettings, SettingSource};
use crate::domain::error::DomainError;
use crate::domain::types::{BundleType, ContainerId, SiteId};

use super::bundles::BundleTable;

/// Order in which the two middle levels of the chain are consulted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrecedencePolicy {
    /// container+site, container, global+site, global.
    #[default]
    ContainerFirst,
    /// container+site, global+site, container, global.
    SiteFirst,
}

impl PrecedencePolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "container_first" => Some(Self::ContainerFirst),
            "site_first" => Some(Self::SiteFirst),
            _ => None,
        }
    }

    fn chain(self, container_id: ContainerId, site_id: SiteId) -> [(BundleKey, SettingSource); 4] {
        let container_site = (
            BundleKey::container_site(container_id, site_id),
            SettingSource::ContainerSite,
        );
        let container = (BundleKey::container(container_id), SettingSource::Container);
        let global_site = (BundleKey::global_site(site_id), SettingSource::GlobalSite);
        let global = (BundleKey::global(), SettingSource::Global);
        match self {
            PrecedencePolicy::ContainerFirst => [container_site, container, global_site, global],
            PrecedencePolicy::SiteFirst => [container_site, global_site, container, global],
        }
    }
}

pub struct BundleResolver {
    table: Arc<BundleTable>,
    tracker: Arc<InvalidationTracker>,
    policy: PrecedencePolicy,
}

impl BundleResolver {
    pub fn new(
        table: Arc<BundleTable>,
        tracker: Arc<InvalidationTracker>,
        policy: PrecedencePolicy,
    ) -> Self {
        Self {
            table,
            tracker,
            policy,
        }
    }

    pub fn policy(&self) -> PrecedencePolicy {
        self.policy
    }

    pub fn resolve(&self, container_id: ContainerId, site_id: SiteId) -> Result<MetaBundle, DomainError> {
        // Stamp first: a write racing this read can only make the result stale.
        let stamp = self.tracker.stamp_for(container_id, site_id);

        let container = self
            .table
            .container(container_id)
            .ok_or_else(|| DomainError::not_found("container", container_id))?;
        if !container.publishes_to(site_id) {
            return Err(DomainError::not_found(
                "container site",
                format!("{container_id}/{site_id}"),
            ));
        }
        self.require_global_site(site_id)?;

        let levels = self
            .policy
            .chain(container_id, site_id)
            .map(|(key, source)| (self.table.record(&key).map(|record| record.settings), source));
        let (settings, sources) = merge(&levels);

        Ok(MetaBundle {
            bundle_type: container.bundle_type(),
            source_id: Some(container_id),
            site_id,
            settings,
            sources,
            stamp,
        })
    }

    /// Resolve the global chain for a site, without any container level.
    pub fn resolve_global(&self, site_id: SiteId) -> Result<MetaBundle, DomainError> {
        let stamp = self.tracker.global_stamp(site_id);
        self.require_global_site(site_id)?;

        let levels = [
            (BundleKey::global_site(site_id), SettingSource::GlobalSite),
            (BundleKey::global(), SettingSource::Global),
        ]
        .map(|(key, source)| (self.table.record(&key).map(|record| record.settings), source));
        let (settings, sources) = merge(&levels);

        Ok(MetaBundle {
            bundle_type: BundleType::Global,
            source_id: None,
            site_id,
            settings,
            sources,
            stamp,
        })
    }

    fn require_global_site(&self, site_id: SiteId) -> Result<(), DomainError> {
        if self.table.record(&BundleKey::global_site(site_id)).is_none() {
            return Err(DomainError::inconsistent(format!(
                "no global bundle exists for site {site_id}"
            )));
        }
        Ok(())
    }
}

fn merge(
    levels: &[(Option<MetaSettings>, SettingSource)],
) -> (MetaSettings, BTreeMap<MetaField, SettingSource>) {
    let mut settings = MetaSettings::new();
    let mut sources = BTreeMap::new();

    for field in MetaField::ALL {
        let found = levels.iter().find_map(|(level, source)| {
            level
                .as_ref()
                .and_then(|settings| settings.get(field))
                .map(|value| (value.to_string(), *source))
        });
        let (value, source) =
            found.unwrap_or_else(|| (field.default_value().to_string(), SettingSource::Default));
        settings.set(field, value);
        sources.insert(field, source);
    }

    (settings, sources)
}
