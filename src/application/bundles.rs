//! In-process table of containers and their stored bundle records.

use std::collections::BTreeMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;

use crate::cache::lock::{rw_read, rw_write};
use crate::domain::bundle::{BundleKey, BundleRecord, BundleSource, MetaSettings};
use crate::domain::entities::ContentContainer;
use crate::domain::error::DomainError;
use crate::domain::types::{BundleType, ContainerId, SiteId};

const SOURCE: &str = "application::bundles";

/// Result of deleting a container.
#[derive(Debug, Clone)]
pub struct RemovedContainer {
    pub container: ContentContainer,
    pub removed_records: Vec<BundleKey>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleTableSnapshot {
    #[serde(default)]
    pub containers: Vec<ContentContainer>,
    #[serde(default)]
    pub records: Vec<BundleRecord>,
}

pub struct BundleTable {
    containers: RwLock<BTreeMap<ContainerId, ContentContainer>>,
    records: RwLock<BTreeMap<BundleKey, BundleRecord>>,
    /// Settings written into the global (all sites) record when it is seeded.
    defaults: MetaSettings,
}

impl BundleTable {
    pub fn new(defaults: MetaSettings) -> Self {
        Self {
            containers: RwLock::new(BTreeMap::new()),
            records: RwLock::new(BTreeMap::new()),
            defaults,
        }
    }

    pub fn container(&self, id: ContainerId) -> Option<ContentContainer> {
        rw_read(&self.containers, SOURCE, "container").get(&id).cloned()
    }

    pub fn containers(&self) -> Vec<ContentContainer> {
        rw_read(&self.containers, SOURCE, "containers")
            .values()
            .cloned()
            .collect()
    }

    /// Insert or replace a container; returns the previous version.
    pub fn upsert_container(&self, container: ContentContainer) -> Option<ContentContainer> {
        rw_write(&self.containers, SOURCE, "upsert_container").insert(container.id, container)
    }

    /// Delete a container and every record keyed to it.
    pub fn remove_container(&self, id: ContainerId) -> Option<RemovedContainer> {
        let container = rw_write(&self.containers, SOURCE, "remove_container").remove(&id)?;

        let mut records = rw_write(&self.records, SOURCE, "remove_container");
        let removed_records: Vec<BundleKey> = records
            .keys()
            .filter(|key| key.source == BundleSource::Container(id))
            .copied()
            .collect();
        for key in &removed_records {
            records.remove(key);
        }

        Some(RemovedContainer {
            container,
            removed_records,
        })
    }

    pub fn record(&self, key: &BundleKey) -> Option<BundleRecord> {
        rw_read(&self.records, SOURCE, "record").get(key).cloned()
    }

    pub fn records(&self) -> Vec<BundleRecord> {
        rw_read(&self.records, SOURCE, "records")
            .values()
            .cloned()
            .collect()
    }

    pub fn has_global(&self, site_id: SiteId) -> bool {
        let records = rw_read(&self.records, SOURCE, "has_global");
        records.contains_key(&BundleKey::global())
            && records.contains_key(&BundleKey::global_site(site_id))
    }

    /// Create the global records needed by `site_id` that do not exist yet.
    /// Returns the keys that were created.
    pub fn seed_global(&self, site_id: SiteId) -> Vec<BundleKey> {
        let mut records = rw_write(&self.records, SOURCE, "seed_global");
        let mut seeded = Vec::new();

        for (key, settings) in [
            (BundleKey::global(), self.defaults.clone()),
            (BundleKey::global_site(site_id), MetaSettings::new()),
        ] {
            if !records.contains_key(&key) {
                records.insert(key, BundleRecord::new(key, BundleType::Global, settings));
                seeded.push(key);
            }
        }

        if !seeded.is_empty() {
            info!(site_id = %site_id, seeded = seeded.len(), "Global bundles seeded");
        }
        seeded
    }

    /// Create the container-level records that do not exist yet: one for all
    /// sites and one per site the container publishes to.
    pub fn seed_container(&self, container: &ContentContainer) -> Vec<BundleKey> {
        let bundle_type = container.bundle_type();
        let mut records = rw_write(&self.records, SOURCE, "seed_container");
        let keys = std::iter::once(BundleKey::container(container.id)).chain(
            container
                .site_ids
                .iter()
                .map(|site| BundleKey::container_site(container.id, *site)),
        );

        let mut seeded = Vec::new();
        for key in keys {
            if !records.contains_key(&key) {
                records.insert(key, BundleRecord::new(key, bundle_type, MetaSettings::new()));
                seeded.push(key);
            }
        }
        seeded
    }

    /// Replace the overrides stored under `key`.
    pub fn set_settings(
        &self,
        key: BundleKey,
        settings: MetaSettings,
    ) -> Result<BundleRecord, DomainError> {
        let bundle_type = match key.container_id() {
            Some(container_id) => {
                let container = self
                    .container(container_id)
                    .ok_or_else(|| DomainError::not_found("container", container_id))?;
                if let Some(site_id) = key.site_id().filter(|site| !container.publishes_to(*site)) {
                    return Err(DomainError::validation(format!(
                        "container {container_id} is not published to site {site_id}"
                    )));
                }
                container.bundle_type()
            }
            None => BundleType::Global,
        };

        let mut records = rw_write(&self.records, SOURCE, "set_settings");
        let record = records
            .entry(key)
            .or_insert_with(|| BundleRecord::new(key, bundle_type, MetaSettings::new()));
        record.settings = settings;
        record.bundle_type = bundle_type;
        record.updated_at = OffsetDateTime::now_utc();
        Ok(record.clone())
    }

    pub fn snapshot(&self) -> BundleTableSnapshot {
        BundleTableSnapshot {
            containers: self.containers(),
            records: self.records(),
        }
    }

    /// Replace all state with `snapshot`.
    pub fn restore(&self, snapshot: BundleTableSnapshot) {
        let mut containers = rw_write(&self.containers, SOURCE, "restore");
        let mut records = rw_write(&self.records, SOURCE, "restore");
        *containers = snapshot
            .containers
            .into_iter()
            .map(|container| (container.id, container))
            .collect();
        *records = snapshot
            .records
            .into_iter()
            .map(|record| (record.key, record))
            .collect();
    }
}
