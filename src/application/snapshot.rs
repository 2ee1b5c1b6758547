//! Durable state: containers, bundle overrides, and the sitemap index as a
//! TOML document. Artifacts are not part of it; they are rebuilt on demand.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::bundle::{BundleKey, BundleRecord, MetaSettings};
use crate::domain::entities::ContentContainer;
use crate::domain::types::{BundleType, ContainerId, SiteId};
use crate::infra::error::InfraError;

use super::bundles::BundleTableSnapshot;
use super::sitemap::SitemapIndexEntry;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(default)]
    pub containers: Vec<ContentContainer>,
    #[serde(default)]
    pub bundles: Vec<BundleEntry>,
    #[serde(default)]
    pub sitemap: Vec<SitemapIndexEntry>,
}

/// A bundle record laid out for the state file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<ContainerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<SiteId>,
    pub bundle_type: BundleType,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

impl From<BundleRecord> for BundleEntry {
    fn from(record: BundleRecord) -> Self {
        Self {
            container_id: record.key.container_id(),
            site_id: record.key.site_id(),
            bundle_type: record.bundle_type,
            updated_at: record.updated_at,
            settings: record.settings.into(),
        }
    }
}

impl TryFrom<BundleEntry> for BundleRecord {
    type Error = InfraError;

    fn try_from(entry: BundleEntry) -> Result<Self, Self::Error> {
        let key = match (entry.container_id, entry.site_id) {
            (None, None) => BundleKey::global(),
            (None, Some(site)) => BundleKey::global_site(site),
            (Some(container), None) => BundleKey::container(container),
            (Some(container), Some(site)) => BundleKey::container_site(container, site),
        };
        let settings = MetaSettings::try_from(entry.settings)
            .map_err(|err| InfraError::configuration(format!("bundle {key}: {err}")))?;
        Ok(Self {
            key,
            bundle_type: entry.bundle_type,
            settings,
            updated_at: entry.updated_at,
        })
    }
}

impl StateSnapshot {
    pub fn new(table: BundleTableSnapshot, sitemap: Vec<SitemapIndexEntry>) -> Self {
        Self {
            containers: table.containers,
            bundles: table.records.into_iter().map(BundleEntry::from).collect(),
            sitemap,
        }
    }

    pub fn into_parts(self) -> Result<(BundleTableSnapshot, Vec<SitemapIndexEntry>), InfraError> {
        let records = self
            .bundles
            .into_iter()
            .map(BundleRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((
            BundleTableSnapshot {
                containers: self.containers,
                records,
            },
            self.sitemap,
        ))
    }

    /// Read a snapshot; a missing file yields `None`.
    pub fn load(path: &Path) -> Result<Option<Self>, InfraError> {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(InfraError::Io(err)),
        };
        let snapshot = toml::from_str(&data)
            .map_err(|err| InfraError::state(path.display().to_string(), err.to_string()))?;
        Ok(Some(snapshot))
    }

    /// Write the snapshot through a temporary file in the same directory so
    /// readers never observe a partial document.
    pub fn save(&self, path: &Path) -> Result<(), InfraError> {
        let encoded = toml::to_string_pretty(self)
            .map_err(|err| InfraError::state(path.display().to_string(), err.to_string()))?;

        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(directory)?;

        let mut file = tempfile::NamedTempFile::new_in(directory)?;
        file.write_all(encoded.as_bytes())?;
        file.as_file().sync_all()?;
        file.persist(path)
            .map_err(|err| InfraError::state(path.display().to_string(), err.error.to_string()))?;
        Ok(())
    }
}
