//! Sitemap index maintenance and serialization.
//!
//! `SitemapIndexBuilder` keeps one entry per container in creation order and
//! is updated incrementally by the event router. `SitemapService` turns the
//! current index into `sitemap.xml` and `robots.txt` for one site.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::cache::lock::{rw_read, rw_write};
use crate::domain::entities::{ContentContainer, Site};
use crate::domain::error::DomainError;
use crate::domain::slug::handle_slug;
use crate::domain::types::{ContainerId, ContainerKind, SiteId};

use super::site::SiteDirectory;

const SOURCE: &str = "application::sitemap";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SitemapIndexEntry {
    pub container_id: ContainerId,
    pub handle: String,
    pub kind: ContainerKind,
    pub site_ids: BTreeSet<SiteId>,
    #[serde(with = "time::serde::rfc3339")]
    pub lastmod: OffsetDateTime,
}

impl SitemapIndexEntry {
    fn from_container(container: &ContentContainer, lastmod: OffsetDateTime) -> Self {
        Self {
            container_id: container.id,
            handle: container.handle.clone(),
            kind: container.kind,
            site_ids: container.site_ids.clone(),
            lastmod,
        }
    }

    /// File name of the per-container sitemap on `site_id`.
    pub fn file_name(&self, site_id: SiteId) -> String {
        let stem = handle_slug(&self.handle)
            .unwrap_or_else(|_| format!("container-{}", self.container_id));
        format!("sitemaps/{stem}-{site_id}.xml")
    }
}

/// Ordered, in-memory sitemap index. Entries keep creation order.
pub struct SitemapIndexBuilder {
    entries: RwLock<Vec<SitemapIndexEntry>>,
}

impl SitemapIndexBuilder {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Append an entry for the container. Returns false if one already exists.
    pub fn add_container(&self, container: &ContentContainer) -> bool {
        let mut entries = rw_write(&self.entries, SOURCE, "add_container");
        if entries.iter().any(|entry| entry.container_id == container.id) {
            return false;
        }
        entries.push(SitemapIndexEntry::from_container(
            container,
            OffsetDateTime::now_utc(),
        ));
        true
    }

    /// Refresh an existing entry in place. Returns false if there is none.
    pub fn update_container(&self, container: &ContentContainer) -> bool {
        let mut entries = rw_write(&self.entries, SOURCE, "update_container");
        match entries
            .iter_mut()
            .find(|entry| entry.container_id == container.id)
        {
            Some(entry) => {
                entry.handle = container.handle.clone();
                entry.kind = container.kind;
                entry.site_ids = container.site_ids.clone();
                entry.lastmod = OffsetDateTime::now_utc();
                true
            }
            None => false,
        }
    }

    /// Remove the container's entry; unknown ids are a no-op.
    pub fn remove_container(&self, container_id: ContainerId) -> bool {
        let mut entries = rw_write(&self.entries, SOURCE, "remove_container");
        let before = entries.len();
        entries.retain(|entry| entry.container_id != container_id);
        entries.len() != before
    }

    /// Move the entry's `lastmod` forward to `at`.
    pub fn touch(&self, container_id: ContainerId, at: OffsetDateTime) -> bool {
        let mut entries = rw_write(&self.entries, SOURCE, "touch");
        match entries
            .iter_mut()
            .find(|entry| entry.container_id == container_id)
        {
            Some(entry) => {
                if at > entry.lastmod {
                    entry.lastmod = at;
                }
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, container_id: ContainerId) -> bool {
        rw_read(&self.entries, SOURCE, "contains")
            .iter()
            .any(|entry| entry.container_id == container_id)
    }

    pub fn current_index(&self) -> Vec<SitemapIndexEntry> {
        rw_read(&self.entries, SOURCE, "current_index").clone()
    }

    pub fn index_for_site(&self, site_id: SiteId) -> Vec<SitemapIndexEntry> {
        rw_read(&self.entries, SOURCE, "index_for_site")
            .iter()
            .filter(|entry| entry.site_ids.contains(&site_id))
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> Vec<SitemapIndexEntry> {
        self.current_index()
    }

    pub fn restore(&self, entries: Vec<SitemapIndexEntry>) {
        *rw_write(&self.entries, SOURCE, "restore") = entries;
    }
}

impl Default for SitemapIndexBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Service for generating sitemap.xml and robots.txt.
#[derive(Clone)]
pub struct SitemapService {
    index: Arc<SitemapIndexBuilder>,
    sites: Arc<SiteDirectory>,
}

impl SitemapService {
    pub fn new(index: Arc<SitemapIndexBuilder>, sites: Arc<SiteDirectory>) -> Self {
        Self { index, sites }
    }

    /// Sitemap index document listing every container published to the site.
    pub fn sitemap_xml(&self, site_id: SiteId) -> Result<String, DomainError> {
        let site = self.sites.get(site_id)?;
        let mut xml = String::from(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<sitemapindex xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n",
        );
        for entry in self.index.index_for_site(site_id) {
            xml.push_str(&sitemap_entry(site, &entry));
        }
        xml.push_str("</sitemapindex>\n");
        Ok(xml)
    }

    pub fn robots_txt(&self, site_id: SiteId) -> Result<String, DomainError> {
        let site = self.sites.get(site_id)?;
        let sitemap_url = site.absolute_url("sitemap.xml");
        Ok(format!("User-agent: *\nAllow: /\nSitemap: {sitemap_url}\n"))
    }
}

fn sitemap_entry(site: &Site, entry: &SitemapIndexEntry) -> String {
    let loc = xml_escape(&site.absolute_url(&entry.file_name(site.id)));
    match entry.lastmod.format(&Rfc3339) {
        Ok(lastmod) => {
            format!("  <sitemap><loc>{loc}</loc><lastmod>{lastmod}</lastmod></sitemap>\n")
        }
        Err(_) => format!("  <sitemap><loc>{loc}</loc></sitemap>\n"),
    }
}

pub(crate) fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
