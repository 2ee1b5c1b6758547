//! seoforge: content-change-driven caching of SEO artifacts (meta tags,
//! JSON-LD, sitemap fragments) and incremental sitemap index maintenance.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
