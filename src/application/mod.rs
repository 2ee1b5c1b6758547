//! Application services: bundle state, resolution, rendering, and the
//! render entry point built on the cache layer.

pub mod bundles;
pub mod error;
pub mod jsonld;
pub mod render;
pub mod resolver;
pub mod runtime;
pub mod seo;
pub mod site;
pub mod sitemap;
pub mod snapshot;
