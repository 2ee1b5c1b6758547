//! Artifact rendering: turns a resolved bundle and a content item into the
//! payload stored in the artifact cache.

mod standard;
mod types;

pub use standard::{StandardRenderer, parse_json_ld};
pub use types::{ArtifactRenderer, RenderError, RenderRequest};
