//! URL-safe names derived from container handles.
//!
//! Host handles are free-form (`blogPosts`, `Product Categories`); sitemap
//! file names need a stable ASCII form of them.

use slug::slugify;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlugError {
    #[error("slug source text is empty")]
    EmptyInput,
    #[error("failed to derive slug from `{input}`")]
    Unrepresentable { input: String },
}

/// Derive the slug used in per-container sitemap file names.
pub fn handle_slug(handle: &str) -> Result<String, SlugError> {
    if handle.trim().is_empty() {
        return Err(SlugError::EmptyInput);
    }

    let candidate = slugify(split_camel_case(handle));
    if candidate.is_empty() {
        return Err(SlugError::Unrepresentable {
            input: handle.to_string(),
        });
    }

    Ok(candidate)
}

fn split_camel_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 4);
    let mut prev_lower = false;
    for ch in input.chars() {
        if ch.is_uppercase() && prev_lower {
            out.push(' ');
        }
        prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        out.push(ch);
    }
    out
}
