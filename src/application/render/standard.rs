//! Built-in renderer for meta tags, JSON-LD, and sitemap fragments.

use async_trait::async_trait;
use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;

use crate::application::jsonld::JsonLd;
use crate::application::sitemap::xml_escape;
use crate::domain::bundle::{MetaBundle, MetaField};
use crate::domain::types::ArtifactKind;

use super::types::{ArtifactRenderer, RenderError, RenderRequest};

const CHANGE_FREQUENCIES: [&str; 7] = [
    "always", "hourly", "daily", "weekly", "monthly", "yearly", "never",
];

/// Values substituted into `{title}`, `{site_name}`, and `{url}`.
struct Placeholders<'a> {
    title: &'a str,
    site_name: &'a str,
    url: &'a str,
}

impl Placeholders<'_> {
    fn lookup(&self, name: &str) -> Option<&str> {
        match name {
            "title" => Some(self.title),
            "site_name" => Some(self.site_name),
            "url" => Some(self.url),
            _ => None,
        }
    }

    /// Single pass; substituted text is never scanned again.
    fn apply(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let tail = &rest[start..];
            match tail.find('}').and_then(|end| {
                self.lookup(&tail[1..end]).map(|value| (value, end))
            }) {
                Some((value, end)) => {
                    out.push_str(value);
                    rest = &tail[end + 1..];
                }
                None => {
                    out.push('{');
                    rest = &tail[1..];
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// Resolved values of one request with placeholders applied.
struct Resolved {
    values: Vec<(MetaField, String)>,
}

impl Resolved {
    fn new(request: &RenderRequest<'_>) -> Self {
        let bundle = request.bundle;
        let url = request.site.absolute_url(&request.item.uri);
        let item_title = request
            .item
            .title
            .as_deref()
            .unwrap_or(request.item.uri.as_str());

        // Site name and title are resolved first so other fields can refer to them.
        let site_name = Placeholders {
            title: item_title,
            site_name: &request.site.name,
            url: &url,
        }
        .apply(bundle.value(MetaField::SiteName));
        let title = Placeholders {
            title: item_title,
            site_name: &site_name,
            url: &url,
        }
        .apply(bundle.value(MetaField::Title));

        let placeholders = Placeholders {
            title: &title,
            site_name: &site_name,
            url: &url,
        };
        let values = MetaField::ALL
            .into_iter()
            .map(|field| {
                let value = match field {
                    MetaField::Title => title.clone(),
                    MetaField::SiteName => site_name.clone(),
                    _ => placeholders.apply(bundle.value(field)),
                };
                (field, value.trim().to_string())
            })
            .collect();
        Self { values }
    }

    fn get(&self, field: MetaField) -> &str {
        self.values
            .iter()
            .find(|(candidate, _)| *candidate == field)
            .map_or("", |(_, value)| value.as_str())
    }

    fn first_non_empty(&self, fields: &[MetaField]) -> &str {
        fields
            .iter()
            .map(|field| self.get(*field))
            .find(|value| !value.is_empty())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StandardRenderer;

impl StandardRenderer {
    pub fn new() -> Self {
        Self
    }

    fn meta_tags(&self, request: &RenderRequest<'_>) -> String {
        let resolved = Resolved::new(request);
        let title = resolved.get(MetaField::Title);
        let site_name = resolved.get(MetaField::SiteName);
        let separator = resolved.get(MetaField::TitleSeparator);
        let canonical = resolved.get(MetaField::CanonicalUrl);

        let full_title = if site_name.is_empty() || site_name == title {
            title.to_string()
        } else if title.is_empty() {
            site_name.to_string()
        } else {
            format!("{title} {separator} {site_name}")
        };

        let mut lines = vec![format!("<title>{}</title>", xml_escape(&full_title))];
        let mut meta = |attr: &str, name: &str, value: &str| {
            if !value.is_empty() {
                lines.push(format!(
                    "<meta {attr}=\"{name}\" content=\"{}\">",
                    xml_escape(value)
                ));
            }
        };

        meta("name", "description", resolved.get(MetaField::Description));
        meta("name", "keywords", resolved.get(MetaField::Keywords));
        meta("name", "robots", resolved.get(MetaField::Robots));
        meta("property", "og:type", resolved.get(MetaField::OgType));
        meta(
            "property",
            "og:title",
            resolved.first_non_empty(&[MetaField::OgTitle, MetaField::Title]),
        );
        meta(
            "property",
            "og:description",
            resolved.first_non_empty(&[MetaField::OgDescription, MetaField::Description]),
        );
        meta("property", "og:image", resolved.get(MetaField::OgImage));
        meta("property", "og:url", canonical);
        meta("property", "og:site_name", site_name);
        meta("property", "og:locale", &request.site.language);
        meta("name", "twitter:card", resolved.get(MetaField::TwitterCard));
        meta("name", "twitter:creator", resolved.get(MetaField::TwitterCreator));
        meta(
            "name",
            "twitter:title",
            resolved.first_non_empty(&[MetaField::OgTitle, MetaField::Title]),
        );

        if !canonical.is_empty() {
            lines.push(format!(
                "<link rel=\"canonical\" href=\"{}\">",
                xml_escape(canonical)
            ));
        }

        let mut out = lines.join("\n");
        out.push('\n');
        out
    }

    fn json_ld(&self, request: &RenderRequest<'_>) -> Result<String, RenderError> {
        let resolved = Resolved::new(request);
        let mut document = JsonLd::create(resolved.get(MetaField::SchemaType), Map::new())?;
        document
            .set("name", resolved.get(MetaField::Title))
            .set("description", resolved.get(MetaField::Description))
            .set("url", resolved.get(MetaField::CanonicalUrl))
            .set("inLanguage", request.site.language.as_str());
        if let Some(formatted) = request
            .item
            .updated_at
            .and_then(|at| at.format(&Rfc3339).ok())
        {
            document.set("dateModified", formatted);
        }

        let mut website = JsonLd::create("WebSite", Map::new())?;
        website
            .set("name", resolved.get(MetaField::SiteName))
            .set("url", request.site.absolute_url(""));
        document.set("isPartOf", website.to_nested_value());

        Ok(serde_json::to_string_pretty(&document.to_value())?)
    }

    fn sitemap_fragment(&self, request: &RenderRequest<'_>) -> Result<String, RenderError> {
        let bundle: &MetaBundle = request.bundle;
        let enabled = bundle.value(MetaField::SitemapEnabled).trim();
        match enabled {
            "true" => {}
            "false" => return Ok(String::new()),
            other => return Err(RenderError::invalid_setting(MetaField::SitemapEnabled, other)),
        }

        let priority_raw = bundle.value(MetaField::SitemapPriority).trim();
        let priority: f32 = priority_raw
            .parse()
            .ok()
            .filter(|value| (0.0..=1.0).contains(value))
            .ok_or_else(|| RenderError::invalid_setting(MetaField::SitemapPriority, priority_raw))?;

        let frequency = bundle.value(MetaField::SitemapChangeFrequency).trim();
        if !CHANGE_FREQUENCIES.contains(&frequency) {
            return Err(RenderError::invalid_setting(
                MetaField::SitemapChangeFrequency,
                frequency,
            ));
        }

        let loc = xml_escape(&request.site.absolute_url(&request.item.uri));
        let lastmod = request
            .item
            .updated_at
            .and_then(|at| at.format(&Rfc3339).ok())
            .map(|at| format!("<lastmod>{at}</lastmod>"))
            .unwrap_or_default();

        Ok(format!(
            "<url><loc>{loc}</loc>{lastmod}<changefreq>{frequency}</changefreq><priority>{priority:.1}</priority></url>\n"
        ))
    }
}

#[async_trait]
impl ArtifactRenderer for StandardRenderer {
    async fn render(&self, request: &RenderRequest<'_>) -> Result<String, RenderError> {
        match request.kind {
            ArtifactKind::MetaTags => Ok(self.meta_tags(request)),
            ArtifactKind::JsonLd => self.json_ld(request),
            ArtifactKind::SitemapFragment => self.sitemap_fragment(request),
        }
    }
}

/// JSON value of a fully rendered JSON-LD payload, for callers embedding it.
pub fn parse_json_ld(payload: &str) -> Result<Value, RenderError> {
    Ok(serde_json::from_str(payload)?)
}
