//! Link discovery and resource classification.
//!
//! ```text
//! page body → parse_page → DiscoveredLink* → ResourceExtractor → ResourceCandidate*
//! ```

use std::collections::HashSet;

use scraper::{Html, Selector};
use url::Url;

use crate::domain::{MediaKind, ResourceCandidate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    Anchor,
    MediaSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredLink {
    pub url: String,
    pub role: LinkRole,
}

/// Parsed page: the text used for change detection and every link on it.
#[derive(Debug, Clone)]
pub struct Page {
    pub text: String,
    pub links: Vec<DiscoveredLink>,
}

/// Parses `body` and resolves every link against `base_url`.
///
/// Links are percent-decoded after resolution so that `a%20b.pdf` and
/// `a b.pdf` collapse to the same fingerprint.
pub fn parse_page(base_url: &str, body: &str) -> Page {
    let document = Html::parse_document(body);
    let base = Url::parse(base_url).ok();
    let mut links = Vec::new();

    if let Ok(selector) = Selector::parse("a[href]") {
        for element in document.select(&selector) {
            if let Some(url) = element
                .value()
                .attr("href")
                .and_then(|href| resolve_link(base.as_ref(), href))
            {
                links.push(DiscoveredLink {
                    url,
                    role: LinkRole::Anchor,
                });
            }
        }
    }

    if let Ok(selector) = Selector::parse("img[src], audio[src], video[src], source[src]") {
        for element in document.select(&selector) {
            if let Some(url) = element
                .value()
                .attr("src")
                .and_then(|src| resolve_link(base.as_ref(), src))
            {
                links.push(DiscoveredLink {
                    url,
                    role: LinkRole::MediaSource,
                });
            }
        }
    }

    Page {
        text: body.to_string(),
        links,
    }
}

fn resolve_link(base: Option<&Url>, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('#') {
        return None;
    }

    let lower = raw.to_ascii_lowercase();
    if lower.starts_with("javascript:") || lower.starts_with("mailto:") || lower.starts_with("data:")
    {
        return None;
    }

    let resolved = match base {
        Some(base) => base.join(raw).ok()?,
        None => Url::parse(raw).ok()?,
    };

    if resolved.scheme() != "http" && resolved.scheme() != "https" {
        return None;
    }

    let absolute = resolved.to_string();
    Some(
        urlencoding::decode(&absolute)
            .map(|decoded| decoded.into_owned())
            .unwrap_or(absolute),
    )
}

/// Extension of the URL path, lowercased, ignoring query and fragment.
fn url_extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next()?;
    let last_segment = path.rsplit('/').next()?;
    let (_, ext) = last_segment.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_ascii_lowercase())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResourceExtractor;

impl ResourceExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, url: &str) -> Option<MediaKind> {
        url_extension(url).and_then(|ext| MediaKind::from_extension(&ext))
    }

    /// Keeps whitelisted file types, first occurrence of each URL wins.
    pub fn extract(&self, links: &[DiscoveredLink]) -> Vec<ResourceCandidate> {
        let mut seen = HashSet::new();

        links
            .iter()
            .filter_map(|link| {
                let kind = self.classify(&link.url)?;
                if !seen.insert(link.url.as_str()) {
                    return None;
                }
                Some(ResourceCandidate::new(link.url.clone(), kind))
            })
            .collect()
    }
}
