//! Decide which results are worth an extra page fetch for metadata.
//!
//! Search engines return thin or misleading titles for some hosts (video
//! platforms, slide decks, social posts) and empty snippets for others.
//! [`needs_enrichment`] picks the results whose title/description should be
//! refreshed from the page itself. It never fetches anything.

use crate::models::{domain_matches, SearchResult};

/// File types whose body is not HTML and carries no usable `<title>`.
pub const NON_ENRICHABLE_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "ppt", "pptx", "xls", "xlsx", "zip", "gz", "7z", "exe", "msi", "yml",
    "yaml", "json", "csv", "xml",
];

/// Hosts whose search-result titles are unreliable.
pub const UNRELIABLE_TITLE_HOSTS: &[&str] = &[
    "youtube.com",
    "youtu.be",
    "vimeo.com",
    "slideshare.net",
    "speakerdeck.com",
    "x.com",
    "twitter.com",
];

pub const DEFAULT_MIN_DESCRIPTION_CHARS: usize = 50;

#[derive(Debug, Clone)]
pub struct EnrichmentPolicy {
    /// A description at or under this many characters counts as missing.
    pub min_description_chars: usize,
}

impl Default for EnrichmentPolicy {
    fn default() -> Self {
        Self {
            min_description_chars: DEFAULT_MIN_DESCRIPTION_CHARS,
        }
    }
}

/// Whether `result` should have its metadata fetched.
///
/// Rules, first match wins:
/// 1. non-HTML file type → no
/// 2. unreliable-title host → yes
/// 3. title present and description long enough → no
/// 4. otherwise → yes
pub fn needs_enrichment(result: &SearchResult, policy: &EnrichmentPolicy) -> bool {
    if is_non_enrichable(&result.url) {
        return false;
    }
    if UNRELIABLE_TITLE_HOSTS
        .iter()
        .any(|h| domain_matches(&result.source_domain, h))
    {
        return true;
    }
    let has_title = !result.title.trim().is_empty();
    let has_description = result.description.trim().chars().count() > policy.min_description_chars;
    !(has_title && has_description)
}

/// A title that may still be replaced by a metadata fetch. Such titles are
/// kept out of title-similarity dedup until enrichment has run.
pub fn has_provisional_title(result: &SearchResult, policy: &EnrichmentPolicy) -> bool {
    !result.enriched && needs_enrichment(result, policy)
}

fn is_non_enrichable(raw: &str) -> bool {
    let path = match url::Url::parse(raw) {
        Ok(u) => u.path().to_string(),
        Err(_) => raw.split(['?', '#']).next().unwrap_or(raw).to_string(),
    };
    let last = path.rsplit('/').next().unwrap_or("");
    match last.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => NON_ENRICHABLE_EXTENSIONS
            .iter()
            .any(|e| e.eq_ignore_ascii_case(ext)),
        _ => false,
    }
}
