//! Page metadata enrichment.
//!
//! For results selected by
//! [`needs_enrichment`](trr_scout_core::enrich::needs_enrichment), fetch the
//! page and refresh title and description from its `<head>`:
//!
//! | Field | Sources, first non-empty wins |
//! |-------|-------------------------------|
//! | title | `og:title`, `twitter:title`, `<title>` |
//! | description | `og:description`, `description`, `twitter:description` |
//! | published | `article:published_time`, `og:published_time`, `date`, `dc.date`, `<time datetime>`, a date in the page text |
//!
//! A fetch failure keeps the result as it was. Scores are not recomputed;
//! tags are, since they only drive presentation.

use std::sync::{Arc, OnceLock};

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;

use trr_scout_core::classify::classify;
use trr_scout_core::enrich::{needs_enrichment, EnrichmentPolicy};
use trr_scout_core::models::SearchResult;

use crate::html::{attribute, meta_content, page_title, text_of};
use crate::http::{with_retry, PageFetcher, RetryPolicy};
use crate::rate_limit::RateLimiter;

/// Title, description and publication date pulled from a page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub published: Option<NaiveDate>,
}

pub fn extract_metadata(html: &str) -> PageMetadata {
    let title = meta_content(html, "og:title")
        .or_else(|| meta_content(html, "twitter:title"))
        .or_else(|| page_title(html));
    let description = meta_content(html, "og:description")
        .or_else(|| meta_content(html, "description"))
        .or_else(|| meta_content(html, "twitter:description"));
    PageMetadata {
        title,
        description,
        published: extract_published(html),
    }
}

const DATE_META_KEYS: &[&str] = &["article:published_time", "og:published_time", "date", "dc.date"];

/// Characters of page text searched for a written-out date.
const DATE_TEXT_WINDOW: usize = 5000;

fn time_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<time\s[^>]*>").expect("valid time regex"))
}

fn script_style_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<script\b.*?</script>|<style\b.*?</style>|<head\b.*?</head>").expect("valid script regex")
    })
}

fn text_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\b(?:(\d{4}-\d{2}-\d{2})|(\d{2}/\d{2}/\d{4})|((?:January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{1,2},?\s+\d{4}))\b",
        )
        .expect("valid text date regex")
    })
}

/// Leading `YYYY-MM-DD` of a timestamp such as `2023-05-10T08:00:00+00:00`.
fn parse_iso_prefix(value: &str) -> Option<NaiveDate> {
    let head = value.trim().get(..10)?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

/// Publication date: meta tags first, then `<time datetime>`, then the first
/// date written in the page text (ISO, `MM/DD/YYYY` or `Month D, YYYY`).
pub fn extract_published(html: &str) -> Option<NaiveDate> {
    if let Some(date) = DATE_META_KEYS
        .iter()
        .filter_map(|k| meta_content(html, k))
        .find_map(|v| parse_iso_prefix(&v))
    {
        return Some(date);
    }

    if let Some(date) = time_tag_re()
        .find_iter(html)
        .filter_map(|m| attribute(m.as_str(), "datetime"))
        .find_map(|v| parse_iso_prefix(&v))
    {
        return Some(date);
    }

    let visible = text_of(&script_style_re().replace_all(html, " "));
    let window: String = visible.chars().take(DATE_TEXT_WINDOW).collect();
    text_date_re().captures_iter(&window).find_map(|c| {
        if let Some(iso) = c.get(1) {
            NaiveDate::parse_from_str(iso.as_str(), "%Y-%m-%d").ok()
        } else if let Some(us) = c.get(2) {
            NaiveDate::parse_from_str(us.as_str(), "%m/%d/%Y").ok()
        } else {
            let written = c.get(3)?.as_str().replace(',', " ");
            let written = written.split_whitespace().collect::<Vec<_>>().join(" ");
            NaiveDate::parse_from_str(&written, "%B %d %Y").ok()
        }
    })
}

pub struct MetadataEnricher {
    fetcher: Arc<dyn PageFetcher>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    policy: EnrichmentPolicy,
}

impl MetadataEnricher {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
        policy: EnrichmentPolicy,
    ) -> Self {
        Self {
            fetcher,
            limiter,
            retry,
            policy,
        }
    }

    /// Enrich every result that needs it. Returns how many were updated.
    pub async fn enrich_all(&self, results: &mut [SearchResult]) -> usize {
        let mut updated = 0;
        for result in results.iter_mut() {
            if !needs_enrichment(result, &self.policy) {
                continue;
            }
            if self.enrich_one(result).await {
                updated += 1;
            }
        }
        updated
    }

    async fn enrich_one(&self, result: &mut SearchResult) -> bool {
        let fetcher = self.fetcher.as_ref();
        let limiter = self.limiter.as_ref();
        let url = result.url.as_str();

        let html = match with_retry(&self.retry, url, || async move {
            limiter.wait().await;
            fetcher.get_text(url).await
        })
        .await
        {
            Ok(html) => html,
            Err(e) => {
                tracing::debug!(url = %result.url, error = %e, "metadata fetch failed");
                return false;
            }
        };

        let meta = extract_metadata(&html);
        let mut changed = false;
        if let Some(title) = meta.title.filter(|t| !t.is_empty()) {
            result.title = title;
            changed = true;
        }
        if let Some(desc) = meta.description {
            if desc.chars().count() > result.description.chars().count() {
                result.description = desc;
                changed = true;
            }
        }
        if changed {
            result.enriched = true;
            result.tags = classify(result);
        }
        // A date alone does not make the title final.
        if result.published.is_none() && meta.published.is_some() {
            result.published = meta.published;
            changed = true;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::FetchError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use trr_scout_core::models::{RawHit, Tier};

    struct MapFetcher(HashMap<String, String>);

    #[async_trait]
    impl PageFetcher for MapFetcher {
        async fn get_text(&self, url: &str) -> Result<String, FetchError> {
            self.0
                .get(url)
                .cloned()
                .ok_or_else(|| FetchError::Permanent("HTTP 404".into()))
        }
    }

    fn result(url: &str, title: &str, desc: &str) -> SearchResult {
        SearchResult::from_hit(
            RawHit {
                url: url.into(),
                title: title.into(),
                description: desc.into(),
            },
            "conferences",
            Tier::Two,
            "q",
            false,
        )
    }

    fn enricher(pages: &[(&str, &str)]) -> MetadataEnricher {
        let map = pages
            .iter()
            .map(|(u, b)| (u.to_string(), b.to_string()))
            .collect();
        MetadataEnricher::new(
            Arc::new(MapFetcher(map)),
            Arc::new(RateLimiter::new(std::time::Duration::ZERO)),
            RetryPolicy::none(),
            EnrichmentPolicy::default(),
        )
    }

    #[test]
    fn og_tags_preferred() {
        let meta = extract_metadata(
            r#"<title>YouTube</title>
               <meta property="og:title" content="DCSync Deep Dive - Hunting Replication">
               <meta name="description" content="Talk on detecting DCSync.">"#,
        );
        assert_eq!(meta.title.as_deref(), Some("DCSync Deep Dive - Hunting Replication"));
        assert_eq!(meta.description.as_deref(), Some("Talk on detecting DCSync."));
    }

    #[tokio::test]
    async fn video_result_gets_real_title() {
        let e = enricher(&[(
            "https://www.youtube.com/watch?v=abc",
            r#"<meta property="og:title" content="Hunting DCSync with Event 4662"><meta property="og:description" content="Conference talk covering replication abuse detection in depth.">"#,
        )]);
        let mut results = vec![
            result("https://www.youtube.com/watch?v=abc", "YouTube", ""),
            result("https://example.com/slides.pdf", "", ""),
        ];
        assert_eq!(e.enrich_all(&mut results).await, 1);
        assert_eq!(results[0].title, "Hunting DCSync with Event 4662");
        assert!(results[0].enriched);
        assert!(results[0].tags.contains(&trr_scout_core::models::ResultTag::Detection));
        assert!(!results[1].enriched);
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn published_date_sources() {
        let meta = r#"<meta property="article:published_time" content="2023-05-10T08:00:00+00:00">
                      <time datetime="2020-01-01">Jan 1</time>"#;
        assert_eq!(extract_published(meta), Some(date(2023, 5, 10)));

        let time = r#"<head><title>x</title></head><body><time class="post" datetime="2019-11-02T10:00">Nov 2</time></body>"#;
        assert_eq!(extract_published(time), Some(date(2019, 11, 2)));

        let written = r#"<html><head><meta name="date" content="not a date"></head>
            <body><script>var d = "2001-01-01";</script><p>Posted on September 25, 2015 by Sean</p></body></html>"#;
        assert_eq!(extract_published(written), Some(date(2015, 9, 25)));

        assert_eq!(extract_published("<p>Updated 03/14/2022</p>"), Some(date(2022, 3, 14)));
        assert_eq!(extract_published("<p>No date here, version 1.2.3</p>"), None);
    }

    #[tokio::test]
    async fn date_is_recorded_without_finalizing_title() {
        let e = enricher(&[(
            "https://www.youtube.com/watch?v=abc",
            r#"<meta property="article:published_time" content="2021-06-01">"#,
        )]);
        let mut results = vec![result("https://www.youtube.com/watch?v=abc", "YouTube", "")];
        assert_eq!(e.enrich_all(&mut results).await, 1);
        assert_eq!(results[0].published, Some(date(2021, 6, 1)));
        assert!(!results[0].enriched);
        assert_eq!(results[0].title, "YouTube");
    }

    #[tokio::test]
    async fn failed_fetch_keeps_result() {
        let e = enricher(&[]);
        let mut results = vec![result("https://example.com/post", "Short", "")];
        assert_eq!(e.enrich_all(&mut results).await, 0);
        assert_eq!(results[0].title, "Short");
        assert!(!results[0].enriched);
    }
}
