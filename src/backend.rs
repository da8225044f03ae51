//! Search backends.
//!
//! A [`SearchBackend`] turns one query string into raw hits. It makes a
//! single attempt; retries, rate limiting and caching belong to
//! [`SearchClient`](crate::search_client::SearchClient).
//!
//! [`DuckDuckGoBackend`] scrapes the DuckDuckGo HTML endpoint, which honours
//! `site:` operators and needs no API key.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;

use trr_scout_core::models::RawHit;

use crate::html::{attribute, text_of};
use crate::http::{FetchError, PageFetcher};

/// A web search engine.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Stable identifier, part of every cache key.
    fn name(&self) -> &str;

    /// Run `query` once and return at most `max_results` hits.
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<RawHit>, FetchError>;
}

pub const DUCKDUCKGO_ENDPOINT: &str = "https://html.duckduckgo.com/html/";

pub struct DuckDuckGoBackend {
    fetcher: Arc<dyn PageFetcher>,
    endpoint: String,
}

impl DuckDuckGoBackend {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self::with_endpoint(fetcher, DUCKDUCKGO_ENDPOINT)
    }

    pub fn with_endpoint(fetcher: Arc<dyn PageFetcher>, endpoint: impl Into<String>) -> Self {
        Self {
            fetcher,
            endpoint: endpoint.into(),
        }
    }

    fn query_url(&self, query: &str) -> Result<String, FetchError> {
        let mut url = url::Url::parse(&self.endpoint)
            .map_err(|e| FetchError::Permanent(format!("bad search endpoint: {}", e)))?;
        url.query_pairs_mut().append_pair("q", query);
        Ok(url.to_string())
    }
}

#[async_trait]
impl SearchBackend for DuckDuckGoBackend {
    fn name(&self) -> &str {
        "duckduckgo"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<RawHit>, FetchError> {
        let url = self.query_url(query)?;
        let body = self.fetcher.get_text(&url).await?;
        if is_challenge_page(&body) {
            return Err(FetchError::RateLimited);
        }
        Ok(parse_results(&body, max_results))
    }
}

fn anchor_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)(<a\s[^>]*class="[^"]*\bresult__a\b[^"]*"[^>]*>)(.*?)</a>"#)
            .expect("valid result anchor regex")
    })
}

fn snippet_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)<(?:a|div|td)\s[^>]*class="[^"]*\bresult__snippet\b[^"]*"[^>]*>(.*?)</(?:a|div|td)>"#)
            .expect("valid result snippet regex")
    })
}

/// DuckDuckGo serves an anomaly page instead of results when throttling.
fn is_challenge_page(body: &str) -> bool {
    body.contains("anomaly-modal") || body.contains("Unfortunately, bots use DuckDuckGo too")
}

/// Extract hits from a DuckDuckGo HTML results page, in page order.
///
/// Each `result__a` anchor yields one hit; its snippet is the first
/// `result__snippet` before the next anchor. Ads and duplicate URLs are
/// skipped.
pub fn parse_results(html: &str, max_results: usize) -> Vec<RawHit> {
    let anchors: Vec<_> = anchor_re().captures_iter(html).collect();
    let mut hits: Vec<RawHit> = Vec::new();

    for (i, cap) in anchors.iter().enumerate() {
        if hits.len() >= max_results {
            break;
        }
        let Some(whole) = cap.get(0) else { continue };
        let Some(href) = attribute(&cap[1], "href") else {
            continue;
        };
        let Some(url) = unwrap_redirect(&href) else {
            continue;
        };
        if hits.iter().any(|h| h.url == url) {
            continue;
        }

        let region_end = anchors
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(html.len());
        let description = snippet_re()
            .captures(&html[whole.end()..region_end])
            .map(|c| text_of(&c[1]))
            .unwrap_or_default();

        hits.push(RawHit {
            url,
            title: text_of(&cap[2]),
            description,
        });
    }

    hits
}

/// Resolve a result link to the destination URL.
///
/// DuckDuckGo wraps destinations as `//duckduckgo.com/l/?uddg=<encoded>`.
/// Ad links (`/y.js`) and non-http targets return `None`.
pub fn unwrap_redirect(href: &str) -> Option<String> {
    let absolute = if href.starts_with("//") {
        format!("https:{}", href)
    } else if href.starts_with('/') {
        format!("https://duckduckgo.com{}", href)
    } else {
        href.to_string()
    };
    let parsed = url::Url::parse(&absolute).ok()?;
    let host = parsed.host_str().unwrap_or("");

    let target = if host == "duckduckgo.com" || host.ends_with(".duckduckgo.com") {
        if parsed.path().starts_with("/y.js") {
            return None;
        }
        parsed
            .query_pairs()
            .find(|(k, _)| k == "uddg")
            .map(|(_, v)| v.into_owned())?
    } else {
        absolute
    };

    let target_url = url::Url::parse(&target).ok()?;
    matches!(target_url.scheme(), "http" | "https").then_some(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r##"
<div class="result results_links results_links_deep web-result">
  <h2 class="result__title">
    <a rel="nofollow" class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fadsecurity.org%2F%3Fp%3D1729&amp;rut=abc">Mimikatz <b>DCSync</b> Usage, Exploitation, and Detection</a>
  </h2>
  <a class="result__snippet" href="//duckduckgo.com/l/?uddg=x">Sean Metcalf on <b>DCSync</b> &amp; replication.</a>
</div>
<div class="result results_links result--ad">
  <a rel="nofollow" class="result__a" href="https://duckduckgo.com/y.js?ad_provider=x&amp;u3=y">Buy a SIEM</a>
  <a class="result__snippet" href="#">Ad copy</a>
</div>
<div class="result">
  <a class="result__a" rel="nofollow" href="https://attack.mitre.org/techniques/T1003/006/">OS Credential Dumping: DCSync</a>
</div>
<div class="result">
  <a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fadsecurity.org%2F%3Fp%3D1729">duplicate</a>
</div>
"##;

    #[test]
    fn parses_titles_urls_and_snippets() {
        let hits = parse_results(PAGE, 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].url, "https://adsecurity.org/?p=1729");
        assert_eq!(hits[0].title, "Mimikatz DCSync Usage, Exploitation, and Detection");
        assert_eq!(hits[0].description, "Sean Metcalf on DCSync & replication.");
        assert_eq!(hits[1].url, "https://attack.mitre.org/techniques/T1003/006/");
        assert_eq!(hits[1].description, "");
    }

    #[test]
    fn respects_max_results() {
        assert_eq!(parse_results(PAGE, 1).len(), 1);
        assert!(parse_results(PAGE, 0).is_empty());
    }

    #[test]
    fn redirect_unwrapping() {
        assert_eq!(
            unwrap_redirect("//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fa%3Fb%3Dc&rut=1").as_deref(),
            Some("https://example.com/a?b=c")
        );
        assert_eq!(unwrap_redirect("https://duckduckgo.com/y.js?ad=1"), None);
        assert_eq!(unwrap_redirect("javascript:void(0)"), None);
        assert_eq!(
            unwrap_redirect("https://example.com/x").as_deref(),
            Some("https://example.com/x")
        );
    }

    #[test]
    fn challenge_page_detected() {
        assert!(is_challenge_page("<div class=\"anomaly-modal__title\">"));
        assert!(!is_challenge_page(PAGE));
    }
}
