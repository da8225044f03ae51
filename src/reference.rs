//! Reference-system lookup: the MITRE ATT&CK technique page.
//!
//! The page supplies the technique's canonical name (when `--name` was not
//! given), the external domains it cites, and the technique metadata carried
//! into the output: description, tactics, platforms, data sources, defenses
//! bypassed, permissions required and the reference list. A failure here is
//! logged and the run continues without any of it.
//!
//! Cited domains come only from the page's citations: links in the
//! References section and inline citation links in the description.
//! Navigation, sidebar and footer links are not citations.

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use chrono::Duration;
use regex::Regex;
use serde::{Deserialize, Serialize};

use trr_scout_core::cache::{Cache, CacheKey};
use trr_scout_core::models::{extract_domain, TechniqueId};
use trr_scout_core::technique::{Citation, TechniqueDetails};

use crate::html::{attribute, text_of};
use crate::http::{with_retry, PageFetcher, RetryPolicy};
use crate::rate_limit::RateLimiter;

/// What the reference page says about a technique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceInfo {
    pub name: Option<String>,
    pub cited_domains: BTreeSet<String>,
    #[serde(default)]
    pub details: TechniqueDetails,
}

pub struct ReferenceClient {
    fetcher: Arc<dyn PageFetcher>,
    cache: Arc<dyn Cache>,
    limiter: Arc<RateLimiter>,
    base_url: String,
    ttl: Duration,
    retry: RetryPolicy,
}

impl ReferenceClient {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        cache: Arc<dyn Cache>,
        limiter: Arc<RateLimiter>,
        base_url: impl Into<String>,
        ttl: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            fetcher,
            cache,
            limiter,
            base_url: base_url.into(),
            ttl,
            retry,
        }
    }

    /// `<base>/T1003/006/`
    pub fn page_url(&self, id: &TechniqueId) -> String {
        format!("{}/{}/", self.base_url.trim_end_matches('/'), id.path_form())
    }

    /// Fetch (or load from cache) the reference info. `None` on failure.
    pub async fn lookup(&self, id: &TechniqueId, bypass_cache: bool) -> Option<ReferenceInfo> {
        let url = self.page_url(id);
        let key = CacheKey::derive("reference", &url, &[]);

        if !bypass_cache {
            if let Some(info) = self
                .cache
                .get(&key)
                .and_then(|v| serde_json::from_value::<ReferenceInfo>(v).ok())
            {
                tracing::debug!(%id, "reference cache hit");
                return Some(info);
            }
        }

        let fetcher = self.fetcher.as_ref();
        let limiter = self.limiter.as_ref();
        let target = url.as_str();
        let html = match with_retry(&self.retry, target, || async move {
            limiter.wait().await;
            fetcher.get_text(target).await
        })
        .await
        {
            Ok(html) => html,
            Err(e) => {
                tracing::warn!(%id, url = %url, error = %e, "reference lookup failed; continuing without it");
                return None;
            }
        };

        let info = parse_technique_page(&html);
        match serde_json::to_value(&info) {
            Ok(payload) => {
                if let Err(e) = self.cache.put(&key, payload, self.ttl) {
                    tracing::warn!(error = %e, "failed to write reference cache");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to encode reference info"),
        }
        Some(info)
    }
}

fn h1_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<h1[^>]*>(.*?)</h1>").expect("valid h1 regex"))
}

fn anchor_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)(<a\s[^>]*>)(.*?)</a>").expect("valid anchor regex"))
}

fn description_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)<div[^>]*class\s*=\s*["'][^"']*\bdescription(?:-body)?\b[^"']*["'][^>]*>(.*?)</div>"#)
            .expect("valid description regex")
    })
}

fn paragraph_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<p[^>]*>(.*?)</p>").expect("valid paragraph regex"))
}

fn card_field_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)<span[^>]*class\s*=\s*["'][^"']*\bcard-title\b[^"']*["'][^>]*>(.*?)</span>(.*?)</div>"#)
            .expect("valid card field regex")
    })
}

/// Start of the References section: its heading, an element with
/// `id="references"`, or a citation list.
fn references_start_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?is)<h[1-6][^>]*>\s*references\s*</h[1-6]>|<[a-z0-9]+\s[^>]*\bid\s*=\s*["']references["'][^>]*>|<(?:ol|ul|div)\s[^>]*class\s*=\s*["'][^"']*\b(?:scite-citations|references)\b[^"']*["'][^>]*>"#,
        )
        .expect("valid references regex")
    })
}

/// Where a section ends: the next top-level heading, the footer or the body.
fn section_end_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<h[12][\s>]|<footer[\s>]|</body>").expect("valid section end regex"))
}

fn citation_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\d+\]").expect("valid citation marker regex"))
}

fn data_source_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^DS\d{4}$").expect("valid data source id regex"))
}

/// Hosts that are never citations even when linked from a reference entry.
const IGNORED_CITATION_HOSTS: &[&str] = &["mitre.org", "creativecommons.org", "twitter.com", "x.com", "github.com"];

/// Extract name, cited domains and technique details from a technique page.
pub fn parse_technique_page(html: &str) -> ReferenceInfo {
    let name = h1_re()
        .captures(html)
        .map(|c| text_of(&c[1]))
        .filter(|n| !n.is_empty());

    let description_html = description_re().captures(html).map(|c| c.get(1).map_or("", |m| m.as_str()));
    let references_html = references_section(html);

    let references = references_html.map(citations_in).unwrap_or_default();
    let inline = description_html.map(citations_in).unwrap_or_default();

    let cited_domains = references
        .iter()
        .chain(inline.iter())
        .map(|c| extract_domain(&c.url))
        .map(|d| d.trim_start_matches("www.").to_string())
        .filter(|d| !d.is_empty())
        .filter(|d| {
            !IGNORED_CITATION_HOSTS
                .iter()
                .any(|h| d == h || d.ends_with(&format!(".{}", h)))
        })
        .collect();

    let mut details = TechniqueDetails {
        description: description_html
            .map(clean_description)
            .filter(|d| !d.is_empty())
            .or_else(|| first_long_paragraph(html)),
        data_sources: detection_data_sources(html),
        references,
        ..Default::default()
    };
    for c in card_field_re().captures_iter(html) {
        let label = text_of(&c[1]).trim_end_matches(':').trim().to_ascii_lowercase();
        let values = card_values(&c[2]);
        let slot = match label.as_str() {
            "tactic" | "tactics" => &mut details.tactics,
            "platforms" | "platform" => &mut details.platforms,
            "permissions required" => &mut details.permissions_required,
            "defense bypassed" | "defenses bypassed" => &mut details.defenses_bypassed,
            "data sources" | "data source" => &mut details.data_sources,
            _ => continue,
        };
        for v in values {
            if !slot.contains(&v) {
                slot.push(v);
            }
        }
    }

    ReferenceInfo {
        name,
        cited_domains,
        details,
    }
}

/// The References section, up to the next top-level heading or footer.
fn references_section(html: &str) -> Option<&str> {
    let start = references_start_re().find(html)?.end();
    let rest = &html[start..];
    let end = section_end_re().find(rest).map_or(rest.len(), |m| m.start());
    Some(&rest[..end])
}

/// External links in a fragment, in page order, first occurrence per URL.
fn citations_in(fragment: &str) -> Vec<Citation> {
    let mut out: Vec<Citation> = Vec::new();
    for c in anchor_re().captures_iter(fragment) {
        let Some(url) = attribute(&c[1], "href") else { continue };
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            continue;
        }
        if out.iter().any(|o| o.url == url) {
            continue;
        }
        out.push(Citation {
            source: text_of(&c[2]),
            url,
        });
    }
    out
}

fn clean_description(fragment: &str) -> String {
    let text = text_of(fragment);
    citation_marker_re()
        .replace_all(&text, "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace(" .", ".")
        .replace(" ,", ",")
}

fn first_long_paragraph(html: &str) -> Option<String> {
    paragraph_re()
        .captures_iter(html)
        .map(|c| clean_description(&c[1]))
        .find(|p| p.chars().count() > 100)
}

/// Card values: link texts when the value is a list of links, otherwise
/// the comma-separated text.
fn card_values(fragment: &str) -> Vec<String> {
    let links: Vec<String> = anchor_re()
        .captures_iter(fragment)
        .map(|c| text_of(&c[2]))
        .filter(|t| !t.is_empty())
        .collect();
    if !links.is_empty() {
        return links;
    }
    text_of(fragment)
        .split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

/// Data source and component names linked from the detection table.
fn detection_data_sources(html: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for c in anchor_re().captures_iter(html) {
        let Some(href) = attribute(&c[1], "href") else { continue };
        if !href.contains("/datasources/") {
            continue;
        }
        let text = text_of(&c[2]);
        if text.is_empty() || data_source_id_re().is_match(&text) || out.contains(&text) {
            continue;
        }
        out.push(text);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::FetchError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use trr_scout_core::cache::memory::InMemoryCache;

    const PAGE: &str = r##"
<html><body>
<nav><a href="https://attack.mitre.org/techniques/T1003/">parent</a>
<a href="https://www.navsponsor.com/">sponsor</a></nav>
<h1 id="">
    OS Credential Dumping:&nbsp;DCSync
</h1>
<div class="description-body">
  <p>Adversaries may attempt to access credentials by abusing the Directory Replication Service
  API.<span><sup><a href="https://adsecurity.org/?p=1729" target="_blank">[1]</a></sup></span>
  Members of the Administrators group can replicate secrets.<sup><a href="https://www.inline-only.example/post">[2]</a></sup></p>
</div>
<div class="card-body">
  <div class="row card-data"><div class="col-md-11 pl-0"><span class="h5 card-title">ID:&nbsp;</span>T1003.006</div></div>
  <div class="row card-data" id="card-tactics"><div class="col-md-11 pl-0"><span class="h5 card-title" title="Tactic">Tactic:</span>&nbsp;<a href="/tactics/TA0006">Credential Access</a></div></div>
  <div class="row card-data"><div class="col-md-11 pl-0"><span class="h5 card-title">Platforms:&nbsp;</span>Windows</div></div>
  <div class="row card-data"><div class="col-md-11 pl-0"><span class="h5 card-title">Permissions Required:&nbsp;</span>Administrator, SYSTEM</div></div>
</div>
<h2 class="pt-3" id="detection">Detection</h2>
<table class="table datasources-table">
  <tr><td><a href="/datasources/DS0026">DS0026</a></td><td><a href="/datasources/DS0026">Active Directory</a></td>
      <td><a href="/datasources/DS0026/#Active%20Directory%20Object%20Access">Active Directory Object Access</a></td></tr>
  <tr><td><a href="/datasources/DS0029">DS0029</a></td><td><a href="/datasources/DS0029">Network Traffic</a></td>
      <td><a href="/datasources/DS0029/#Network%20Traffic%20Content">Network Traffic Content</a></td></tr>
</table>
<h2 class="pt-3 pl-3" id="references">References</h2>
<div class="row"><div class="col"><ol class="scite-citations">
  <li><span class="scite-citation-text"><a href="https://adsecurity.org/?p=1729" target="_blank">Metcalf, S. (2015). Mimikatz DCSync Usage.</a></span></li>
  <li><span class="scite-citation-text"><a href="https://www.harmj0y.net/blog/redteaming/mimikatz-and-dcsync/">Schroeder, W. Mimikatz and DCSync.</a></span></li>
  <li><span class="scite-citation-text"><a href='https://msdn.microsoft.com/library/cc228086.aspx'>Microsoft. MS-DRSR.</a></span></li>
  <li><span class="scite-citation-text"><a href="https://github.com/gentilkiwi/mimikatz">mimikatz</a></span></li>
</ol></div></div>
<footer>
  <a href="https://www.footer-partner.com/">partner</a>
  <a href="https://creativecommons.org/licenses/">license</a>
</footer>
</body></html>"##;

    #[test]
    fn parses_name_and_citations() {
        let info = parse_technique_page(PAGE);
        assert_eq!(info.name.as_deref(), Some("OS Credential Dumping: DCSync"));
        let domains: Vec<&str> = info.cited_domains.iter().map(String::as_str).collect();
        assert_eq!(
            domains,
            vec!["adsecurity.org", "harmj0y.net", "inline-only.example", "msdn.microsoft.com"]
        );
    }

    #[test]
    fn footer_and_navigation_links_are_not_citations() {
        let info = parse_technique_page(PAGE);
        assert!(!info.cited_domains.contains("footer-partner.com"));
        assert!(!info.cited_domains.contains("navsponsor.com"));

        // No references section and no description: nothing is cited.
        let bare = r#"<h1>X</h1><a href="https://example.com/">home</a><footer><a href="https://partner.example/">p</a></footer>"#;
        assert!(parse_technique_page(bare).cited_domains.is_empty());
    }

    #[test]
    fn parses_technique_details() {
        let d = parse_technique_page(PAGE).details;
        let description = d.description.unwrap();
        assert!(description.starts_with("Adversaries may attempt to access credentials"));
        assert!(!description.contains("[1]"));
        assert_eq!(d.tactics, vec!["Credential Access".to_string()]);
        assert_eq!(d.platforms, vec!["Windows".to_string()]);
        assert_eq!(d.permissions_required, vec!["Administrator".to_string(), "SYSTEM".to_string()]);
        assert!(d.defenses_bypassed.is_empty());
        assert_eq!(
            d.data_sources,
            vec![
                "Active Directory".to_string(),
                "Active Directory Object Access".to_string(),
                "Network Traffic".to_string(),
                "Network Traffic Content".to_string(),
            ]
        );
        assert_eq!(d.references.len(), 4);
        assert_eq!(d.references[0].source, "Metcalf, S. (2015). Mimikatz DCSync Usage.");
        assert_eq!(d.references[0].url, "https://adsecurity.org/?p=1729");
    }

    #[test]
    fn older_card_layout_lists_defenses_and_data_sources() {
        let page = r#"<h1>Rootkit</h1>
            <div class="card-body">
              <div class="row card-data"><div class="col-md-11"><span class="h5 card-title">Defense Bypassed:&nbsp;</span>Anti-virus, File monitoring</div></div>
              <div class="row card-data"><div class="col-md-11"><span class="h5 card-title">Data Sources:&nbsp;</span>Drive: Drive Modification, Firmware</div></div>
            </div>
            <p>A rootkit hides the presence of programs, files, network connections, services, drivers and other system components from the operating system.</p>"#;
        let d = parse_technique_page(page).details;
        assert_eq!(d.defenses_bypassed, vec!["Anti-virus".to_string(), "File monitoring".to_string()]);
        assert_eq!(
            d.data_sources,
            vec!["Drive: Drive Modification".to_string(), "Firmware".to_string()]
        );
        assert!(d.description.unwrap().starts_with("A rootkit hides"));
    }

    struct CountingFetcher {
        body: Result<String, FetchError>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PageFetcher for CountingFetcher {
        async fn get_text(&self, _url: &str) -> Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.body.clone()
        }
    }

    fn client(fetcher: Arc<CountingFetcher>, limiter: Arc<RateLimiter>) -> ReferenceClient {
        ReferenceClient::new(
            fetcher,
            Arc::new(InMemoryCache::new()),
            limiter,
            "https://attack.mitre.org/techniques/",
            Duration::days(7),
            RetryPolicy::none(),
        )
    }

    #[tokio::test]
    async fn lookup_is_cached_and_rate_limited() {
        let fetcher = Arc::new(CountingFetcher {
            body: Ok(PAGE.to_string()),
            calls: AtomicUsize::new(0),
        });
        let limiter = Arc::new(RateLimiter::new(std::time::Duration::ZERO));
        let c = client(fetcher.clone(), limiter.clone());
        let id = TechniqueId::parse("T1003.006").unwrap();
        assert_eq!(c.page_url(&id), "https://attack.mitre.org/techniques/T1003/006/");

        let first = c.lookup(&id, false).await.unwrap();
        let second = c.lookup(&id, false).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(limiter.waits(), 1);
    }

    #[tokio::test]
    async fn failure_yields_none() {
        let fetcher = Arc::new(CountingFetcher {
            body: Err(FetchError::Permanent("HTTP 404".into())),
            calls: AtomicUsize::new(0),
        });
        let c = client(fetcher, Arc::new(RateLimiter::new(std::time::Duration::ZERO)));
        assert!(c.lookup(&TechniqueId::parse("T9999").unwrap(), false).await.is_none());
    }
}
