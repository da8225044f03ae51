//! Core data models used throughout TRR Scout.
//!
//! These types represent the technique being researched, the configured
//! source categories, and the raw hits and scored results that flow through
//! the planning → search → scoring → dedup pipeline.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

use anyhow::{bail, Result};
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

fn technique_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^T\d{4}(\.\d{3})?$").expect("valid technique id regex"))
}

/// A validated ATT&CK technique identifier such as `T1003` or `T1003.006`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TechniqueId(String);

impl TechniqueId {
    /// Normalize and validate an identifier.
    ///
    /// Accepts lower case and a missing `T` prefix (`1003.006` →
    /// `T1003.006`). Anything else that does not match
    /// `T\d{4}(\.\d{3})?` is rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut id = raw.trim().to_uppercase();
        if !id.starts_with('T') {
            id.insert(0, 'T');
        }
        if !technique_id_re().is_match(&id) {
            bail!(
                "Invalid technique ID format: '{}'. Expected e.g. T1003 or T1003.006",
                raw
            );
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The parent technique for a sub-technique (`T1003.006` → `T1003`).
    pub fn parent(&self) -> Option<TechniqueId> {
        self.0
            .split_once('.')
            .map(|(parent, _)| TechniqueId(parent.to_string()))
    }

    pub fn is_subtechnique(&self) -> bool {
        self.0.contains('.')
    }

    /// The identifier as it appears in ATT&CK URL paths (`T1003/006`).
    pub fn path_form(&self) -> String {
        self.0.replace('.', "/")
    }
}

impl fmt::Display for TechniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Presentation priority of a category. Also feeds the domain-trust signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

/// Which planning phase produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    /// Per-domain, high-precision query.
    #[serde(rename = "1")]
    One,
    /// Batched or shared broad-coverage query.
    #[serde(rename = "2")]
    Two,
}

/// A configured group of source domains searched together.
///
/// Categories are plain data; every variant (scoped or not, with or without a
/// suffix) is the same record type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Category {
    pub name: String,
    pub label: String,
    pub priority: Priority,
    pub domains: Vec<String>,
    /// Subset of `domains` that is also in the global tier-1 list.
    pub tier1_domains: Vec<String>,
    pub search_suffix: String,
    /// Built-in site restriction, e.g. `github.com/SigmaHQ/sigma`.
    pub scoped_site: Option<String>,
}

impl Category {
    /// Build a category, deriving `tier1_domains` from the global tier-1 list
    /// so it is always a subset of `domains`.
    pub fn new(
        name: impl Into<String>,
        label: impl Into<String>,
        priority: Priority,
        domains: Vec<String>,
        search_suffix: impl Into<String>,
        scoped_site: Option<String>,
        global_tier1: &[String],
    ) -> Self {
        let tier1_domains = domains
            .iter()
            .filter(|d| global_tier1.iter().any(|t| t.eq_ignore_ascii_case(d)))
            .cloned()
            .collect();
        Self {
            name: name.into(),
            label: label.into(),
            priority,
            domains,
            tier1_domains,
            search_suffix: search_suffix.into(),
            scoped_site,
        }
    }

    pub fn is_scoped(&self) -> bool {
        self.scoped_site.is_some()
    }

    /// True when `domain` (or a parent of it) is one of this category's domains.
    pub fn covers_domain(&self, domain: &str) -> bool {
        self.domains.iter().any(|d| domain_matches(domain, d))
    }
}

/// `sub.example.com` matches `example.com`; a leading `www.` is ignored.
pub fn domain_matches(domain: &str, configured: &str) -> bool {
    let domain = domain.trim_start_matches("www.").to_ascii_lowercase();
    let configured = configured.trim_start_matches("www.").to_ascii_lowercase();
    domain == configured || domain.ends_with(&format!(".{}", configured))
}

/// A hit exactly as returned by a search backend. Also the cached payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawHit {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// Presentation labels attached by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResultTag {
    Detection,
    #[serde(rename = "Threat Intel")]
    ThreatIntel,
    Reference,
}

impl fmt::Display for ResultTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResultTag::Detection => "Detection",
            ResultTag::ThreatIntel => "Threat Intel",
            ResultTag::Reference => "Reference",
        };
        f.write_str(s)
    }
}

/// One discovered candidate source.
///
/// `relevance_score` is meaningful only after scoring and `tags` only after
/// classification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub url: String,
    pub title: String,
    pub description: String,
    pub source_domain: String,
    pub category: String,
    pub tier: Tier,
    pub origin_query: String,
    /// Produced by a category-scoped query.
    pub scoped: bool,
    pub relevance_score: f64,
    pub tags: BTreeSet<ResultTag>,
    pub enriched: bool,
    /// Publication date read from the page during enrichment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<NaiveDate>,
}

impl SearchResult {
    pub fn from_hit(
        hit: RawHit,
        category: &str,
        tier: Tier,
        origin_query: &str,
        scoped: bool,
    ) -> Self {
        let source_domain = extract_domain(&hit.url);
        Self {
            url: hit.url,
            title: hit.title,
            description: hit.description,
            source_domain,
            category: category.to_string(),
            tier,
            origin_query: origin_query.to_string(),
            scoped,
            relevance_score: 0.0,
            tags: BTreeSet::new(),
            enriched: false,
            published: None,
        }
    }
}

/// Lower-cased host of a URL, or an empty string if it does not parse.
pub fn extract_domain(raw: &str) -> String {
    url::Url::parse(raw)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        .unwrap_or_default()
}

/// Why a repository document was judged to cover the technique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchBasis {
    ExactId,
    ParentId,
    NameKeyword,
}

impl MatchBasis {
    /// Base confidence for this basis alone.
    pub fn confidence(self) -> f64 {
        match self {
            MatchBasis::ExactId => 1.0,
            MatchBasis::ParentId => 0.75,
            MatchBasis::NameKeyword => 0.5,
        }
    }
}

/// A document in the external repository that already covers the technique.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExistingReportMatch {
    pub document_id: String,
    pub title: String,
    pub path: String,
    pub match_confidence: f64,
    /// Strongest basis that fired.
    pub match_basis: MatchBasis,
    pub match_bases: Vec<MatchBasis>,
    /// Paths of secondary documents associated by title.
    pub cross_referenced_children: Vec<String>,
}
