//! Configuration parsing and validation.
//!
//! TRR Scout is configured via a TOML file (default: `config/scout.toml`).
//! Every section is optional; omitted fields take the defaults below.
//!
//! # Example
//!
//! ```toml
//! [search]
//! max_results_per_category = 10
//! delay_between_requests_secs = 2.0
//! min_relevance_score = 0.25
//!
//! [tiers]
//! domains = ["specterops.io", "redcanary.com"]
//!
//! [cache]
//! dir = "./cache"
//! search_ttl_hours = 24
//!
//! [repository]
//! github_repo = "tired-labs/techniques"
//!
//! [[categories]]
//! name = "security_research"
//! label = "Security Research Blogs"
//! priority = "high"
//! domains = ["specterops.io", "redcanary.com", "adsecurity.org"]
//! ```
//!
//! # Validation
//!
//! [`load_config`] rejects: empty or duplicate category names, categories
//! without domains, `min_relevance_score` outside `[0, 1]`, `batch_size = 0`,
//! `shared_queries > 2`, a title-similarity threshold outside `(0, 1]`, a
//! request delay that is not finite or above one hour, TTLs outside
//! `[0, MAX_TTL_HOURS]`, and tier-1 domains that no category lists.

use anyhow::{Context, Result};
use chrono::Duration;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::rate_limit::MAX_DELAY;
use trr_scout_core::dedup::{DedupPolicy, DEFAULT_CANONICAL_NAMESPACES, DEFAULT_TITLE_SIMILARITY};
use trr_scout_core::enrich::{EnrichmentPolicy, DEFAULT_MIN_DESCRIPTION_CHARS};
use trr_scout_core::matcher::MatcherParams;
use trr_scout_core::models::{Category, Priority};
use trr_scout_core::planner::PlanParams;
use trr_scout_core::score::DEFAULT_MIN_SCORE;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub tiers: TiersConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub reference: ReferenceConfig,
    #[serde(default)]
    pub atomic: AtomicConfig,
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default = "default_categories")]
    pub categories: Vec<CategoryConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            search: SearchConfig::default(),
            tiers: TiersConfig::default(),
            cache: CacheConfig::default(),
            enrichment: EnrichmentConfig::default(),
            dedup: DedupConfig::default(),
            reference: ReferenceConfig::default(),
            atomic: AtomicConfig::default(),
            repository: RepositoryConfig::default(),
            categories: default_categories(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_max_results")]
    pub max_results_per_category: usize,
    #[serde(default = "default_delay_secs")]
    pub delay_between_requests_secs: f64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_min_score")]
    pub min_relevance_score: f64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_tier1_results")]
    pub tier1_results_per_domain: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_shared_queries")]
    pub shared_queries: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results_per_category: default_max_results(),
            delay_between_requests_secs: default_delay_secs(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            min_relevance_score: default_min_score(),
            user_agent: default_user_agent(),
            tier1_results_per_domain: default_tier1_results(),
            batch_size: default_batch_size(),
            shared_queries: default_shared_queries(),
        }
    }
}

fn default_max_results() -> usize {
    10
}
fn default_delay_secs() -> f64 {
    2.0
}
fn default_timeout_secs() -> u64 {
    15
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    1000
}
fn default_min_score() -> f64 {
    DEFAULT_MIN_SCORE
}
fn default_user_agent() -> String {
    format!(
        "Mozilla/5.0 (X11; Linux x86_64) trr-scout/{}",
        env!("CARGO_PKG_VERSION")
    )
}
fn default_tier1_results() -> usize {
    2
}
fn default_batch_size() -> usize {
    5
}
fn default_shared_queries() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct TiersConfig {
    /// Global tier-1 domain list.
    #[serde(default = "default_tier1_domains")]
    pub domains: Vec<String>,
}

impl Default for TiersConfig {
    fn default() -> Self {
        Self {
            domains: default_tier1_domains(),
        }
    }
}

fn default_tier1_domains() -> Vec<String> {
    [
        "specterops.io",
        "redcanary.com",
        "thedfirreport.com",
        "elastic.co",
        "adsecurity.org",
        "learn.microsoft.com",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_search_ttl")]
    pub search_ttl_hours: i64,
    #[serde(default = "default_reference_ttl")]
    pub reference_ttl_hours: i64,
    #[serde(default = "default_listing_ttl")]
    pub listing_ttl_hours: i64,
    #[serde(default = "default_atomic_ttl")]
    pub atomic_ttl_hours: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            search_ttl_hours: default_search_ttl(),
            reference_ttl_hours: default_reference_ttl(),
            listing_ttl_hours: default_listing_ttl(),
            atomic_ttl_hours: default_atomic_ttl(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./cache")
}
fn default_search_ttl() -> i64 {
    24
}
fn default_reference_ttl() -> i64 {
    24 * 7
}
fn default_listing_ttl() -> i64 {
    24 * 30
}
fn default_atomic_ttl() -> i64 {
    24 * 7
}

/// Longest accepted TTL: ten years.
pub const MAX_TTL_HOURS: i64 = 24 * 365 * 10;

fn ttl_hours(hours: i64) -> Duration {
    Duration::hours(hours.clamp(0, MAX_TTL_HOURS))
}

impl CacheConfig {
    pub fn search_ttl(&self) -> Duration {
        ttl_hours(self.search_ttl_hours)
    }
    pub fn reference_ttl(&self) -> Duration {
        ttl_hours(self.reference_ttl_hours)
    }
    pub fn listing_ttl(&self) -> Duration {
        ttl_hours(self.listing_ttl_hours)
    }
    pub fn atomic_ttl(&self) -> Duration {
        ttl_hours(self.atomic_ttl_hours)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnrichmentConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_min_description_chars")]
    pub min_description_chars: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_description_chars: default_min_description_chars(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_min_description_chars() -> usize {
    DEFAULT_MIN_DESCRIPTION_CHARS
}

#[derive(Debug, Deserialize, Clone)]
pub struct DedupConfig {
    #[serde(default = "default_canonical_namespaces")]
    pub canonical_namespaces: Vec<String>,
    #[serde(default = "default_title_similarity")]
    pub title_similarity_threshold: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            canonical_namespaces: default_canonical_namespaces(),
            title_similarity_threshold: default_title_similarity(),
        }
    }
}

fn default_canonical_namespaces() -> Vec<String> {
    DEFAULT_CANONICAL_NAMESPACES
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_title_similarity() -> f64 {
    DEFAULT_TITLE_SIMILARITY
}

/// The reference system (MITRE ATT&CK) technique pages.
#[derive(Debug, Deserialize, Clone)]
pub struct ReferenceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_reference_base_url")]
    pub base_url: String,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_reference_base_url(),
        }
    }
}

fn default_reference_base_url() -> String {
    "https://attack.mitre.org/techniques".to_string()
}

/// Atomic Red Team emulation tests.
#[derive(Debug, Deserialize, Clone)]
pub struct AtomicConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Raw file root: `<raw_base_url>/<ID>/<ID>.yaml` is fetched.
    #[serde(default = "default_atomic_raw_base_url")]
    pub raw_base_url: String,
    /// Browsable root used for the links in the output.
    #[serde(default = "default_atomic_browse_base_url")]
    pub browse_base_url: String,
}

impl Default for AtomicConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            raw_base_url: default_atomic_raw_base_url(),
            browse_base_url: default_atomic_browse_base_url(),
        }
    }
}

fn default_atomic_raw_base_url() -> String {
    "https://raw.githubusercontent.com/redcanaryco/atomic-red-team/master/atomics".to_string()
}
fn default_atomic_browse_base_url() -> String {
    "https://github.com/redcanaryco/atomic-red-team/blob/master/atomics".to_string()
}

/// The external report repository checked for existing coverage.
#[derive(Debug, Deserialize, Clone)]
pub struct RepositoryConfig {
    /// `owner/name` on GitHub. Empty disables the matcher.
    #[serde(default = "default_github_repo")]
    pub github_repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_reports_path")]
    pub reports_path: String,
    #[serde(default = "default_github_api")]
    pub api_base_url: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            github_repo: default_github_repo(),
            branch: default_branch(),
            reports_path: default_reports_path(),
            api_base_url: default_github_api(),
        }
    }
}

fn default_github_repo() -> String {
    "tired-labs/techniques".to_string()
}
fn default_branch() -> String {
    "main".to_string()
}
fn default_reports_path() -> String {
    "reports".to_string()
}
fn default_github_api() -> String {
    "https://api.github.com".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CategoryConfig {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub search_suffix: String,
    #[serde(default)]
    pub scoped_site: Option<String>,
}

fn category(
    name: &str,
    label: &str,
    priority: Priority,
    domains: &[&str],
    search_suffix: &str,
    scoped_site: Option<&str>,
) -> CategoryConfig {
    CategoryConfig {
        name: name.to_string(),
        label: Some(label.to_string()),
        priority,
        domains: domains.iter().map(|d| d.to_string()).collect(),
        search_suffix: search_suffix.to_string(),
        scoped_site: scoped_site.map(String::from),
    }
}

fn default_categories() -> Vec<CategoryConfig> {
    vec![
        category(
            "security_research",
            "Security Research Blogs",
            Priority::High,
            &[
                "specterops.io",
                "redcanary.com",
                "thedfirreport.com",
                "adsecurity.org",
                "elastic.co",
                "unit42.paloaltonetworks.com",
                "crowdstrike.com",
                "mandiant.com",
                "sentinelone.com",
                "huntress.com",
            ],
            "",
            None,
        ),
        category(
            "microsoft_docs",
            "Microsoft Documentation",
            Priority::Medium,
            &["learn.microsoft.com", "techcommunity.microsoft.com"],
            "",
            None,
        ),
        category(
            "conferences",
            "Conference Talks",
            Priority::Medium,
            &["youtube.com", "blackhat.com", "defcon.org", "slideshare.net", "speakerdeck.com"],
            "talk",
            None,
        ),
        category(
            "github",
            "GitHub Repositories",
            Priority::Medium,
            &["github.com"],
            "",
            None,
        ),
        category(
            "sigma_rules",
            "Sigma Rules",
            Priority::High,
            &["github.com"],
            "",
            Some("github.com/SigmaHQ/sigma"),
        ),
        category(
            "lolbas_gtfobins",
            "LOLBAS / GTFOBins",
            Priority::Low,
            &["lolbas-project.github.io", "gtfobins.github.io"],
            "",
            None,
        ),
        category(
            "academic",
            "Academic Papers",
            Priority::Low,
            &["arxiv.org", "dl.acm.org", "usenix.org", "ieeexplore.ieee.org"],
            "",
            None,
        ),
    ]
}

impl Config {
    /// Resolve category config into core [`Category`] records with their
    /// tier-1 subsets computed.
    pub fn categories(&self) -> Vec<Category> {
        self.categories
            .iter()
            .map(|c| {
                Category::new(
                    c.name.clone(),
                    c.label.clone().unwrap_or_else(|| c.name.clone()),
                    c.priority,
                    c.domains.clone(),
                    c.search_suffix.clone(),
                    c.scoped_site.clone(),
                    &self.tiers.domains,
                )
            })
            .collect()
    }

    pub fn plan_params(&self, extra_terms: Option<&str>) -> PlanParams {
        PlanParams {
            tier1_results_per_domain: self.search.tier1_results_per_domain,
            max_results_per_query: self.search.max_results_per_category,
            batch_size: self.search.batch_size,
            shared_queries: self.search.shared_queries,
            extra_terms: extra_terms.unwrap_or("").to_string(),
        }
    }

    pub fn dedup_policy(&self) -> DedupPolicy {
        DedupPolicy {
            canonical_namespaces: self.dedup.canonical_namespaces.clone(),
            title_similarity_threshold: self.dedup.title_similarity_threshold,
        }
    }

    pub fn enrichment_policy(&self) -> EnrichmentPolicy {
        EnrichmentPolicy {
            min_description_chars: self.enrichment.min_description_chars,
        }
    }

    pub fn matcher_params(&self) -> MatcherParams {
        MatcherParams {
            reports_path: self.repository.reports_path.clone(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

/// Validate a parsed config. Called by [`load_config`].
pub fn validate(config: &Config) -> Result<()> {
    // Validate search
    if !(0.0..=1.0).contains(&config.search.min_relevance_score) {
        anyhow::bail!("search.min_relevance_score must be in [0.0, 1.0]");
    }
    if config.search.batch_size == 0 {
        anyhow::bail!("search.batch_size must be > 0");
    }
    if config.search.shared_queries > 2 {
        anyhow::bail!("search.shared_queries must be <= 2");
    }
    let delay = config.search.delay_between_requests_secs;
    let max_delay = MAX_DELAY.as_secs_f64();
    if !delay.is_finite() || !(0.0..=max_delay).contains(&delay) {
        anyhow::bail!(
            "search.delay_between_requests_secs must be in [0, {}]",
            max_delay
        );
    }

    // Validate dedup
    let t = config.dedup.title_similarity_threshold;
    if !(t > 0.0 && t <= 1.0) {
        anyhow::bail!("dedup.title_similarity_threshold must be in (0.0, 1.0]");
    }

    // Validate cache
    for (key, hours) in [
        ("search_ttl_hours", config.cache.search_ttl_hours),
        ("reference_ttl_hours", config.cache.reference_ttl_hours),
        ("listing_ttl_hours", config.cache.listing_ttl_hours),
        ("atomic_ttl_hours", config.cache.atomic_ttl_hours),
    ] {
        if !(0..=MAX_TTL_HOURS).contains(&hours) {
            anyhow::bail!("cache.{} must be in [0, {}]", key, MAX_TTL_HOURS);
        }
    }

    // Validate categories
    if config.categories.is_empty() {
        anyhow::bail!("at least one [[categories]] entry is required");
    }
    let mut seen = HashSet::new();
    for cat in &config.categories {
        if cat.name.trim().is_empty() {
            anyhow::bail!("category name must not be empty");
        }
        if !seen.insert(cat.name.as_str()) {
            anyhow::bail!("duplicate category name: '{}'", cat.name);
        }
        if cat.domains.is_empty() {
            anyhow::bail!("category '{}' must list at least one domain", cat.name);
        }
    }

    for domain in &config.tiers.domains {
        let listed = config
            .categories
            .iter()
            .any(|c| c.domains.iter().any(|d| d.eq_ignore_ascii_case(domain)));
        if !listed {
            anyhow::bail!(
                "tier-1 domain '{}' is not listed in any category",
                domain
            );
        }
    }

    Ok(())
}
