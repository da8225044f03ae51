//! Research pipeline orchestration.
//!
//! ```text
//! reference lookup ─▶ name + cited domains + technique details
//! atomic lookup    ─▶ emulation tests
//!        │
//!        ▼
//! for each category: plan ─▶ search (cached, rate limited) ─▶ results
//!        │
//!        ▼
//! score + classify + filter ─▶ dedup (all categories) ─▶ enrich ─▶ title dedup ─▶ buckets
//!        │
//!        ▼
//! repository listing ─▶ existing-report matches + DDM files
//! ```
//!
//! Every outbound client shares one [`RateLimiter`], so the configured delay
//! holds across search, reference, atomic, repository and page fetches.
//!
//! Everything runs sequentially. Network failures degrade the output (fewer
//! results, no reference data, no matches) and never abort the run; only
//! invalid options do.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};

use trr_scout_core::cache::Cache;
use trr_scout_core::enrich::needs_enrichment;
use trr_scout_core::matcher::{find_ddm_files, match_existing_reports};
use trr_scout_core::models::{SearchResult, TechniqueId};
use trr_scout_core::planner::{plan_queries, PlannedQuery};
use trr_scout_core::rank::{bucketize, dedup_enriched_titles, select, ResearchOutput, ScoringInputs};

use crate::atomic::AtomicClient;
use crate::backend::DuckDuckGoBackend;
use crate::config::Config;
use crate::http::{HttpFetcher, PageFetcher, RetryPolicy};
use crate::metadata::MetadataEnricher;
use crate::progress::{ProgressReporter, ResearchProgressEvent};
use crate::rate_limit::RateLimiter;
use crate::reference::ReferenceClient;
use crate::repository::RepositoryClient;
use crate::search_client::SearchClient;

/// Per-run options, usually from the command line.
#[derive(Debug, Clone)]
pub struct ResearchOptions {
    pub technique_name: Option<String>,
    pub bypass_cache: bool,
    /// Overrides `search.min_relevance_score`.
    pub min_score: Option<f64>,
    /// Overrides `search.max_results_per_category`. `0` means no cap.
    pub max_per_category: Option<usize>,
    pub enrich: bool,
    pub search: bool,
    /// Look up emulation tests.
    pub atomic: bool,
    pub extra_terms: Option<String>,
}

impl Default for ResearchOptions {
    fn default() -> Self {
        Self {
            technique_name: None,
            bypass_cache: false,
            min_score: None,
            max_per_category: None,
            enrich: true,
            search: true,
            atomic: true,
            extra_terms: None,
        }
    }
}

/// The outbound components a run uses. Optional parts are skipped when
/// absent.
pub struct Services {
    pub search: SearchClient,
    pub reference: Option<ReferenceClient>,
    pub atomic: Option<AtomicClient>,
    pub repository: Option<RepositoryClient>,
    pub enricher: Option<MetadataEnricher>,
}

impl Services {
    /// Wire up HTTP-backed services from config.
    ///
    /// `repo_override` replaces `repository.github_repo`; an empty
    /// repository disables matching.
    pub fn from_config(config: &Config, cache: Arc<dyn Cache>, repo_override: Option<&str>) -> Result<Self> {
        let fetcher: Arc<dyn PageFetcher> = Arc::new(
            HttpFetcher::new(
                &config.search.user_agent,
                Duration::from_secs(config.search.timeout_secs),
            )?
            .with_github_token(std::env::var("GITHUB_TOKEN").ok()),
        );
        let retry = RetryPolicy::new(
            config.search.max_retries,
            Duration::from_millis(config.search.retry_backoff_ms),
        );
        let limiter = Arc::new(RateLimiter::from_secs_f64(
            config.search.delay_between_requests_secs,
        ));

        let search = SearchClient::new(
            Arc::new(DuckDuckGoBackend::new(fetcher.clone())),
            cache.clone(),
            limiter.clone(),
            retry.clone(),
            config.cache.search_ttl(),
        );

        let reference = config.reference.enabled.then(|| {
            ReferenceClient::new(
                fetcher.clone(),
                cache.clone(),
                limiter.clone(),
                config.reference.base_url.clone(),
                config.cache.reference_ttl(),
                retry.clone(),
            )
        });

        let atomic = config.atomic.enabled.then(|| {
            AtomicClient::new(
                fetcher.clone(),
                cache.clone(),
                limiter.clone(),
                config.atomic.raw_base_url.clone(),
                config.atomic.browse_base_url.clone(),
                config.cache.atomic_ttl(),
                retry.clone(),
            )
        });

        let repo = repo_override.unwrap_or(&config.repository.github_repo).trim();
        let repository = if repo.is_empty() {
            None
        } else {
            Some(RepositoryClient::new(
                fetcher.clone(),
                cache.clone(),
                limiter.clone(),
                config.repository.api_base_url.clone(),
                repo,
                config.repository.branch.clone(),
                config.cache.listing_ttl(),
                retry.clone(),
            )?)
        };

        let enricher = config.enrichment.enabled.then(|| {
            MetadataEnricher::new(
                fetcher.clone(),
                limiter.clone(),
                RetryPolicy::none(),
                config.enrichment_policy(),
            )
        });

        Ok(Self {
            search,
            reference,
            atomic,
            repository,
            enricher,
        })
    }
}

/// Planned queries for every category, in config order.
pub fn plan_all(
    config: &Config,
    id: &TechniqueId,
    name: Option<&str>,
    extra_terms: Option<&str>,
) -> Vec<(String, Vec<PlannedQuery>)> {
    let params = config.plan_params(extra_terms);
    config
        .categories()
        .iter()
        .map(|c| (c.name.clone(), plan_queries(c, id, name, &params)))
        .collect()
}

/// Run the full research pipeline for one technique.
pub async fn run_research(
    config: &Config,
    services: &Services,
    id: &TechniqueId,
    opts: &ResearchOptions,
    progress: &dyn ProgressReporter,
) -> Result<ResearchOutput> {
    let min_score = opts.min_score.unwrap_or(config.search.min_relevance_score);
    if !(0.0..=1.0).contains(&min_score) {
        bail!("min score must be in [0.0, 1.0], got {}", min_score);
    }
    let max_per_category = opts
        .max_per_category
        .unwrap_or(config.search.max_results_per_category);

    // Reference system: name fallback and cited domains.
    let mut name = opts
        .technique_name
        .clone()
        .filter(|n| !n.trim().is_empty());
    let mut cited_domains = BTreeSet::new();
    let mut technique = None;
    if let Some(reference) = &services.reference {
        progress.report(ResearchProgressEvent::Reference {
            technique: id.to_string(),
        });
        if let Some(info) = reference.lookup(id, opts.bypass_cache).await {
            if name.is_none() {
                name = info.name;
            }
            cited_domains = info.cited_domains;
            technique = (!info.details.is_empty()).then_some(info.details);
        }
    }

    let mut atomic_tests = Vec::new();
    if opts.atomic {
        if let Some(atomic) = &services.atomic {
            progress.report(ResearchProgressEvent::Atomic {
                technique: id.to_string(),
            });
            atomic_tests = atomic.tests_for(id, opts.bypass_cache).await;
            tracing::info!(tests = atomic_tests.len(), "atomic lookup complete");
        }
    }

    // Search every category.
    let categories = config.categories();
    let mut collected: Vec<SearchResult> = Vec::new();
    if opts.search {
        let params = config.plan_params(opts.extra_terms.as_deref());
        for category in &categories {
            let plan = plan_queries(category, id, name.as_deref(), &params);
            let total = plan.len();
            for (i, query) in plan.iter().enumerate() {
                progress.report(ResearchProgressEvent::Searching {
                    category: category.name.clone(),
                    n: i + 1,
                    total,
                    query: query.query.clone(),
                });
                let hits = services
                    .search
                    .search(&query.query, query.max_results, opts.bypass_cache)
                    .await;
                collected.extend(hits.into_iter().map(|hit| {
                    SearchResult::from_hit(hit, &category.name, query.tier, &query.query, query.is_scoped())
                }));
            }
        }
    }
    tracing::info!(collected = collected.len(), "search complete");

    // Score, filter, dedup.
    let inputs = ScoringInputs {
        id,
        name: name.as_deref(),
        categories: &categories,
        cited_domains: &cited_domains,
        min_score,
    };
    let dedup_policy = config.dedup_policy();
    let enrichment_policy = config.enrichment_policy();
    let enricher = services.enricher.as_ref().filter(|_| opts.enrich);
    let selection = select(
        collected,
        &inputs,
        &dedup_policy,
        enricher.map(|_| &enrichment_policy),
    );
    let mut results = selection.results;
    tracing::info!(
        kept = results.len(),
        filtered = selection.filtered_count,
        "scored and deduplicated"
    );

    // Enrichment, then the title pass deferred for provisional titles.
    if let Some(enricher) = enricher {
        let total = results
            .iter()
            .filter(|r| needs_enrichment(r, &enrichment_policy))
            .count();
        if total > 0 {
            progress.report(ResearchProgressEvent::Enriching { total });
            let updated = enricher.enrich_all(&mut results).await;
            tracing::info!(updated, total, "enrichment complete");
        }
        let before = results.len();
        results = dedup_enriched_titles(results, &dedup_policy, &enrichment_policy);
        tracing::debug!(merged = before - results.len(), "post-enrichment title dedup");
    }

    let buckets = bucketize(&categories, results, max_per_category);

    // Existing reports.
    let (existing_reports, ddm_files) = match &services.repository {
        Some(repository) => {
            progress.report(ResearchProgressEvent::Matching {
                repo: repository.repo().to_string(),
            });
            match repository.listing(opts.bypass_cache).await {
                Ok(listing) => {
                    let params = config.matcher_params();
                    let matches = match_existing_reports(&listing, id, name.as_deref(), &params);
                    let ddm = find_ddm_files(&listing, id, &matches, &params);
                    (matches, ddm)
                }
                Err(e) => {
                    tracing::warn!(error = %format!("{:#}", e), "existing-report matching skipped");
                    (Vec::new(), Vec::new())
                }
            }
        }
        None => (Vec::new(), Vec::new()),
    };

    Ok(ResearchOutput {
        technique_id: id.clone(),
        technique_name: name,
        buckets,
        existing_reports,
        filtered_count: selection.filtered_count,
        min_score,
        technique,
        atomic_tests,
        ddm_files,
    })
}
