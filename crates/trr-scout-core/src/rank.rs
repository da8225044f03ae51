//! Scoring pass, ranking and the research output contract.
//!
//! ```text
//! collected results ─▶ score_and_filter ─▶ dedup ─▶ (enrichment ─▶ title dedup) ─▶ bucketize
//!                      score, classify,            refresh title                     tier-1 first,
//!                      drop < min_score            and description                   score desc, cap
//! ```
//!
//! Dedup runs over every category at once; bucketing regroups survivors by
//! their own category afterwards. When enrichment will run, results with a
//! provisional title skip the first title pass and are compared by
//! [`dedup_enriched_titles`] once their titles are refreshed.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::Serialize;

use crate::classify::classify;
use crate::dedup::{dedup, dedup_deferring_titles, dedup_titles, DedupPolicy};
use crate::enrich::{has_provisional_title, EnrichmentPolicy};
use crate::matcher::DdmFile;
use crate::models::{Category, ExistingReportMatch, Priority, RawHit, SearchResult, TechniqueId, Tier};
use crate::technique::{AtomicTest, TechniqueDetails};
use crate::score::{filter_by_score, score, RelevanceLabel, ScoreContext};

/// Everything the scoring pass needs beyond the results themselves.
pub struct ScoringInputs<'a> {
    pub id: &'a TechniqueId,
    pub name: Option<&'a str>,
    pub categories: &'a [Category],
    pub cited_domains: &'a BTreeSet<String>,
    pub min_score: f64,
}

/// Outcome of [`score_and_filter`] followed by dedup.
#[derive(Debug, Clone)]
pub struct Selection {
    pub results: Vec<SearchResult>,
    /// Results dropped for scoring below the threshold.
    pub filtered_count: usize,
}

/// Score and tag every result, then drop those below `min_score`.
///
/// A result whose category is not in `categories` keeps a score of 0.
pub fn score_and_filter(mut results: Vec<SearchResult>, inputs: &ScoringInputs<'_>) -> Selection {
    for result in results.iter_mut() {
        if let Some(category) = inputs.categories.iter().find(|c| c.name == result.category) {
            let ctx = ScoreContext {
                id: inputs.id,
                name: inputs.name,
                category,
                tier: result.tier,
                scoped: result.scoped,
                cited_domains: inputs.cited_domains,
            };
            let hit = RawHit {
                url: result.url.clone(),
                title: result.title.clone(),
                description: result.description.clone(),
            };
            result.relevance_score = score(&hit, &ctx);
        }
        result.tags = classify(result);
    }
    let (results, filtered_count) = filter_by_score(results, inputs.min_score, |r| r.relevance_score);
    Selection {
        results,
        filtered_count,
    }
}

/// Score, filter, then dedup across all categories.
///
/// Pass `enrichment` when a metadata fetch will follow: provisional titles
/// are then left for [`dedup_enriched_titles`].
pub fn select(
    results: Vec<SearchResult>,
    inputs: &ScoringInputs<'_>,
    policy: &DedupPolicy,
    enrichment: Option<&EnrichmentPolicy>,
) -> Selection {
    let selection = score_and_filter(results, inputs);
    let results = match enrichment {
        Some(ep) => dedup_deferring_titles(selection.results, policy, |r| has_provisional_title(r, ep)),
        None => dedup(selection.results, policy),
    };
    Selection {
        results,
        filtered_count: selection.filtered_count,
    }
}

/// Title-similarity pass after enrichment. Results whose fetch failed keep
/// their provisional title and are still left out.
pub fn dedup_enriched_titles(
    results: Vec<SearchResult>,
    policy: &DedupPolicy,
    enrichment: &EnrichmentPolicy,
) -> Vec<SearchResult> {
    dedup_titles(results, policy, |r| has_provisional_title(r, enrichment))
}

/// Tier-1 results first, then score descending. Stable for equal keys.
pub fn rank_results(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        let tier = |t: Tier| if t == Tier::One { 0 } else { 1 };
        tier(a.tier).cmp(&tier(b.tier)).then_with(|| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(Ordering::Equal)
        })
    });
}

/// Ranked results for one category.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryBucket {
    pub name: String,
    pub label: String,
    pub priority: Priority,
    pub results: Vec<RankedResult>,
}

/// A result with its presentation label.
#[derive(Debug, Clone, Serialize)]
pub struct RankedResult {
    #[serde(flatten)]
    pub result: SearchResult,
    pub relevance_label: RelevanceLabel,
}

/// Group results by category, rank each group and cap it at
/// `max_per_category` (`0` means no cap).
///
/// Buckets come out in priority order (high first), config order within a
/// priority. Categories with no results still get an empty bucket.
pub fn bucketize(
    categories: &[Category],
    results: Vec<SearchResult>,
    max_per_category: usize,
) -> Vec<CategoryBucket> {
    let mut ordered: Vec<&Category> = categories.iter().collect();
    ordered.sort_by_key(|c| priority_rank(c.priority));

    let mut buckets: Vec<CategoryBucket> = Vec::with_capacity(ordered.len());
    for category in ordered {
        let mut own: Vec<SearchResult> = results
            .iter()
            .filter(|r| r.category == category.name)
            .cloned()
            .collect();
        rank_results(&mut own);
        if max_per_category > 0 {
            own.truncate(max_per_category);
        }
        buckets.push(CategoryBucket {
            name: category.name.clone(),
            label: category.label.clone(),
            priority: category.priority,
            results: own
                .into_iter()
                .map(|result| RankedResult {
                    relevance_label: RelevanceLabel::for_score(result.relevance_score),
                    result,
                })
                .collect(),
        });
    }
    buckets
}

fn priority_rank(p: Priority) -> u8 {
    match p {
        Priority::High => 0,
        Priority::Medium => 1,
        Priority::Low => 2,
    }
}

/// The serializable result of one research run.
#[derive(Debug, Clone, Serialize)]
pub struct ResearchOutput {
    pub technique_id: TechniqueId,
    pub technique_name: Option<String>,
    pub buckets: Vec<CategoryBucket>,
    pub existing_reports: Vec<ExistingReportMatch>,
    /// Results dropped for scoring below `min_score`.
    pub filtered_count: usize,
    pub min_score: f64,
    /// Reference-page metadata, when the lookup succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub technique: Option<TechniqueDetails>,
    /// Emulation tests published for the technique.
    pub atomic_tests: Vec<AtomicTest>,
    /// Detection data model files in the report repository.
    pub ddm_files: Vec<DdmFile>,
}

impl ResearchOutput {
    pub fn total_results(&self) -> usize {
        self.buckets.iter().map(|b| b.results.len()).sum()
    }
}
