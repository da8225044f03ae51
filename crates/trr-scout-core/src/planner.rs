//! Query planning: turn a category into an ordered list of search queries.
//!
//! # Two-phase strategy
//!
//! 1. **Tier 1**: one query per tier-1 domain in the category,
//!    `"<id>" site:<domain> <suffix>`, capped at a small number of results.
//!    High-value domains get guaranteed coverage instead of competing for
//!    slots in a batched query.
//! 2. **Tier 2**: the remaining domains in fixed-size batches,
//!    `"<id>" (site:a OR site:b ...) <suffix>`, followed by up to two shared
//!    queries with no site scoping.
//!
//! A category with a built-in `scoped_site` skips both phases and issues its
//! single scoped query instead.

use serde::Serialize;

use crate::models::{Category, TechniqueId, Tier};

/// Planning knobs, decoupled from application config.
#[derive(Debug, Clone)]
pub struct PlanParams {
    /// Result cap for each tier-1 (single domain) query.
    pub tier1_results_per_domain: usize,
    /// Result cap for tier-2, shared and scoped queries.
    pub max_results_per_query: usize,
    /// Number of domains per OR-scoped tier-2 query.
    pub batch_size: usize,
    /// Number of unscoped shared queries (0..=2).
    pub shared_queries: usize,
    /// Extra terms appended to every query.
    pub extra_terms: String,
}

impl Default for PlanParams {
    fn default() -> Self {
        Self {
            tier1_results_per_domain: 2,
            max_results_per_query: 10,
            batch_size: 5,
            shared_queries: 2,
            extra_terms: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Tier1Domain,
    Batch,
    Shared,
    Scoped,
}

/// One query to issue against the search backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedQuery {
    pub query: String,
    pub kind: QueryKind,
    pub tier: Tier,
    pub max_results: usize,
    /// Domains (or the scoped site) this query is restricted to.
    pub domains: Vec<String>,
}

impl PlannedQuery {
    pub fn is_scoped(&self) -> bool {
        self.kind == QueryKind::Scoped
    }
}

/// Plan the queries for one category. Tier-1 queries always come first.
pub fn plan_queries(
    category: &Category,
    id: &TechniqueId,
    name: Option<&str>,
    params: &PlanParams,
) -> Vec<PlannedQuery> {
    let quoted_id = format!("\"{}\"", id);
    let tail = join_terms(&[category.search_suffix.as_str(), params.extra_terms.as_str()]);

    if let Some(site) = &category.scoped_site {
        return vec![PlannedQuery {
            query: join_terms(&[&quoted_id, &format!("site:{}", site), &tail]),
            kind: QueryKind::Scoped,
            tier: Tier::Two,
            max_results: params.max_results_per_query,
            domains: vec![site.clone()],
        }];
    }

    let mut queries = Vec::new();

    for domain in &category.tier1_domains {
        queries.push(PlannedQuery {
            query: join_terms(&[&quoted_id, &format!("site:{}", domain), &tail]),
            kind: QueryKind::Tier1Domain,
            tier: Tier::One,
            max_results: params.tier1_results_per_domain,
            domains: vec![domain.clone()],
        });
    }

    let remaining: Vec<&String> = category
        .domains
        .iter()
        .filter(|d| !category.tier1_domains.contains(d))
        .collect();

    for batch in remaining.chunks(params.batch_size.max(1)) {
        let sites = batch
            .iter()
            .map(|d| format!("site:{}", d))
            .collect::<Vec<_>>()
            .join(" OR ");
        queries.push(PlannedQuery {
            query: join_terms(&[&quoted_id, &format!("({})", sites), &tail]),
            kind: QueryKind::Batch,
            tier: Tier::Two,
            max_results: params.max_results_per_query,
            domains: batch.iter().map(|d| d.to_string()).collect(),
        });
    }

    for query in shared_queries(id, name, &tail).into_iter().take(params.shared_queries.min(2)) {
        queries.push(PlannedQuery {
            query,
            kind: QueryKind::Shared,
            tier: Tier::Two,
            max_results: params.max_results_per_query,
            domains: Vec::new(),
        });
    }

    queries
}

fn shared_queries(id: &TechniqueId, name: Option<&str>, tail: &str) -> Vec<String> {
    let name = name
        .map(str::trim)
        .filter(|n| !n.is_empty() && !n.eq_ignore_ascii_case(id.as_str()));
    let mut out = vec![join_terms(&[&format!("\"{}\"", id), name.unwrap_or(""), tail])];
    if let Some(name) = name {
        out.push(join_terms(&[&format!("\"{}\"", name), id.as_str(), tail]));
    }
    out
}

/// Join non-empty terms with single spaces.
fn join_terms(terms: &[&str]) -> String {
    terms
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
