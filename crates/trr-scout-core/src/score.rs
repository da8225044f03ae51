//! Relevance scoring.
//!
//! [`score`] is a pure function of the hit and its [`ScoreContext`]: no I/O,
//! no randomness. Each signal contributes a bounded weight and the sum is
//! clamped to `[0, 1]`.
//!
//! | Signal | Weight |
//! |--------|--------|
//! | ID in title | [`W_ID_TITLE`] |
//! | name in title | [`W_NAME_TITLE`] |
//! | ID in description | [`W_ID_DESC`] |
//! | name in description | [`W_NAME_DESC`] |
//! | ID in URL | [`W_ID_URL`] |
//! | name slug in URL | [`W_NAME_URL`] |
//! | domain cited by the reference system | [`W_CITED_DOMAIN`] |
//! | category priority high / medium | [`W_PRIORITY_HIGH`] / [`W_PRIORITY_MEDIUM`] |
//! | tier-1 query | [`W_TIER1`] |
//! | category-scoped query | [`W_SCOPED`] |
//!
//! The weights are tuned so that an ID-in-title hit from a high-priority
//! tier-1 domain lands above [`STRONG_MATCH`], and a hit with only surface
//! domain trust stays below [`DEFAULT_MIN_SCORE`].

use std::collections::BTreeSet;

use serde::Serialize;

use crate::models::{Category, Priority, RawHit, TechniqueId, Tier};

pub const W_ID_TITLE: f64 = 0.35;
pub const W_NAME_TITLE: f64 = 0.25;
pub const W_ID_DESC: f64 = 0.15;
pub const W_NAME_DESC: f64 = 0.10;
pub const W_ID_URL: f64 = 0.10;
pub const W_NAME_URL: f64 = 0.05;
pub const W_CITED_DOMAIN: f64 = 0.10;
pub const W_PRIORITY_HIGH: f64 = 0.15;
pub const W_PRIORITY_MEDIUM: f64 = 0.05;
pub const W_TIER1: f64 = 0.05;
pub const W_SCOPED: f64 = 0.25;

pub const STRONG_MATCH: f64 = 0.50;
pub const LIKELY_RELEVANT: f64 = 0.25;
pub const POSSIBLE_MATCH: f64 = 0.10;

/// Results below this are dropped unless overridden.
pub const DEFAULT_MIN_SCORE: f64 = LIKELY_RELEVANT;

/// Everything besides the hit itself that scoring depends on.
#[derive(Debug, Clone)]
pub struct ScoreContext<'a> {
    pub id: &'a TechniqueId,
    pub name: Option<&'a str>,
    pub category: &'a Category,
    pub tier: Tier,
    pub scoped: bool,
    /// Domains the reference system cites for this technique.
    pub cited_domains: &'a BTreeSet<String>,
}

/// Score a raw hit in `[0, 1]`.
pub fn score(hit: &RawHit, ctx: &ScoreContext<'_>) -> f64 {
    let title = hit.title.to_lowercase();
    let desc = hit.description.to_lowercase();
    let url = hit.url.to_lowercase();
    let domain = crate::models::extract_domain(&hit.url);

    let id = ctx.id.as_str().to_lowercase();
    let id_path = ctx.id.path_form().to_lowercase();
    let name = short_name(ctx.name, ctx.id);

    let mut total = 0.0;

    if title.contains(&id) {
        total += W_ID_TITLE;
    }
    if desc.contains(&id) {
        total += W_ID_DESC;
    }
    if url.contains(&id) || url.contains(&id_path) {
        total += W_ID_URL;
    }

    if let Some(name) = &name {
        if title.contains(name.as_str()) {
            total += W_NAME_TITLE;
        }
        if desc.contains(name.as_str()) {
            total += W_NAME_DESC;
        }
        let slug = slugify(name);
        if !slug.is_empty() && (url.contains(&slug) || url.contains(&slug.replace('-', ""))) {
            total += W_NAME_URL;
        }
    }

    if !domain.is_empty()
        && ctx
            .cited_domains
            .iter()
            .any(|d| crate::models::domain_matches(&domain, d))
    {
        total += W_CITED_DOMAIN;
    }

    if ctx.category.covers_domain(&domain) {
        total += match ctx.category.priority {
            Priority::High => W_PRIORITY_HIGH,
            Priority::Medium => W_PRIORITY_MEDIUM,
            Priority::Low => 0.0,
        };
    }

    if ctx.tier == Tier::One {
        total += W_TIER1;
    }
    if ctx.scoped {
        total += W_SCOPED;
    }

    total.clamp(0.0, 1.0)
}

/// Lower-cased name used for matching. `"OS Credential Dumping: DCSync"`
/// → `"dcsync"`. Returns `None` when no distinct name is available.
fn short_name(name: Option<&str>, id: &TechniqueId) -> Option<String> {
    let name = name?.trim();
    let short = name.rsplit(':').next().unwrap_or(name).trim().to_lowercase();
    if short.is_empty() || short.eq_ignore_ascii_case(id.as_str()) {
        None
    } else {
        Some(short)
    }
}

fn slugify(s: &str) -> String {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Presentation label for a score. No behavioural effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RelevanceLabel {
    #[serde(rename = "Strong Match")]
    StrongMatch,
    #[serde(rename = "Likely Relevant")]
    LikelyRelevant,
    #[serde(rename = "Possible Match")]
    PossibleMatch,
    #[serde(rename = "Weak Match")]
    WeakMatch,
}

impl RelevanceLabel {
    pub fn for_score(score: f64) -> Self {
        if score >= STRONG_MATCH {
            RelevanceLabel::StrongMatch
        } else if score >= LIKELY_RELEVANT {
            RelevanceLabel::LikelyRelevant
        } else if score >= POSSIBLE_MATCH {
            RelevanceLabel::PossibleMatch
        } else {
            RelevanceLabel::WeakMatch
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RelevanceLabel::StrongMatch => "Strong Match",
            RelevanceLabel::LikelyRelevant => "Likely Relevant",
            RelevanceLabel::PossibleMatch => "Possible Match",
            RelevanceLabel::WeakMatch => "Weak Match",
        }
    }
}

/// Keep results at or above `min_score`. `0.0` keeps everything.
///
/// Returns the survivors and the number dropped.
pub fn filter_by_score<T>(items: Vec<T>, min_score: f64, score_of: impl Fn(&T) -> f64) -> (Vec<T>, usize) {
    if min_score <= 0.0 {
        return (items, 0);
    }
    let before = items.len();
    let kept: Vec<T> = items.into_iter().filter(|i| score_of(i) >= min_score).collect();
    let dropped = before - kept.len();
    (kept, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(priority: Priority) -> Category {
        Category::new(
            "security_research",
            "Security Research",
            priority,
            vec!["specterops.io".into(), "redcanary.com".into()],
            "",
            None,
            &["specterops.io".to_string()],
        )
    }

    fn hit(url: &str, title: &str, desc: &str) -> RawHit {
        RawHit {
            url: url.into(),
            title: title.into(),
            description: desc.into(),
        }
    }

    #[test]
    fn id_in_title_from_tier1_high_priority_is_strong() {
        let id = TechniqueId::parse("T1003.006").unwrap();
        let cat = category(Priority::High);
        let cited = BTreeSet::new();
        let ctx = ScoreContext {
            id: &id,
            name: Some("DCSync"),
            category: &cat,
            tier: Tier::One,
            scoped: false,
            cited_domains: &cited,
        };
        let s = score(
            &hit("https://specterops.io/blog/credential-theft", "Detecting T1003.006 abuse", ""),
            &ctx,
        );
        assert!(s >= STRONG_MATCH, "score {}", s);
        assert_eq!(RelevanceLabel::for_score(s), RelevanceLabel::StrongMatch);
    }

    #[test]
    fn domain_trust_alone_is_filtered_by_default() {
        let id = TechniqueId::parse("T1003.006").unwrap();
        let cat = category(Priority::High);
        let cited = BTreeSet::new();
        let ctx = ScoreContext {
            id: &id,
            name: Some("DCSync"),
            category: &cat,
            tier: Tier::Two,
            scoped: false,
            cited_domains: &cited,
        };
        let s = score(&hit("https://redcanary.com/blog/unrelated", "Quarterly roundup", ""), &ctx);
        assert!(s < DEFAULT_MIN_SCORE, "score {}", s);
    }

    #[test]
    fn scoped_hit_not_penalized_for_missing_keywords() {
        let id = TechniqueId::parse("T1003.006").unwrap();
        let cat = category(Priority::Medium);
        let cited = BTreeSet::new();
        let ctx = ScoreContext {
            id: &id,
            name: None,
            category: &cat,
            tier: Tier::Two,
            scoped: true,
            cited_domains: &cited,
        };
        let s = score(&hit("https://github.com/SigmaHQ/sigma/blob/master/rules/x.yml", "x.yml", ""), &ctx);
        assert!(s >= DEFAULT_MIN_SCORE, "score {}", s);
    }

    #[test]
    fn name_from_qualified_technique_name() {
        let id = TechniqueId::parse("T1003.006").unwrap();
        assert_eq!(
            short_name(Some("OS Credential Dumping: DCSync"), &id).as_deref(),
            Some("dcsync")
        );
        assert_eq!(short_name(Some("T1003.006"), &id), None);
        assert_eq!(short_name(Some("  "), &id), None);
    }

    #[test]
    fn url_path_form_and_cited_domain() {
        let id = TechniqueId::parse("T1003.006").unwrap();
        let cat = category(Priority::Low);
        let cited: BTreeSet<String> = ["adsecurity.org".to_string()].into_iter().collect();
        let ctx = ScoreContext {
            id: &id,
            name: None,
            category: &cat,
            tier: Tier::Two,
            scoped: false,
            cited_domains: &cited,
        };
        let s = score(&hit("https://adsecurity.org/techniques/T1003/006/", "", ""), &ctx);
        assert!((s - (W_ID_URL + W_CITED_DOMAIN)).abs() < 1e-9, "score {}", s);
    }

    #[test]
    fn scores_always_in_unit_interval() {
        let id = TechniqueId::parse("T1003.006").unwrap();
        let cat = category(Priority::High);
        let cited: BTreeSet<String> = ["specterops.io".to_string()].into_iter().collect();
        let hits = [
            hit("", "", ""),
            hit("garbage", "T1003.006 DCSync T1003.006", "dcsync t1003.006"),
            hit(
                "https://specterops.io/t1003.006/dcsync",
                "DCSync T1003.006",
                "T1003.006 DCSync DCSync",
            ),
        ];
        for tier in [Tier::One, Tier::Two] {
            for scoped in [false, true] {
                for name in [None, Some("DCSync"), Some("")] {
                    let ctx = ScoreContext {
                        id: &id,
                        name,
                        category: &cat,
                        tier,
                        scoped,
                        cited_domains: &cited,
                    };
                    for h in &hits {
                        let s = score(h, &ctx);
                        assert!((0.0..=1.0).contains(&s), "out of range: {}", s);
                    }
                }
            }
        }
    }

    #[test]
    fn labels_at_boundaries() {
        assert_eq!(RelevanceLabel::for_score(0.50), RelevanceLabel::StrongMatch);
        assert_eq!(RelevanceLabel::for_score(0.49), RelevanceLabel::LikelyRelevant);
        assert_eq!(RelevanceLabel::for_score(0.25), RelevanceLabel::LikelyRelevant);
        assert_eq!(RelevanceLabel::for_score(0.24), RelevanceLabel::PossibleMatch);
        assert_eq!(RelevanceLabel::for_score(0.10), RelevanceLabel::PossibleMatch);
        assert_eq!(RelevanceLabel::for_score(0.05), RelevanceLabel::WeakMatch);
    }

    #[test]
    fn zero_min_score_keeps_everything() {
        let scores = vec![0.0, 0.05, 0.3, 0.9];
        let (kept, dropped) = filter_by_score(scores.clone(), 0.0, |s| *s);
        assert_eq!(kept, scores);
        assert_eq!(dropped, 0);

        let (kept, dropped) = filter_by_score(scores, DEFAULT_MIN_SCORE, |s| *s);
        assert_eq!(kept, vec![0.3, 0.9]);
        assert_eq!(dropped, 2);
    }
}
