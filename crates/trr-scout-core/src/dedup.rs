//! Deduplication of scored results.
//!
//! [`dedup`] applies five passes in order. Each pass partitions the list into
//! equivalence classes and keeps one survivor per class:
//!
//! 1. **Exact URL**: same URL after normalization (scheme, host case,
//!    fragment, trailing slash).
//! 2. **Repository fork**: same file path in a same-named repository on a
//!    code host, owned by different namespaces (branch ignored).
//! 3. **Technique directory fork**: same technique-ID directory in a
//!    same-named repository under different owners; the winning owner keeps
//!    all of its files in that directory.
//! 4. **Same paper**: same arXiv ID or DOI (PDF vs. abstract page).
//! 5. **Title similarity**: normalized titles more similar than the
//!    threshold (syndicated or republished posts).
//!
//! Titles that are placeholders until a metadata fetch (a video page titled
//! "YouTube") say nothing about the content. [`dedup_deferring_titles`]
//! keeps such results out of pass 5; [`dedup_titles`] runs pass 5 alone once
//! titles have been refreshed.
//!
//! Survivors keep their original relative order. Every pass only removes
//! items and leaves at most one survivor per class, so running [`dedup`] on
//! its own output changes nothing.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::OnceLock;

use regex::Regex;

use crate::models::{SearchResult, Tier};

/// Known-canonical maintainers, most authoritative first.
pub const DEFAULT_CANONICAL_NAMESPACES: &[&str] = &[
    "redcanaryco",
    "sigmahq",
    "mitre-attack",
    "mitre",
    "center-for-threat-informed-defense",
    "lolbas-project",
    "gtfobins",
    "splunk",
    "elastic",
    "microsoft",
    "azure",
    "tired-labs",
];

pub const DEFAULT_TITLE_SIMILARITY: f64 = 0.90;

/// Dedup tuning.
#[derive(Debug, Clone)]
pub struct DedupPolicy {
    /// Ranked owner list for fork survivor selection (case-insensitive).
    pub canonical_namespaces: Vec<String>,
    /// Titles with similarity strictly above this are duplicates.
    pub title_similarity_threshold: f64,
}

impl Default for DedupPolicy {
    fn default() -> Self {
        Self {
            canonical_namespaces: DEFAULT_CANONICAL_NAMESPACES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            title_similarity_threshold: DEFAULT_TITLE_SIMILARITY,
        }
    }
}

impl DedupPolicy {
    fn namespace_rank(&self, owner: &str) -> Option<usize> {
        self.canonical_namespaces
            .iter()
            .position(|ns| ns.eq_ignore_ascii_case(owner))
    }
}

/// Run all passes in order.
pub fn dedup(results: Vec<SearchResult>, policy: &DedupPolicy) -> Vec<SearchResult> {
    dedup_deferring_titles(results, policy, |_| false)
}

/// Run all passes in order. Results for which `provisional_title` holds are
/// never merged by title; the other passes still apply to them.
pub fn dedup_deferring_titles<F>(results: Vec<SearchResult>, policy: &DedupPolicy, provisional_title: F) -> Vec<SearchResult>
where
    F: Fn(&SearchResult) -> bool,
{
    let results = dedup_exact_url(results);
    let results = dedup_repository_forks(results, policy);
    let results = dedup_technique_directories(results, policy);
    let results = dedup_same_paper(results);
    dedup_similar_titles(results, policy.title_similarity_threshold, provisional_title)
}

/// Pass 5 alone, for a second run after titles were refreshed.
pub fn dedup_titles<F>(results: Vec<SearchResult>, policy: &DedupPolicy, provisional_title: F) -> Vec<SearchResult>
where
    F: Fn(&SearchResult) -> bool,
{
    dedup_similar_titles(results, policy.title_similarity_threshold, provisional_title)
}

// ============ Survivor ordering ============

/// `Less` means `a` is the better survivor: higher score, then tier 1, then
/// earlier position.
fn by_score_then_tier(a: (usize, &SearchResult), b: (usize, &SearchResult)) -> Ordering {
    b.1.relevance_score
        .partial_cmp(&a.1.relevance_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| tier_rank(a.1.tier).cmp(&tier_rank(b.1.tier)))
        .then_with(|| a.0.cmp(&b.0))
}

fn tier_rank(tier: Tier) -> u8 {
    match tier {
        Tier::One => 0,
        Tier::Two => 1,
    }
}

/// Canonical namespace first (listed beats unlisted, lower rank beats
/// higher), otherwise score/tier/position.
fn by_canonical_owner(
    policy: &DedupPolicy,
    a: (usize, &SearchResult),
    b: (usize, &SearchResult),
) -> Ordering {
    let rank_a = repo_location(&a.1.url).and_then(|l| policy.namespace_rank(&l.owner));
    let rank_b = repo_location(&b.1.url).and_then(|l| policy.namespace_rank(&l.owner));
    match (rank_a, rank_b) {
        (Some(x), Some(y)) if x != y => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        _ => by_score_then_tier(a, b),
    }
}

/// Group by `key` and keep the best item of each group under `cmp`. Items
/// without a key are never grouped.
fn collapse_by_key<K, F, C>(results: Vec<SearchResult>, key: F, cmp: C) -> Vec<SearchResult>
where
    K: Eq + Hash,
    F: Fn(&SearchResult) -> Option<K>,
    C: Fn((usize, &SearchResult), (usize, &SearchResult)) -> Ordering,
{
    let mut best: HashMap<K, usize> = HashMap::new();
    for (i, r) in results.iter().enumerate() {
        let Some(k) = key(r) else { continue };
        best.entry(k)
            .and_modify(|cur| {
                if cmp((i, r), (*cur, &results[*cur])) == Ordering::Less {
                    *cur = i;
                }
            })
            .or_insert(i);
    }

    results
        .into_iter()
        .enumerate()
        .filter(|(i, r)| match key(r) {
            Some(k) => best.get(&k) == Some(i),
            None => true,
        })
        .map(|(_, r)| r)
        .collect()
}

// ============ Pass 1: exact URL ============

fn dedup_exact_url(results: Vec<SearchResult>) -> Vec<SearchResult> {
    collapse_by_key(results, |r| Some(normalize_url(&r.url)), by_score_then_tier)
}

/// Canonical form used for URL equality.
///
/// `http` folds to `https`, host is lower-cased, default ports and the
/// fragment are dropped, and a trailing slash on the path is removed. The
/// query string is kept.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(parsed) = url::Url::parse(trimmed) else {
        return trimmed.trim_end_matches('/').to_lowercase();
    };
    let scheme = match parsed.scheme() {
        "http" | "https" => "https",
        other => other,
    };
    let host = parsed.host_str().unwrap_or("").to_ascii_lowercase();
    let port = match parsed.port() {
        Some(p) if p != 80 && p != 443 => format!(":{}", p),
        _ => String::new(),
    };
    let path = parsed.path().trim_end_matches('/');
    let query = parsed
        .query()
        .filter(|q| !q.is_empty())
        .map(|q| format!("?{}", q))
        .unwrap_or_default();
    format!("{}://{}{}{}{}", scheme, host, port, path, query)
}

// ============ Pass 2 & 3: code-host forks ============

/// A file location inside a repository on a code host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLocation {
    /// Normalized host (`raw.githubusercontent.com` folds to `github.com`).
    pub host: String,
    pub owner: String,
    pub repo: String,
    /// Path inside the repository, without the branch.
    pub path: String,
}

/// Parse GitHub blob/tree/raw URLs, raw.githubusercontent.com URLs and
/// GitLab `/-/blob/` URLs into a [`RepoLocation`].
pub fn repo_location(raw: &str) -> Option<RepoLocation> {
    let parsed = url::Url::parse(raw.trim()).ok()?;
    let host = parsed.host_str()?.trim_start_matches("www.").to_ascii_lowercase();
    let segs: Vec<&str> = parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .collect();

    let (host, owner, repo, rest) = match host.as_str() {
        "github.com" => {
            // owner/repo/(blob|tree|raw|edit)/branch/path...
            if segs.len() < 5 || !matches!(segs[2], "blob" | "tree" | "raw" | "edit") {
                return None;
            }
            ("github.com", segs[0], segs[1], &segs[4..])
        }
        "raw.githubusercontent.com" => {
            // owner/repo/branch/path...
            if segs.len() < 4 {
                return None;
            }
            ("github.com", segs[0], segs[1], &segs[3..])
        }
        "gitlab.com" => {
            // owner/repo/-/(blob|tree|raw)/branch/path...
            if segs.len() < 6 || segs[2] != "-" {
                return None;
            }
            ("gitlab.com", segs[0], segs[1], &segs[5..])
        }
        _ => return None,
    };

    Some(RepoLocation {
        host: host.to_string(),
        owner: owner.to_string(),
        repo: repo.trim_end_matches(".git").to_string(),
        path: rest.join("/"),
    })
}

fn dedup_repository_forks(results: Vec<SearchResult>, policy: &DedupPolicy) -> Vec<SearchResult> {
    collapse_by_key(
        results,
        |r| {
            repo_location(&r.url).map(|l| {
                (
                    l.host,
                    l.repo.to_lowercase(),
                    l.path.trim_end_matches('/').to_lowercase(),
                )
            })
        },
        |a, b| by_canonical_owner(policy, a, b),
    )
}

fn technique_dir_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^t\d{4}(\.\d{3})?$").expect("valid technique dir regex"))
}

/// `(host, repo, directory)` when the path sits under a technique-ID
/// directory, e.g. `atomics/T1003.006/T1003.006.yaml` → `atomics/t1003.006`.
fn technique_directory_key(loc: &RepoLocation) -> Option<(String, String, String)> {
    let segs: Vec<&str> = loc.path.split('/').collect();
    // The directory must have something below it.
    let dir_idx = segs[..segs.len().saturating_sub(1)]
        .iter()
        .rposition(|s| technique_dir_re().is_match(s))?;
    let dir = segs[..=dir_idx].join("/").to_lowercase();
    Some((loc.host.clone(), loc.repo.to_lowercase(), dir))
}

fn dedup_technique_directories(results: Vec<SearchResult>, policy: &DedupPolicy) -> Vec<SearchResult> {
    let mut groups: HashMap<(String, String, String), Vec<usize>> = HashMap::new();
    let mut owners: Vec<Option<String>> = Vec::with_capacity(results.len());
    for (i, r) in results.iter().enumerate() {
        let loc = repo_location(&r.url);
        owners.push(loc.as_ref().map(|l| l.owner.to_lowercase()));
        if let Some(key) = loc.as_ref().and_then(technique_directory_key) {
            groups.entry(key).or_default().push(i);
        }
    }

    let mut drop = vec![false; results.len()];
    for members in groups.values() {
        let distinct_owners = {
            let mut o: Vec<&Option<String>> = members.iter().map(|&i| &owners[i]).collect();
            o.sort();
            o.dedup();
            o.len()
        };
        if distinct_owners < 2 {
            continue;
        }
        let Some(&winner) = members
            .iter()
            .min_by(|&&a, &&b| by_canonical_owner(policy, (a, &results[a]), (b, &results[b])))
        else {
            continue;
        };
        for &i in members {
            if owners[i] != owners[winner] {
                drop[i] = true;
            }
        }
    }

    results
        .into_iter()
        .zip(drop)
        .filter(|(_, d)| !d)
        .map(|(r, _)| r)
        .collect()
}

// ============ Pass 4: same paper ============

fn doi_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(10\.\d{4,9}/[^\s?#]+)").expect("valid doi regex"))
}

fn arxiv_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)arxiv\.org/(?:abs|pdf|html)/([a-z\-]+/\d{7}|\d{4}\.\d{4,5})(?:v\d+)?")
            .expect("valid arxiv regex")
    })
}

/// Stable identifier for an academic paper referenced by URL.
pub fn paper_id(raw: &str) -> Option<String> {
    if let Some(c) = arxiv_re().captures(raw) {
        return Some(format!("arxiv:{}", c[1].to_lowercase()));
    }
    let c = doi_re().captures(raw)?;
    let doi = c[1]
        .trim_end_matches('/')
        .trim_end_matches(".pdf")
        .trim_end_matches(".full")
        .to_lowercase();
    Some(format!("doi:{}", doi))
}

fn dedup_same_paper(results: Vec<SearchResult>) -> Vec<SearchResult> {
    collapse_by_key(
        results,
        |r| paper_id(&r.url),
        |a, b| {
            let desc_a = a.1.description.trim().is_empty();
            let desc_b = b.1.description.trim().is_empty();
            desc_a.cmp(&desc_b).then_with(|| by_score_then_tier(a, b))
        },
    )
}

// ============ Pass 5: title similarity ============

/// Lower-case, punctuation to spaces, whitespace collapsed.
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// `1 - levenshtein / max_len` over characters, in `[0, 1]`.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let max_len = a.len().max(b.len());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / max_len as f64
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            cur[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

/// Greedy clustering in survivor order: a result is dropped when its title
/// is too similar to an already-kept, better result. Empty and provisional
/// titles never match.
fn dedup_similar_titles<F>(results: Vec<SearchResult>, threshold: f64, provisional_title: F) -> Vec<SearchResult>
where
    F: Fn(&SearchResult) -> bool,
{
    let mut order: Vec<usize> = (0..results.len()).collect();
    order.sort_by(|&a, &b| by_score_then_tier((a, &results[a]), (b, &results[b])));

    let normalized: Vec<String> = results
        .iter()
        .map(|r| {
            if provisional_title(r) {
                String::new()
            } else {
                normalize_title(&r.title)
            }
        })
        .collect();
    let mut kept: Vec<usize> = Vec::new();
    let mut keep = vec![false; results.len()];

    for i in order {
        let title = &normalized[i];
        let duplicate = !title.is_empty()
            && kept
                .iter()
                .any(|&k| title_similarity(title, &normalized[k]) > threshold);
        if !duplicate {
            keep[i] = true;
            kept.push(i);
        }
    }

    results
        .into_iter()
        .zip(keep)
        .filter(|(_, k)| *k)
        .map(|(r, _)| r)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawHit;

    fn result(url: &str, title: &str, score: f64, tier: Tier) -> SearchResult {
        let mut r = SearchResult::from_hit(
            RawHit {
                url: url.into(),
                title: title.into(),
                description: String::new(),
            },
            "github",
            tier,
            "q",
            false,
        );
        r.relevance_score = score;
        r
    }

    fn urls(results: &[SearchResult]) -> Vec<&str> {
        results.iter().map(|r| r.url.as_str()).collect()
    }

    #[test]
    fn normalize_url_folds_cosmetic_differences() {
        assert_eq!(
            normalize_url("HTTP://Example.COM/Path/#frag"),
            normalize_url("https://example.com/Path")
        );
        assert_ne!(
            normalize_url("https://example.com/a?x=1"),
            normalize_url("https://example.com/a?x=2")
        );
    }

    #[test]
    fn exact_url_keeps_higher_score() {
        let out = dedup(
            vec![
                result("https://example.com/post/", "A", 0.3, Tier::Two),
                result("http://EXAMPLE.com/post", "B", 0.6, Tier::Two),
            ],
            &DedupPolicy::default(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].title, "B");
    }

    #[test]
    fn exact_url_tie_prefers_tier1() {
        let out = dedup_exact_url(vec![
            result("https://example.com/post", "A", 0.5, Tier::Two),
            result("https://example.com/post", "B", 0.5, Tier::One),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].tier, Tier::One);
    }

    #[test]
    fn repo_location_parses_hosts() {
        let gh = repo_location("https://github.com/SigmaHQ/sigma/blob/master/rules/windows/x.yml").unwrap();
        assert_eq!(gh.owner, "SigmaHQ");
        assert_eq!(gh.repo, "sigma");
        assert_eq!(gh.path, "rules/windows/x.yml");

        let raw = repo_location("https://raw.githubusercontent.com/fork/sigma/main/rules/windows/x.yml").unwrap();
        assert_eq!(raw.host, "github.com");
        assert_eq!(raw.path, gh.path);

        assert!(repo_location("https://github.com/SigmaHQ/sigma").is_none());
        assert!(repo_location("https://example.com/a/b/blob/c/d").is_none());
    }

    #[test]
    fn fork_prefers_canonical_namespace() {
        let policy = DedupPolicy {
            canonical_namespaces: vec!["canonical-org".into(), "fork-org".into()],
            ..DedupPolicy::default()
        };
        let out = dedup(
            vec![
                result("https://github.com/fork-org/repo/blob/main/src/lib.rs", "fork copy", 0.9, Tier::One),
                result("https://github.com/canonical-org/repo/blob/master/src/lib.rs", "original", 0.3, Tier::Two),
            ],
            &policy,
        );
        assert_eq!(urls(&out), vec!["https://github.com/canonical-org/repo/blob/master/src/lib.rs"]);
    }

    #[test]
    fn fork_listed_beats_unlisted() {
        let out = dedup_repository_forks(
            vec![
                result("https://github.com/someone/sigma/blob/main/rules/x.yml", "a", 0.9, Tier::Two),
                result("https://github.com/SigmaHQ/sigma/blob/master/rules/x.yml", "b", 0.1, Tier::Two),
            ],
            &DedupPolicy::default(),
        );
        assert_eq!(out.len(), 1);
        assert!(out[0].url.contains("SigmaHQ"));
    }

    #[test]
    fn fork_unlisted_falls_back_to_score() {
        let out = dedup_repository_forks(
            vec![
                result("https://github.com/alice/tools/blob/main/dcsync.py", "a", 0.2, Tier::Two),
                result("https://github.com/bob/tools/blob/main/dcsync.py", "b", 0.4, Tier::Two),
            ],
            &DedupPolicy::default(),
        );
        assert_eq!(urls(&out), vec!["https://github.com/bob/tools/blob/main/dcsync.py"]);
    }

    #[test]
    fn technique_directory_forks_keep_winning_owner() {
        let out = dedup(
            vec![
                result(
                    "https://github.com/someone/atomic-red-team/blob/master/atomics/T1003.006/T1003.006.md",
                    "fork md",
                    0.8,
                    Tier::Two,
                ),
                result(
                    "https://github.com/redcanaryco/atomic-red-team/blob/master/atomics/T1003.006/T1003.006.yaml",
                    "canonical yaml",
                    0.4,
                    Tier::Two,
                ),
                result(
                    "https://github.com/redcanaryco/atomic-red-team/blob/master/atomics/T1003.006/src/helper.ps1",
                    "canonical helper",
                    0.3,
                    Tier::Two,
                ),
            ],
            &DedupPolicy::default(),
        );
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|r| r.url.contains("/redcanaryco/")));
    }

    #[test]
    fn same_owner_different_files_are_kept() {
        let input = vec![
            result("https://github.com/redcanaryco/atomic-red-team/blob/master/atomics/T1003.006/T1003.006.md", "md", 0.4, Tier::Two),
            result("https://github.com/redcanaryco/atomic-red-team/blob/master/atomics/T1003.006/T1003.006.yaml", "yaml", 0.4, Tier::Two),
        ];
        assert_eq!(dedup(input, &DedupPolicy::default()).len(), 2);
    }

    #[test]
    fn paper_ids() {
        assert_eq!(paper_id("https://arxiv.org/abs/2101.01234v2").as_deref(), Some("arxiv:2101.01234"));
        assert_eq!(paper_id("https://arxiv.org/pdf/2101.01234.pdf").as_deref(), Some("arxiv:2101.01234"));
        assert_eq!(
            paper_id("https://dl.acm.org/doi/pdf/10.1145/3372297.3417255").as_deref(),
            Some("doi:10.1145/3372297.3417255")
        );
        assert_eq!(paper_id("https://example.com/blog"), None);
    }

    #[test]
    fn same_paper_prefers_description() {
        let pdf = result("https://arxiv.org/pdf/2101.01234.pdf", "2101.01234.pdf", 0.6, Tier::Two);
        let mut abs = result("https://arxiv.org/abs/2101.01234", "Detecting replication abuse", 0.3, Tier::Two);
        abs.description = "We study directory replication abuse.".into();
        let out = dedup(vec![pdf, abs], &DedupPolicy::default());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].url, "https://arxiv.org/abs/2101.01234");
    }

    #[test]
    fn similar_titles_collapse_to_higher_score() {
        let out = dedup(
            vec![
                result("https://a.com/x", "DCSync Attacks Explained - Detection & Mitigation", 0.4, Tier::Two),
                result("https://b.com/y", "DCSync attacks explained: detection and mitigation", 0.7, Tier::Two),
                result("https://c.com/z", "Something else entirely", 0.2, Tier::Two),
            ],
            &DedupPolicy::default(),
        );
        assert_eq!(urls(&out), vec!["https://b.com/y", "https://c.com/z"]);
    }

    #[test]
    fn similar_titles_tie_prefers_tier1() {
        let out = dedup(
            vec![
                result("https://a.com/x", "Mimikatz DCSync deep dive", 0.5, Tier::Two),
                result("https://b.com/y", "Mimikatz DCSync Deep-Dive", 0.5, Tier::One),
            ],
            &DedupPolicy::default(),
        );
        assert_eq!(urls(&out), vec!["https://b.com/y"]);
    }

    #[test]
    fn non_ascii_titles_fold_case() {
        assert_eq!(normalize_title("ÜBERWACHUNG von DCSync"), "überwachung von dcsync");
        assert_eq!(normalize_title("Détection DCSync"), normalize_title("DÉTECTION dcsync"));
        let out = dedup(
            vec![
                result("https://a.com/x", "Détection des attaques DCSync", 0.3, Tier::Two),
                result("https://b.com/y", "DÉTECTION DES ATTAQUES DCSYNC", 0.6, Tier::Two),
            ],
            &DedupPolicy::default(),
        );
        assert_eq!(urls(&out), vec!["https://b.com/y"]);
    }

    #[test]
    fn provisional_titles_wait_for_enrichment() {
        let videos = vec![
            result("https://www.youtube.com/watch?v=a", "YouTube", 0.4, Tier::Two),
            result("https://www.youtube.com/watch?v=b", "YouTube", 0.3, Tier::Two),
        ];
        let policy = DedupPolicy::default();
        let is_video = |r: &SearchResult| r.url.contains("youtube.com");

        assert_eq!(dedup(videos.clone(), &policy).len(), 1, "plain dedup merges placeholders");
        let deferred = dedup_deferring_titles(videos, &policy, is_video);
        assert_eq!(deferred.len(), 2);

        // Once refreshed, distinct talks survive and real duplicates merge.
        let mut refreshed = deferred;
        refreshed[0].title = "Hunting DCSync with Event 4662".into();
        refreshed[1].title = "Hunting DCSync with event 4662!".into();
        let merged = dedup_titles(refreshed.clone(), &policy, |_| false);
        assert_eq!(urls(&merged), vec!["https://www.youtube.com/watch?v=a"]);

        refreshed[1].title = "Kerberoasting in depth".into();
        assert_eq!(dedup_titles(refreshed, &policy, |_| false).len(), 2);
    }

    #[test]
    fn dissimilar_titles_kept() {
        assert!(title_similarity("dcsync detection", "dcshadow detection") < 0.9);
        assert!((title_similarity("", "") - 1.0).abs() < 1e-9);
        let out = dedup(
            vec![
                result("https://a.com/x", "", 0.5, Tier::Two),
                result("https://b.com/y", "", 0.5, Tier::Two),
            ],
            &DedupPolicy::default(),
        );
        assert_eq!(out.len(), 2, "empty titles never match");
    }

    #[test]
    fn dedup_is_idempotent() {
        let input = vec![
            result("https://example.com/post/", "DCSync in the wild", 0.3, Tier::Two),
            result("http://example.com/post", "DCSync in the wild", 0.6, Tier::One),
            result("https://github.com/fork/sigma/blob/main/rules/win/dcsync.yml", "rule", 0.5, Tier::Two),
            result("https://github.com/SigmaHQ/sigma/blob/master/rules/win/dcsync.yml", "rule", 0.2, Tier::Two),
            result("https://github.com/x/atomic-red-team/blob/master/atomics/T1003.006/T1003.006.md", "art md", 0.4, Tier::Two),
            result("https://github.com/redcanaryco/atomic-red-team/blob/master/atomics/T1003.006/T1003.006.yaml", "art yaml", 0.4, Tier::Two),
            result("https://arxiv.org/pdf/2101.01234v1", "paper pdf", 0.3, Tier::Two),
            result("https://arxiv.org/abs/2101.01234", "paper", 0.3, Tier::Two),
            result("https://a.com/1", "Hunting DCSync with event 4662", 0.45, Tier::Two),
            result("https://b.com/2", "Hunting DCSync with Event 4662!", 0.45, Tier::Two),
            result("https://c.com/3", "Hunting DCSync with event 4663", 0.44, Tier::Two),
            result("https://d.com/4", "", 0.1, Tier::Two),
        ];
        let policy = DedupPolicy::default();
        let once = dedup(input, &policy);
        let twice = dedup(once.clone(), &policy);
        assert_eq!(once, twice);
        assert!(once.len() < 12);
    }
}
