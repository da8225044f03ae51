//! Presentation tags for results: Detection, Threat Intel, Reference.
//!
//! Tags are derived from the category and a small keyword vocabulary over
//! title, description and URL. They never affect scoring, filtering or
//! dedup.

use std::collections::BTreeSet;

use crate::models::{ResultTag, SearchResult};

const DETECTION_CATEGORIES: &[&str] = &["sigma_rules"];
const REFERENCE_CATEGORIES: &[&str] = &["microsoft_docs", "academic", "lolbas_gtfobins"];

const DETECTION_TERMS: &[&str] = &[
    "detection",
    "detecting",
    "detect ",
    "hunting",
    "hunt for",
    "sigma",
    "analytic",
    "kql",
    "splunk query",
    "yara",
    "rule",
];

const THREAT_INTEL_TERMS: &[&str] = &[
    "threat intel",
    "threat report",
    "apt",
    "campaign",
    "threat actor",
    "ransomware",
    "malware",
    "intrusion",
    "incident response",
];

const REFERENCE_HOSTS: &[&str] = &["learn.microsoft.com", "docs.microsoft.com", "arxiv.org", "lolbas-project.github.io", "gtfobins.github.io"];

/// Compute the tag set for a result.
pub fn classify(result: &SearchResult) -> BTreeSet<ResultTag> {
    let mut tags = BTreeSet::new();
    let haystack = format!(
        "{} {} {}",
        result.title.to_lowercase(),
        result.description.to_lowercase(),
        result.url.to_lowercase()
    );

    if DETECTION_CATEGORIES.contains(&result.category.as_str())
        || DETECTION_TERMS.iter().any(|t| contains_term(&haystack, t))
    {
        tags.insert(ResultTag::Detection);
    }

    if THREAT_INTEL_TERMS.iter().any(|t| contains_term(&haystack, t)) {
        tags.insert(ResultTag::ThreatIntel);
    }

    if REFERENCE_CATEGORIES.contains(&result.category.as_str())
        || REFERENCE_HOSTS.contains(&result.source_domain.as_str())
    {
        tags.insert(ResultTag::Reference);
    }

    tags
}

/// Word-prefix match so `"apt"` matches `"APT29"` but not `"adaptive"`.
fn contains_term(haystack: &str, term: &str) -> bool {
    haystack.match_indices(term).any(|(i, _)| {
        i == 0
            || !haystack[..i]
                .chars()
                .next_back()
                .map(char::is_alphanumeric)
                .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RawHit, Tier};

    fn result(category: &str, url: &str, title: &str, desc: &str) -> SearchResult {
        SearchResult::from_hit(
            RawHit {
                url: url.into(),
                title: title.into(),
                description: desc.into(),
            },
            category,
            Tier::Two,
            "q",
            false,
        )
    }

    #[test]
    fn sigma_category_is_detection() {
        let r = result("sigma_rules", "https://github.com/SigmaHQ/sigma/x.yml", "x", "");
        assert!(classify(&r).contains(&ResultTag::Detection));
    }

    #[test]
    fn keyword_tags() {
        let r = result(
            "security_research",
            "https://example.com/post",
            "Hunting for DCSync used by APT29",
            "",
        );
        let tags = classify(&r);
        assert!(tags.contains(&ResultTag::Detection));
        assert!(tags.contains(&ResultTag::ThreatIntel));
        assert!(!tags.contains(&ResultTag::Reference));
    }

    #[test]
    fn apt_does_not_match_inside_words() {
        let r = result("security_research", "https://example.com/", "Adaptive defenses", "");
        assert!(!classify(&r).contains(&ResultTag::ThreatIntel));
    }

    #[test]
    fn docs_host_is_reference() {
        let r = result(
            "security_research",
            "https://learn.microsoft.com/en-us/windows/win32/ad/x",
            "DRSUAPI",
            "",
        );
        assert_eq!(classify(&r), [ResultTag::Reference].into_iter().collect());
    }
}
