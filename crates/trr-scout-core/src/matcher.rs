//! Existing-report matching against a repository file listing.
//!
//! The listing is a flat list of paths (one fetch of the repository tree).
//! Markdown files under the reports directory are **primary documents**;
//! every other file is a **secondary document** that can only be attached to
//! a match as a cross-referenced child.
//!
//! ```text
//! reports/trr0004/win/README.md          primary, document_id "trr0004"
//! reports/trr0004/win/ddm_dcsync.png     secondary
//! ```
//!
//! A primary document matches when its path mentions the technique ID, the
//! exact parent ID, or enough keywords from the technique name. Children are
//! found by title lookup: a secondary document belongs to a match when its
//! derived title contains the match's title key.
//!
//! [`find_ddm_files`] lists the detection data model (DDM) JSON files that
//! belong to the technique: named after it, or kept in a matched report's
//! directory.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::{ExistingReportMatch, MatchBasis, TechniqueId};

/// Confidence added for each basis beyond the strongest one.
pub const EXTRA_BASIS_BONUS: f64 = 0.05;

/// One entry of a repository tree listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingEntry {
    pub path: String,
    /// `false` for directories.
    #[serde(default = "default_true")]
    pub is_file: bool,
}

fn default_true() -> bool {
    true
}

/// A detection data model file in the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DdmFile {
    pub path: String,
    /// Report directory holding the file, when it sits under the reports path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
}

impl ListingEntry {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            is_file: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatcherParams {
    /// Directory holding primary documents, relative to the repository root.
    pub reports_path: String,
}

impl Default for MatcherParams {
    fn default() -> Self {
        Self {
            reports_path: "reports".to_string(),
        }
    }
}

fn path_technique_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)t\d{4}(?:[._]\d{3})?").expect("valid path technique regex"))
}

/// Byte ranges of technique IDs in `s`, bounded by non-alphanumerics before
/// and a non-digit after.
fn technique_id_spans(s: &str) -> Vec<std::ops::Range<usize>> {
    path_technique_re()
        .find_iter(s)
        .filter(|m| {
            let before_ok = !s[..m.start()]
                .chars()
                .next_back()
                .is_some_and(char::is_alphanumeric);
            let after_ok = !s[m.end()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_digit());
            before_ok && after_ok
        })
        .map(|m| m.range())
        .collect()
}

/// Technique IDs mentioned in a path, normalized (`t1003_006` → `T1003.006`).
pub fn technique_ids_in_path(path: &str) -> BTreeSet<String> {
    technique_id_spans(path)
        .into_iter()
        .map(|r| path[r].to_uppercase().replace('_', "."))
        .collect()
}

fn strip_technique_ids(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for r in technique_id_spans(s) {
        out.push_str(&s[last..r.start]);
        out.push(' ');
        last = r.end;
    }
    out.push_str(&s[last..]);
    out
}

/// Human title for a document path.
///
/// The file stem is used unless it is a generic name (`README`, `index`), in
/// which case the directories below the document directory are used.
/// Technique IDs and separators are stripped.
pub fn derive_title(path: &str, document_id: &str) -> String {
    let segs: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let Some((file, dirs)) = segs.split_last() else {
        return document_id.to_string();
    };
    let stem = file.rsplit_once('.').map(|(s, _)| s).unwrap_or(file);

    let source = if is_generic_stem(stem) {
        let below: Vec<&str> = dirs
            .iter()
            .skip_while(|d| **d != document_id)
            .skip(1)
            .copied()
            .collect();
        below.join(" ")
    } else {
        stem.to_string()
    };

    let title = humanize(&strip_technique_ids(&source));
    if title.is_empty() {
        document_id.to_string()
    } else {
        title
    }
}

fn is_generic_stem(stem: &str) -> bool {
    matches!(stem.to_ascii_lowercase().as_str(), "readme" | "index")
}

/// Separators to spaces, whitespace collapsed.
fn humanize(s: &str) -> String {
    s.split(|c: char| c == '-' || c == '_' || c == '.' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lower-cased alphanumeric form used for title lookup.
fn title_key(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Name keywords: words longer than three characters, lower-cased. For a
/// qualified name (`"OS Credential Dumping: DCSync"`) only the part after
/// the last colon counts.
fn name_keywords(name: Option<&str>) -> Vec<String> {
    let Some(name) = name else { return Vec::new() };
    let name = name.rsplit(':').next().unwrap_or(name);
    let mut words: Vec<String> = name
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 3)
        .map(str::to_lowercase)
        .collect();
    words.dedup();
    words
}

/// `document_id` for a primary path, or `None` when the path is not a
/// primary document.
fn primary_document_id(path: &str, reports_path: &str) -> Option<String> {
    let prefix = reports_path.trim_matches('/');
    let rest = if prefix.is_empty() {
        path
    } else {
        path.strip_prefix(prefix)?.strip_prefix('/')?
    };
    if !rest.to_ascii_lowercase().ends_with(".md") {
        return None;
    }
    let first = rest.split('/').next()?;
    let id = if rest.contains('/') {
        first.to_string()
    } else {
        first.rsplit_once('.').map(|(s, _)| s).unwrap_or(first).to_string()
    };
    Some(id)
}

/// First directory under the reports path, for any file inside one.
fn report_directory(path: &str, reports_path: &str) -> Option<String> {
    let prefix = reports_path.trim_matches('/');
    let rest = if prefix.is_empty() {
        path
    } else {
        path.strip_prefix(prefix)?.strip_prefix('/')?
    };
    let (first, _) = rest.split_once('/')?;
    (!first.is_empty()).then(|| first.to_string())
}

fn is_ddm_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.ends_with(".json") && lower.split('/').any(|seg| seg.contains("ddm"))
}

/// DDM JSON files for the technique, in listing order.
///
/// A file qualifies when its path names the technique ID (`T1003.006` or
/// `T1003_006`) or when it lives in the directory of one of `matches`.
pub fn find_ddm_files(
    listing: &[ListingEntry],
    id: &TechniqueId,
    matches: &[ExistingReportMatch],
    params: &MatcherParams,
) -> Vec<DdmFile> {
    listing
        .iter()
        .filter(|e| e.is_file && is_ddm_path(&e.path))
        .filter_map(|e| {
            let document_id = report_directory(&e.path, &params.reports_path);
            let named = technique_ids_in_path(&e.path).contains(id.as_str());
            let in_match = document_id
                .as_deref()
                .is_some_and(|d| matches.iter().any(|m| m.document_id == d));
            (named || in_match).then(|| DdmFile {
                path: e.path.clone(),
                document_id,
            })
        })
        .collect()
}

/// Match primary documents in `listing` against the technique.
///
/// One match per `document_id` (its highest-confidence document), sorted by
/// confidence descending, then `document_id`.
pub fn match_existing_reports(
    listing: &[ListingEntry],
    id: &TechniqueId,
    name: Option<&str>,
    params: &MatcherParams,
) -> Vec<ExistingReportMatch> {
    let parent = id.parent();
    let keywords = name_keywords(name);
    let needed = keywords.len().min(2);

    let secondary: Vec<(&str, String)> = listing
        .iter()
        .filter(|e| e.is_file && primary_document_id(&e.path, &params.reports_path).is_none())
        .map(|e| {
            let stem = e.path.rsplit('/').next().unwrap_or(&e.path);
            let stem = stem.rsplit_once('.').map(|(s, _)| s).unwrap_or(stem);
            (e.path.as_str(), title_key(&humanize(stem)))
        })
        .collect();

    let mut matches: Vec<ExistingReportMatch> = Vec::new();

    for entry in listing.iter().filter(|e| e.is_file) {
        let Some(document_id) = primary_document_id(&entry.path, &params.reports_path) else {
            continue;
        };
        let ids = technique_ids_in_path(&entry.path);
        let haystack = title_key(&entry.path);

        let mut bases = Vec::new();
        if ids.contains(id.as_str()) {
            bases.push(MatchBasis::ExactId);
        }
        if let Some(p) = &parent {
            if ids.contains(p.as_str()) {
                bases.push(MatchBasis::ParentId);
            }
        }
        if needed > 0 {
            let hits = keywords
                .iter()
                .filter(|k| haystack.split(' ').any(|w| w == k.as_str()))
                .count();
            if hits >= needed {
                bases.push(MatchBasis::NameKeyword);
            }
        }
        let Some(&strongest) = bases.first() else {
            continue;
        };

        let confidence = (strongest.confidence()
            + EXTRA_BASIS_BONUS * (bases.len() - 1) as f64)
            .min(1.0);

        let title = derive_title(&entry.path, &document_id);
        let key = title_key(&title);
        let children = if key.is_empty() {
            Vec::new()
        } else {
            secondary
                .iter()
                .filter(|(_, t)| t.contains(&key))
                .map(|(p, _)| p.to_string())
                .collect()
        };

        let candidate = ExistingReportMatch {
            document_id,
            title,
            path: entry.path.clone(),
            match_confidence: confidence,
            match_basis: strongest,
            match_bases: bases,
            cross_referenced_children: children,
        };

        match matches.iter_mut().find(|m| m.document_id == candidate.document_id) {
            Some(existing) if existing.match_confidence < candidate.match_confidence => {
                *existing = candidate;
            }
            Some(_) => {}
            None => matches.push(candidate),
        }
    }

    matches.sort_by(|a, b| {
        b.match_confidence
            .partial_cmp(&a.match_confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.document_id.cmp(&b.document_id))
    });
    matches
}
