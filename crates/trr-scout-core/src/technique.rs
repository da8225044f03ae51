//! What is known about a technique beyond the search hits.
//!
//! [`TechniqueDetails`] comes from the reference page (tactics, platforms,
//! data sources and the page's reference list). [`AtomicTest`] describes one
//! published emulation test. Both are produced by fetchers in the
//! application crate and carried unchanged into the research output.

use serde::{Deserialize, Serialize};

/// One entry of the reference page's citation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// Citation text as shown on the page.
    pub source: String,
    pub url: String,
}

/// Technique metadata from the reference page. Every field may be empty
/// when the page does not carry it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechniqueDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tactics: Vec<String>,
    #[serde(default)]
    pub platforms: Vec<String>,
    #[serde(default)]
    pub data_sources: Vec<String>,
    #[serde(default)]
    pub defenses_bypassed: Vec<String>,
    #[serde(default)]
    pub permissions_required: Vec<String>,
    #[serde(default)]
    pub references: Vec<Citation>,
}

impl TechniqueDetails {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// An input argument of an emulation test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomicArgument {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Default value rendered as text.
    #[serde(default)]
    pub default: String,
}

/// One emulation test for a technique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomicTest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub platforms: Vec<String>,
    /// `command_prompt`, `powershell`, `bash`, `manual`, ...
    pub executor: String,
    #[serde(default)]
    pub elevation_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_command: Option<String>,
    #[serde(default)]
    pub input_arguments: Vec<AtomicArgument>,
    /// Where the test definition can be read.
    pub url: String,
}
