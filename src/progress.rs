//! Research progress reporting.
//!
//! A research run issues dozens of rate-limited queries, so it reports what
//! it is doing as it goes. Progress is emitted on **stderr** so stdout
//! remains parseable for scripts.

use std::io::Write;
use std::str::FromStr;

/// A single progress event for a research run.
#[derive(Clone, Debug, PartialEq)]
pub enum ResearchProgressEvent {
    /// Looking up the technique on the reference site.
    Reference { technique: String },
    /// Looking up published emulation tests.
    Atomic { technique: String },
    /// Query `n` of `total` for a category.
    Searching {
        category: String,
        n: usize,
        total: usize,
        query: String,
    },
    /// Fetching page metadata for `total` results.
    Enriching { total: usize },
    /// Listing the report repository.
    Matching { repo: String },
}

/// Reports research progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ResearchProgressEvent);
}

/// Human-friendly progress on stderr: "search security_research  3 / 7  \"T1003.006\" ...".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ResearchProgressEvent) {
        let line = match &event {
            ResearchProgressEvent::Reference { technique } => {
                format!("reference  looking up {}\n", technique)
            }
            ResearchProgressEvent::Atomic { technique } => {
                format!("atomic  fetching emulation tests for {}\n", technique)
            }
            ResearchProgressEvent::Searching {
                category,
                n,
                total,
                query,
            } => format!("search {}  {} / {}  {}\n", category, n, total, query),
            ResearchProgressEvent::Enriching { total } => {
                format!("enrich  fetching metadata for {} results\n", total)
            }
            ResearchProgressEvent::Matching { repo } => {
                format!("match  listing {}\n", repo)
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl JsonProgress {
    /// The JSON object written for one event.
    pub fn render(event: &ResearchProgressEvent) -> serde_json::Value {
        match event {
            ResearchProgressEvent::Reference { technique } => serde_json::json!({
                "event": "progress",
                "phase": "reference",
                "technique": technique,
            }),
            ResearchProgressEvent::Atomic { technique } => serde_json::json!({
                "event": "progress",
                "phase": "atomic",
                "technique": technique,
            }),
            ResearchProgressEvent::Searching {
                category,
                n,
                total,
                query,
            } => serde_json::json!({
                "event": "progress",
                "phase": "searching",
                "category": category,
                "n": n,
                "total": total,
                "query": query,
            }),
            ResearchProgressEvent::Enriching { total } => serde_json::json!({
                "event": "progress",
                "phase": "enriching",
                "total": total,
            }),
            ResearchProgressEvent::Matching { repo } => serde_json::json!({
                "event": "progress",
                "phase": "matching",
                "repo": repo,
            }),
        }
    }
}

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ResearchProgressEvent) {
        if let Ok(line) = serde_json::to_string(&Self::render(&event)) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ResearchProgressEvent) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl FromStr for ProgressMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(Self::Off),
            "human" => Ok(Self::Human),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "invalid progress mode '{}' (expected human, json or off)",
                other
            )),
        }
    }
}

impl ProgressMode {
    /// Default when `--progress` is not given: human progress when stderr is
    /// a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
