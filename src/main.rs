//! # TRR Scout CLI (`trr-scout`)
//!
//! Drives the research pipeline for one technique and prints the result.
//!
//! ## Usage
//!
//! ```bash
//! trr-scout --config ./config/scout.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `trr-scout research <ID>` | Search, score, dedup and match existing reports |
//! | `trr-scout plan <ID>` | Print the queries a research run would issue |
//! | `trr-scout cache clear` | Delete the on-disk cache |
//!
//! ## Examples
//!
//! ```bash
//! # Research DCSync, all defaults
//! trr-scout research T1003.006 --name DCSync
//!
//! # Keep every scored result and write the full output as JSON
//! trr-scout research T1003.006 --min-score 0 --json dcsync.json
//!
//! # Machine-readable progress for a wrapper script
//! trr-scout research T1003.006 --progress json --json - 2> progress.jsonl
//!
//! # Only check the report repository
//! trr-scout research T1003.006 --no-search --trr-repo tired-labs/techniques
//! ```

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use trr_scout::config::{self, Config};
use trr_scout::file_cache::{clear_cache, FileCache};
use trr_scout::pipeline::{plan_all, run_research, ResearchOptions, Services};
use trr_scout::progress::ProgressMode;
use trr_scout_core::models::TechniqueId;
use trr_scout_core::rank::ResearchOutput;

/// TRR Scout: research source discovery for ATT&CK techniques.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing default config file falls back to built-in defaults.
#[derive(Parser)]
#[command(
    name = "trr-scout",
    about = "TRR Scout: discover, score and deduplicate research sources for ATT&CK techniques",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/scout.toml")]
    config: PathBuf,

    /// Log at debug level (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Progress on stderr: `human`, `json` (one object per line) or `off`.
    /// Defaults to `human` on a terminal, `off` otherwise.
    #[arg(long, global = true)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Research a technique.
    ///
    /// Plans queries per category, runs them through the cache and search
    /// backend, scores, filters, deduplicates and ranks the hits, and looks
    /// for existing reports in the configured repository.
    Research {
        /// Technique ID, e.g. `T1003.006`.
        technique: String,

        /// Technique name, e.g. `DCSync`. Looked up on ATT&CK when omitted.
        #[arg(long)]
        name: Option<String>,

        /// Ignore cached responses (fresh responses are still cached).
        #[arg(long)]
        no_cache: bool,

        /// Minimum relevance score in [0, 1]. `0` keeps every result.
        #[arg(long)]
        min_score: Option<f64>,

        /// Report repository as `owner/name`. Empty disables matching.
        #[arg(long)]
        trr_repo: Option<String>,

        /// Results kept per category. `0` means no cap.
        #[arg(long)]
        max_per_category: Option<usize>,

        /// Skip page metadata enrichment.
        #[arg(long)]
        no_enrich: bool,

        /// Skip searching; only run reference lookup and report matching.
        #[arg(long)]
        no_search: bool,

        /// Skip the Atomic Red Team test lookup.
        #[arg(long)]
        no_atomic: bool,

        /// Extra terms appended to every query.
        #[arg(long)]
        extra_terms: Option<String>,

        /// Write the full output as JSON to this path (`-` for stdout).
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Print the queries a research run would issue.
    Plan {
        technique: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        extra_terms: Option<String>,
    },

    /// Manage the on-disk cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Delete every cached response.
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let cfg = load_or_default(&cli.config)?;

    match cli.command {
        Commands::Research {
            technique,
            name,
            no_cache,
            min_score,
            trr_repo,
            max_per_category,
            no_enrich,
            no_search,
            no_atomic,
            extra_terms,
            json,
        } => {
            let id = TechniqueId::parse(&technique)?;
            let cache = Arc::new(FileCache::new(cfg.cache.dir.clone()));
            let services = Services::from_config(&cfg, cache, trr_repo.as_deref())?;
            let opts = ResearchOptions {
                technique_name: name,
                bypass_cache: no_cache,
                min_score,
                max_per_category,
                enrich: !no_enrich,
                search: !no_search,
                atomic: !no_atomic,
                extra_terms,
            };
            let progress = cli
                .progress
                .unwrap_or_else(ProgressMode::default_for_tty)
                .reporter();

            let output = run_research(&cfg, &services, &id, &opts, progress.as_ref()).await?;

            let stats = services.search.stats();
            eprintln!(
                "{} queries, {} from cache, {} failed",
                stats.queries, stats.cache_hits, stats.failures
            );

            match json.as_deref() {
                Some(path) if path == Path::new("-") => {
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                Some(path) => {
                    write_json(path, &output)?;
                    print_summary(&output);
                    eprintln!("Wrote {}", path.display());
                }
                None => print_summary(&output),
            }
        }
        Commands::Plan {
            technique,
            name,
            extra_terms,
        } => {
            let id = TechniqueId::parse(&technique)?;
            for (category, plan) in plan_all(&cfg, &id, name.as_deref(), extra_terms.as_deref()) {
                println!("[{}]", category);
                for q in plan {
                    println!(
                        "  tier {}  max {:>2}  {}",
                        if q.tier == trr_scout_core::models::Tier::One { 1 } else { 2 },
                        q.max_results,
                        q.query
                    );
                }
            }
        }
        Commands::Cache { action } => match action {
            CacheAction::Clear => {
                let removed = clear_cache(&cfg.cache.dir)?;
                println!(
                    "Removed {} cache entries from {}",
                    removed,
                    cfg.cache.dir.display()
                );
            }
        },
    }

    Ok(())
}

/// Load the config file; a missing file at the default path means defaults.
fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() && path == Path::new("./config/scout.toml") {
        tracing::debug!("no config file at {}; using defaults", path.display());
        let cfg = Config::default();
        config::validate(&cfg)?;
        return Ok(cfg);
    }
    config::load_config(path)
}

fn write_json(path: &Path, output: &ResearchOutput) -> Result<()> {
    let body = serde_json::to_string_pretty(output)?;
    std::fs::write(path, body).with_context(|| format!("Failed to write {}", path.display()))
}

fn print_summary(output: &ResearchOutput) {
    let name = output.technique_name.as_deref().unwrap_or("(unnamed)");
    println!("{}  {}", output.technique_id, name);
    println!(
        "{} results kept, {} below min score {:.2}",
        output.total_results(),
        output.filtered_count,
        output.min_score
    );

    if let Some(details) = &output.technique {
        for (label, values) in [
            ("Tactics", &details.tactics),
            ("Platforms", &details.platforms),
            ("Data sources", &details.data_sources),
            ("Defenses bypassed", &details.defenses_bypassed),
            ("Permissions", &details.permissions_required),
        ] {
            if !values.is_empty() {
                println!("{}: {}", label, values.join(", "));
            }
        }
    }

    for bucket in output.buckets.iter().filter(|b| !b.results.is_empty()) {
        println!();
        println!("## {} ({})", bucket.label, bucket.results.len());
        for ranked in &bucket.results {
            let r = &ranked.result;
            let tags = r
                .tags
                .iter()
                .map(|t| t.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            println!(
                "  {:.2}  {:<15}  {}",
                r.relevance_score,
                ranked.relevance_label.as_str(),
                if r.title.is_empty() { &r.url } else { &r.title }
            );
            println!("        {}{}", r.url, if tags.is_empty() { String::new() } else { format!("  [{}]", tags) });
        }
    }

    if !output.existing_reports.is_empty() {
        println!();
        println!("## Existing reports");
        for m in &output.existing_reports {
            println!(
                "  {:.2}  {}  {}  ({})",
                m.match_confidence, m.document_id, m.title, m.path
            );
            for child in &m.cross_referenced_children {
                println!("        ↳ {}", child);
            }
        }
    }

    if !output.ddm_files.is_empty() {
        println!();
        println!("## DDM files");
        for ddm in &output.ddm_files {
            println!("  {}", ddm.path);
        }
    }

    if !output.atomic_tests.is_empty() {
        println!();
        println!("## Atomic tests ({})", output.atomic_tests.len());
        for test in &output.atomic_tests {
            println!(
                "  {}  [{}{}]  {}",
                test.name,
                test.executor,
                if test.elevation_required { ", elevated" } else { "" },
                test.platforms.join(", ")
            );
        }
    }
}
