//! # TRR Scout
//!
//! Discovers, scores, deduplicates and classifies research sources for an
//! ATT&CK technique, and checks whether a report repository already covers
//! it.
//!
//! The pure pipeline stages live in [`trr_scout_core`]; this crate adds the
//! parts that touch the network and the filesystem.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐
//! │ Query planner│──▶│ Search client│──▶│ Score / dedup /  │
//! │  (core)      │   │ cache + rate │   │ enrich / rank    │
//! └──────────────┘   └──────┬───────┘   └────────┬─────────┘
//!                           │                    │
//!                     ┌─────▼─────┐        ┌─────▼──────┐
//!                     │ FileCache │        │ Research   │
//!                     │ <key>.json│        │ Output JSON│
//!                     └───────────┘        └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! trr-scout research T1003.006 --name DCSync
//! trr-scout research T1003.006 --min-score 0 --json out.json
//! trr-scout plan T1003.006 --name DCSync
//! trr-scout cache clear
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`http`] | Fetch errors, retry, page fetcher |
//! | [`html`] | Text extraction from HTML |
//! | [`rate_limit`] | Request spacing |
//! | [`backend`] | Search engine backends |
//! | [`search_client`] | Cached, retrying search |
//! | [`file_cache`] | On-disk cache |
//! | [`reference`] | ATT&CK technique page lookup |
//! | [`atomic`] | Atomic Red Team emulation tests |
//! | [`repository`] | Report repository listing |
//! | [`metadata`] | Page metadata enrichment |
//! | [`pipeline`] | End-to-end research run |
//! | [`progress`] | Progress reporting on stderr |

pub mod atomic;
pub mod backend;
pub mod config;
pub mod file_cache;
pub mod html;
pub mod http;
pub mod metadata;
pub mod pipeline;
pub mod progress;
pub mod rate_limit;
pub mod reference;
pub mod repository;
pub mod search_client;
