//! # TRR Scout Core
//!
//! Pure logic for TRR Scout: data models, query planning, the cache
//! abstraction, relevance scoring, result classification, deduplication,
//! enrichment selection, existing-report matching and ranking.
//!
//! This crate performs no network or filesystem I/O and has no async
//! runtime dependency. HTTP, the on-disk cache and the CLI live in the
//! `trr-scout` application crate.
//!
//! | Module | Role |
//! |--------|------|
//! | [`models`] | technique IDs, categories, hits and results |
//! | [`planner`] | category → ordered search queries |
//! | [`cache`] | cache trait, keys, TTL entries, in-memory impl |
//! | [`score`] | relevance score and labels |
//! | [`classify`] | presentation tags |
//! | [`dedup`] | five-pass deduplication |
//! | [`enrich`] | which results need a metadata fetch |
//! | [`matcher`] | existing repository reports and DDM files |
//! | [`technique`] | reference-page details and emulation tests |
//! | [`rank`] | scoring pass, buckets, output contract |

pub mod cache;
pub mod classify;
pub mod dedup;
pub mod enrich;
pub mod matcher;
pub mod models;
pub mod planner;
pub mod rank;
pub mod score;
pub mod technique;
