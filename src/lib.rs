//! # Rivals Stats
//!
//! Match collection and hero statistics for a 6v6 team game.
//!
//! ## Architecture
//!
//! - **models**: Core data structures (accounts, matches, participants, cached stats)
//! - **fetch**: Match data source trait, HTTP client and rate limiter
//! - **storage**: SQLite persistence
//! - **sync**: Stratified account discovery and match history ingestion
//! - **calculate**: Confidence intervals, baselines, significance and power
//! - **analyze**: Character win-rate and pair synergy analyzers
//! - **report**: JSON export
//! - **config**: Configuration loading and validation

pub mod analyze;
pub mod calculate;
pub mod config;
pub mod fetch;
pub mod models;
pub mod report;
pub mod storage;
pub mod sync;

pub use models::*;
