//! Analyzers over collected match data.
//!
//! - [`WinRateAnalyzer`]: per-character win rates, overall and per tier
//! - [`SynergyAnalyzer`]: per-pair synergy against a baseline, using the
//!   overall win rates cached by the first stage
//!
//! Both read through and upsert into the shared [`Store`](crate::storage::Store),
//! one transaction per character.

mod synergy;
mod winrate;

pub use synergy::{rank_synergies, CharacterSynergies, SynergyAnalyzer, SynergyConfig, SynergyReport};
pub use winrate::{WinRateAnalyzer, WinRateConfig, WinRateReport};

use thiserror::Error;

use crate::storage::StorageError;

/// Errors that stop an analysis run.
#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("No overall win rates cached; run the win-rate analysis first")]
    NoBaselines,
}
