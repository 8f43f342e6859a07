//! Sample-size confidence tiers for synergy results.

use serde::{Deserialize, Serialize};

/// Games together needed for a `High` rating.
pub const HIGH_CONFIDENCE_GAMES: u32 = 500;

/// Games together needed for a `Medium` rating.
pub const MEDIUM_CONFIDENCE_GAMES: u32 = 100;

/// How much weight a pair's sample size can bear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleConfidence {
    High,
    Medium,
    Low,
}

impl SampleConfidence {
    /// Classify a games-together count.
    pub fn from_games(games: u32) -> Self {
        if games >= HIGH_CONFIDENCE_GAMES {
            SampleConfidence::High
        } else if games >= MEDIUM_CONFIDENCE_GAMES {
            SampleConfidence::Medium
        } else {
            SampleConfidence::Low
        }
    }

    /// Human-readable caveat for anything below `High`.
    pub fn warning(&self, games: u32) -> Option<String> {
        match self {
            SampleConfidence::High => None,
            SampleConfidence::Medium => Some(format!(
                "Moderate sample size ({} games). Results may have wide confidence intervals.",
                games
            )),
            SampleConfidence::Low => Some(format!(
                "Low sample size ({} games). Results are unreliable. Interpret with caution.",
                games
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SampleConfidence::High => "high",
            SampleConfidence::Medium => "medium",
            SampleConfidence::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "high" => Some(SampleConfidence::High),
            "medium" => Some(SampleConfidence::Medium),
            "low" => Some(SampleConfidence::Low),
            _ => None,
        }
    }
}

impl std::fmt::Display for SampleConfidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
