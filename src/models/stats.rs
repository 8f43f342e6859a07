//! Derived statistics models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SampleConfidence;

/// Stored tier label for rows aggregated over every tier.
pub const ALL_TIERS: &str = "all";

/// Which slice of the population a cached row covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TierScope {
    All,
    Tier(String),
}

impl TierScope {
    pub fn as_str(&self) -> &str {
        match self {
            TierScope::All => ALL_TIERS,
            TierScope::Tier(tier) => tier,
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, TierScope::All)
    }
}

impl From<String> for TierScope {
    fn from(s: String) -> Self {
        if s == ALL_TIERS {
            TierScope::All
        } else {
            TierScope::Tier(s)
        }
    }
}

impl From<Option<String>> for TierScope {
    fn from(tier: Option<String>) -> Self {
        tier.map(TierScope::from).unwrap_or(TierScope::All)
    }
}

impl From<TierScope> for String {
    fn from(scope: TierScope) -> Self {
        scope.as_str().to_string()
    }
}

impl std::fmt::Display for TierScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Baseline model for a pair's expected win rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaselineModel {
    /// `(p_a + p_b) / 2`
    #[default]
    Average,
    /// `0.5 + (p_a - 0.5) + (p_b - 0.5)`, clamped to `[0, 1]`
    Additive,
}

impl BaselineModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            BaselineModel::Average => "average",
            BaselineModel::Additive => "additive",
        }
    }
}

impl std::str::FromStr for BaselineModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "average" => Ok(BaselineModel::Average),
            "additive" => Ok(BaselineModel::Additive),
            other => Err(format!(
                "Unknown baseline model '{}' (expected 'average' or 'additive')",
                other
            )),
        }
    }
}

impl std::fmt::Display for BaselineModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Cached per-character win rate, keyed by (character, tier).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedCharacterStat {
    pub character: String,
    pub tier: TierScope,
    pub games: u32,
    pub wins: u32,
    pub losses: u32,
    pub win_rate: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    /// Methodology tag of the run that produced the row
    pub model_tag: String,
    pub analyzed_at: DateTime<Utc>,
}

/// Cached pair synergy, keyed by (character_a, character_b, tier) with
/// `character_a < character_b`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSynergyStat {
    pub character_a: String,
    pub character_b: String,
    pub tier: TierScope,
    pub games_together: u32,
    pub wins_together: u32,
    pub win_rate: f64,
    pub expected_win_rate: f64,
    pub synergy_score: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub p_value: f64,
    pub significant: bool,
    pub significant_bonferroni: bool,
    pub bonferroni_alpha: f64,
    pub confidence: SampleConfidence,
    pub sample_size_warning: Option<String>,
    pub baseline_model: BaselineModel,
    pub analyzed_at: DateTime<Utc>,
}

impl CachedSynergyStat {
    /// Put the lexicographically smaller character in slot A.
    ///
    /// Every metric on the row is symmetric in the pair, so swapping the
    /// labels is the only change needed.
    pub fn canonical(mut self) -> Self {
        if self.character_a > self.character_b {
            std::mem::swap(&mut self.character_a, &mut self.character_b);
        }
        self
    }

    pub fn is_canonical(&self) -> bool {
        self.character_a < self.character_b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synergy(a: &str, b: &str) -> CachedSynergyStat {
        CachedSynergyStat {
            character_a: a.to_string(),
            character_b: b.to_string(),
            tier: TierScope::All,
            games_together: 207,
            wins_together: 124,
            win_rate: 0.599,
            expected_win_rate: 0.535,
            synergy_score: 0.064,
            ci_lower: 0.531,
            ci_upper: 0.664,
            p_value: 0.06,
            significant: false,
            significant_bonferroni: false,
            bonferroni_alpha: 0.05,
            confidence: SampleConfidence::Medium,
            sample_size_warning: None,
            baseline_model: BaselineModel::Average,
            analyzed_at: Utc::now(),
        }
    }

    #[test]
    fn test_tier_scope_conversions() {
        assert_eq!(TierScope::from("all".to_string()), TierScope::All);
        assert_eq!(
            TierScope::from("Gold".to_string()),
            TierScope::Tier("Gold".to_string())
        );
        assert_eq!(TierScope::from(None::<String>), TierScope::All);
        assert_eq!(TierScope::Tier("Diamond".to_string()).as_str(), "Diamond");
        assert_eq!(String::from(TierScope::All), "all");
    }

    #[test]
    fn test_tier_scope_serializes_as_label() {
        let json = serde_json::to_string(&TierScope::Tier("Gold".to_string())).unwrap();
        assert_eq!(json, "\"Gold\"");

        let parsed: TierScope = serde_json::from_str("\"all\"").unwrap();
        assert!(parsed.is_all());
    }

    #[test]
    fn test_baseline_model_parse() {
        assert_eq!("average".parse::<BaselineModel>(), Ok(BaselineModel::Average));
        assert_eq!("Additive".parse::<BaselineModel>(), Ok(BaselineModel::Additive));
        assert!("multiplicative".parse::<BaselineModel>().is_err());
        assert_eq!(BaselineModel::default(), BaselineModel::Average);
    }

    #[test]
    fn test_synergy_canonical_ordering() {
        let swapped = synergy("Spider-Man", "Luna Snow").canonical();
        assert_eq!(swapped.character_a, "Luna Snow");
        assert_eq!(swapped.character_b, "Spider-Man");
        assert!(swapped.is_canonical());

        let kept = synergy("Hulk", "Thor").canonical();
        assert_eq!(kept.character_a, "Hulk");
        assert_eq!(kept.games_together, 207);
    }
}
