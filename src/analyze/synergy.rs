//! Character pair synergy analysis.
//!
//! For each focal character A, every teammate character B with enough games
//! together is scored against a baseline built from both characters'
//! overall win rates:
//!
//! ```text
//! synergy = actual_wr(A+B) - expected_wr(wr_A, wr_B)
//! ```
//!
//! Each pair gets an exact binomial test against the baseline. All of A's
//! pairs form one family for the Bonferroni correction, after which the
//! best `top_n` are stored in canonical pair order.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info};

use super::AnalyzeError;
use crate::calculate::{
    binomial_test, bonferroni_correction, calculate_win_rate, expected_win_rate, power_analysis,
    synergy_score, wilson_confidence_interval, PowerAnalysis, DEFAULT_ALPHA, DEFAULT_CONFIDENCE,
};
use crate::config::AnalysisConfig;
use crate::models::{BaselineModel, CachedSynergyStat, SampleConfidence, TierScope};
use crate::storage::Store;

/// Settings for the synergy stage.
#[derive(Debug, Clone)]
pub struct SynergyConfig {
    pub min_games_together: u32,
    pub alpha: f64,
    pub baseline: BaselineModel,
    /// Pairs stored per focal character
    pub top_n: usize,
    /// Restrict to matches where the focal account has this tier
    pub tier: TierScope,
    pub confidence: f64,
}

impl Default for SynergyConfig {
    fn default() -> Self {
        Self {
            min_games_together: 50,
            alpha: DEFAULT_ALPHA,
            baseline: BaselineModel::default(),
            top_n: 10,
            tier: TierScope::All,
            confidence: DEFAULT_CONFIDENCE,
        }
    }
}

impl From<&AnalysisConfig> for SynergyConfig {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            min_games_together: config.min_games_together,
            alpha: config.alpha,
            baseline: config.baseline,
            top_n: config.top_n,
            tier: TierScope::All,
            confidence: DEFAULT_CONFIDENCE,
        }
    }
}

/// Results for one focal character.
#[derive(Debug, Clone, Serialize)]
pub struct CharacterSynergies {
    pub character: String,
    /// Size of the Bonferroni family
    pub pairs_tested: usize,
    pub bonferroni_alpha: f64,
    /// Stored rows, best first
    pub top: Vec<CachedSynergyStat>,
    pub power: PowerAnalysis,
}

/// Summary of a synergy run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SynergyReport {
    pub characters_analyzed: usize,
    pub pairs_tested: usize,
    pub rows_written: usize,
    pub failed_characters: usize,
    pub characters: Vec<CharacterSynergies>,
}

/// One scored pair, seen from the focal character.
#[derive(Debug, Clone)]
struct PairScore {
    partner: String,
    games: u32,
    wins: u32,
    win_rate: f64,
    expected: f64,
    score: f64,
    ci: (f64, f64),
    p_value: f64,
    significant: bool,
}

/// Order by synergy score descending, then games together descending, then
/// partner name ascending.
pub fn rank_synergies(a: (f64, u32, &str), b: (f64, u32, &str)) -> Ordering {
    b.0.total_cmp(&a.0)
        .then_with(|| b.1.cmp(&a.1))
        .then_with(|| a.2.cmp(b.2))
}

pub struct SynergyAnalyzer {
    store: Arc<Store>,
    config: SynergyConfig,
}

impl SynergyAnalyzer {
    pub fn new(store: Arc<Store>, config: SynergyConfig) -> Self {
        Self { store, config }
    }

    /// Score, correct and store synergies for every character with a cached
    /// overall win rate.
    pub fn analyze(&self) -> Result<SynergyReport, AnalyzeError> {
        let baselines = self.store.overall_win_rates()?;
        if baselines.is_empty() {
            return Err(AnalyzeError::NoBaselines);
        }

        let mut characters: Vec<&String> = baselines.keys().collect();
        characters.sort();

        info!(
            "Analyzing synergies for {} characters (baseline {}, alpha {}, min {} games, tier {})",
            characters.len(),
            self.config.baseline,
            self.config.alpha,
            self.config.min_games_together,
            self.config.tier
        );

        let mut report = SynergyReport::default();

        for character in characters {
            let Some(result) = self.analyze_character(character, &baselines)? else {
                debug!("No qualifying teammates for {}", character);
                continue;
            };

            match self.store.upsert_synergy_stats(&result.top) {
                Ok(written) => {
                    report.characters_analyzed += 1;
                    report.pairs_tested += result.pairs_tested;
                    report.rows_written += written;
                    report.characters.push(result);
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    error!("Failed to store synergies for {}: {}", character, e);
                    report.failed_characters += 1;
                }
            }
        }

        info!(
            "Synergy analysis complete: {} characters, {} pairs tested, {} rows written",
            report.characters_analyzed, report.pairs_tested, report.rows_written
        );
        Ok(report)
    }

    /// Score every qualifying partner of `character`. Nothing is written.
    pub fn analyze_character(
        &self,
        character: &str,
        baselines: &HashMap<String, f64>,
    ) -> Result<Option<CharacterSynergies>, AnalyzeError> {
        let Some(&wr_a) = baselines.get(character) else {
            return Ok(None);
        };

        let teammates = self.store.teammate_counts(character, &self.config.tier)?;

        let pairs: Vec<PairScore> = teammates
            .into_iter()
            .filter(|t| t.games >= self.config.min_games_together)
            .filter_map(|t| {
                let wr_b = *baselines.get(&t.partner)?;
                Some(self.score_pair(t.partner, t.games, t.wins, wr_a, wr_b))
            })
            .collect();

        if pairs.is_empty() {
            return Ok(None);
        }

        let p_values: Vec<f64> = pairs.iter().map(|p| p.p_value).collect();
        let correction = bonferroni_correction(&p_values, self.config.alpha);
        let max_games = pairs.iter().map(|p| p.games).max().unwrap_or(0);
        let pairs_tested = pairs.len();

        let mut ranked: Vec<(PairScore, bool)> =
            pairs.into_iter().zip(correction.significant).collect();
        ranked.sort_by(|(a, _), (b, _)| {
            rank_synergies(
                (a.score, a.games, a.partner.as_str()),
                (b.score, b.games, b.partner.as_str()),
            )
        });
        ranked.truncate(self.config.top_n);

        let analyzed_at = Utc::now();
        let top = ranked
            .into_iter()
            .map(|(pair, significant_bonferroni)| {
                let confidence = SampleConfidence::from_games(pair.games);
                CachedSynergyStat {
                    character_a: character.to_string(),
                    character_b: pair.partner,
                    tier: self.config.tier.clone(),
                    games_together: pair.games,
                    wins_together: pair.wins,
                    win_rate: pair.win_rate,
                    expected_win_rate: pair.expected,
                    synergy_score: pair.score,
                    ci_lower: pair.ci.0,
                    ci_upper: pair.ci.1,
                    p_value: pair.p_value,
                    significant: pair.significant,
                    significant_bonferroni,
                    bonferroni_alpha: correction.corrected_alpha,
                    confidence,
                    sample_size_warning: confidence.warning(pair.games),
                    baseline_model: self.config.baseline,
                    analyzed_at,
                }
                .canonical()
            })
            .collect();

        Ok(Some(CharacterSynergies {
            character: character.to_string(),
            pairs_tested,
            bonferroni_alpha: correction.corrected_alpha,
            top,
            power: power_analysis(max_games, wr_a),
        }))
    }

    fn score_pair(&self, partner: String, games: u32, wins: u32, wr_a: f64, wr_b: f64) -> PairScore {
        let win_rate = calculate_win_rate(wins, games);
        let expected = expected_win_rate(self.config.baseline, wr_a, wr_b);
        let test = binomial_test(wins, games, expected, self.config.alpha);

        PairScore {
            partner,
            games,
            wins,
            win_rate,
            expected,
            score: synergy_score(win_rate, expected),
            ci: wilson_confidence_interval(wins, games, self.config.confidence),
            p_value: test.p_value,
            significant: test.significant,
        }
    }
}
