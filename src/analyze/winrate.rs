//! Character win-rate analysis.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info};

use super::AnalyzeError;
use crate::calculate::{calculate_win_rate, wilson_confidence_interval, DEFAULT_CONFIDENCE};
use crate::config::AnalysisConfig;
use crate::models::{BaselineModel, CachedCharacterStat, TierScope};
use crate::storage::{OutcomeCount, Store};

/// Thresholds for the win-rate stage.
#[derive(Debug, Clone)]
pub struct WinRateConfig {
    /// Characters with fewer games are omitted entirely
    pub min_games_overall: u32,
    /// Tier rows with fewer games are omitted
    pub min_games_per_tier: u32,
    pub confidence: f64,
    /// Tag recorded on every row written by the run
    pub model_tag: String,
}

impl Default for WinRateConfig {
    fn default() -> Self {
        Self {
            min_games_overall: 100,
            min_games_per_tier: 30,
            confidence: DEFAULT_CONFIDENCE,
            model_tag: BaselineModel::default().as_str().to_string(),
        }
    }
}

impl From<&AnalysisConfig> for WinRateConfig {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            min_games_overall: config.min_games_overall,
            min_games_per_tier: config.min_games_per_tier,
            confidence: DEFAULT_CONFIDENCE,
            model_tag: config.baseline.as_str().to_string(),
        }
    }
}

/// Summary of a win-rate run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WinRateReport {
    pub characters_analyzed: usize,
    pub characters_excluded: usize,
    pub tier_rows: usize,
    pub failed_characters: usize,
    pub rows: Vec<CachedCharacterStat>,
}

pub struct WinRateAnalyzer {
    store: Arc<Store>,
    config: WinRateConfig,
}

impl WinRateAnalyzer {
    pub fn new(store: Arc<Store>, config: WinRateConfig) -> Self {
        Self { store, config }
    }

    /// Compute and cache win rates for every character above threshold.
    pub fn analyze(&self) -> Result<WinRateReport, AnalyzeError> {
        let overall = self.store.character_totals()?;
        let mut by_tier: BTreeMap<String, Vec<OutcomeCount>> = BTreeMap::new();
        for count in self.store.character_tier_totals()? {
            by_tier.entry(count.character.clone()).or_default().push(count);
        }

        info!(
            "Analyzing win rates for {} characters (min {} games, {} per tier)",
            overall.len(),
            self.config.min_games_overall,
            self.config.min_games_per_tier
        );

        let mut report = WinRateReport::default();

        for total in &overall {
            if total.games < self.config.min_games_overall {
                debug!(
                    "Excluding {}: {} games below threshold",
                    total.character, total.games
                );
                report.characters_excluded += 1;
                continue;
            }

            let mut rows = vec![self.stat_row(total)];
            if let Some(tiers) = by_tier.get(&total.character) {
                rows.extend(
                    tiers
                        .iter()
                        .filter(|t| t.games >= self.config.min_games_per_tier)
                        .map(|t| self.stat_row(t)),
                );
            }

            match self.store.upsert_character_stats(&rows) {
                Ok(_) => {
                    report.characters_analyzed += 1;
                    report.tier_rows += rows.len() - 1;
                    report.rows.extend(rows);
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    error!("Failed to store win rates for {}: {}", total.character, e);
                    report.failed_characters += 1;
                }
            }
        }

        info!(
            "Win rates cached for {} characters ({} tier rows, {} excluded)",
            report.characters_analyzed, report.tier_rows, report.characters_excluded
        );
        Ok(report)
    }

    fn stat_row(&self, count: &OutcomeCount) -> CachedCharacterStat {
        let (ci_lower, ci_upper) =
            wilson_confidence_interval(count.wins, count.games, self.config.confidence);

        CachedCharacterStat {
            character: count.character.clone(),
            tier: count.tier.clone(),
            games: count.games,
            wins: count.wins,
            losses: count.games - count.wins,
            win_rate: calculate_win_rate(count.wins, count.games),
            ci_lower,
            ci_upper,
            model_tag: self.config.model_tag.clone(),
            analyzed_at: Utc::now(),
        }
    }
}

impl WinRateReport {
    /// Overall rows only, highest win rate first.
    pub fn overall(&self) -> Vec<&CachedCharacterStat> {
        let mut rows: Vec<&CachedCharacterStat> = self
            .rows
            .iter()
            .filter(|r| r.tier == TierScope::All)
            .collect();
        rows.sort_by(|a, b| b.win_rate.total_cmp(&a.win_rate));
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::fixtures::lobby;
    use crate::models::Account;
    use pretty_assertions::assert_eq;

    const RED: [&str; 6] = ["Hulk", "Thor", "Iron Man", "Hela", "Luna Snow", "Mantis"];
    const BLUE: [&str; 6] = [
        "Magneto",
        "Groot",
        "Spider-Man",
        "Storm",
        "Rocket Raccoon",
        "Loki",
    ];

    /// `games` lobbies of RED vs BLUE, red winning the first `red_wins`.
    fn seeded_store(games: usize, red_wins: usize) -> Arc<Store> {
        let store = Store::open_in_memory().unwrap();
        for i in 0..games {
            let record = lobby(&format!("m{}", i), RED, BLUE, i < red_wins)
                .into_record(12)
                .unwrap();
            store.insert_match_record(&record).unwrap();
        }
        Arc::new(store)
    }

    fn config(min_overall: u32, min_tier: u32) -> WinRateConfig {
        WinRateConfig {
            min_games_overall: min_overall,
            min_games_per_tier: min_tier,
            ..Default::default()
        }
    }

    #[test]
    fn test_overall_win_rates() {
        let store = seeded_store(100, 60);
        let report = WinRateAnalyzer::new(store.clone(), config(100, 30))
            .analyze()
            .unwrap();

        assert_eq!(report.characters_analyzed, 12);
        assert_eq!(report.tier_rows, 0);

        let rates = store.overall_win_rates().unwrap();
        assert_eq!(rates["Hulk"], 0.6);
        assert_eq!(rates["Loki"], 0.4);

        let hulk = report.overall()[0];
        assert_eq!(hulk.win_rate, 0.6);
        assert_eq!(hulk.losses, 40);
        assert!(hulk.ci_lower < 0.6 && hulk.ci_upper > 0.6);
    }

    #[test]
    fn test_characters_below_threshold_are_omitted() {
        let store = seeded_store(99, 50);
        let report = WinRateAnalyzer::new(store.clone(), config(100, 30))
            .analyze()
            .unwrap();

        assert_eq!(report.characters_analyzed, 0);
        assert_eq!(report.characters_excluded, 12);
        assert!(store.character_stats(None).unwrap().is_empty());
    }

    #[test]
    fn test_tier_rows_need_their_own_threshold() {
        let store = Store::open_in_memory().unwrap();
        // The first-seat account (Hulk) is a known Gold account in 40 matches;
        // the second-seat account (Thor) is a known Bronze account in 10.
        for i in 0..40 {
            let id = format!("m{}", i);
            store
                .upsert_account(&Account::new(format!("{}-a0", id), "Gold"))
                .unwrap();
            if i < 10 {
                store
                    .upsert_account(&Account::new(format!("{}-a1", id), "Bronze"))
                    .unwrap();
            }
            let record = lobby(&id, RED, BLUE, i % 2 == 0).into_record(12).unwrap();
            store.insert_match_record(&record).unwrap();
        }
        let store = Arc::new(store);

        let report = WinRateAnalyzer::new(store.clone(), config(40, 30))
            .analyze()
            .unwrap();

        assert_eq!(report.tier_rows, 1);
        let gold = store
            .character_stats(Some(&TierScope::Tier("Gold".to_string())))
            .unwrap();
        assert_eq!(gold.len(), 1);
        assert_eq!(gold[0].character, "Hulk");
        assert_eq!((gold[0].games, gold[0].wins), (40, 20));

        let bronze = store
            .character_stats(Some(&TierScope::Tier("Bronze".to_string())))
            .unwrap();
        assert!(bronze.is_empty());
    }

    #[test]
    fn test_rerun_overwrites_rows() {
        let store = seeded_store(100, 60);
        let analyzer = WinRateAnalyzer::new(store.clone(), config(100, 30));

        analyzer.analyze().unwrap();
        analyzer.analyze().unwrap();

        assert_eq!(store.counts().unwrap().character_stats, 12);
    }
}
