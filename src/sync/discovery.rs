//! Stratified account discovery.
//!
//! Selects accounts tier by tier according to a quota table. Candidates
//! come from each tier's leaderboard, optionally pooled with entries from
//! per-character leaderboards so less popular characters are represented.
//! A tier with fewer unique candidates than its quota contributes all of
//! them; under-sampling is reported, never an error.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;
use crate::fetch::{LeaderboardEntry, MatchSource, RateLimiter};
use crate::models::Account;

/// Per-tier outcome of one sampling run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierSample {
    pub tier: String,
    pub quota: usize,
    /// Unique candidates available after deduplication
    pub available: usize,
    pub selected: usize,
}

impl TierSample {
    pub fn is_under_sampled(&self) -> bool {
        self.selected < self.quota
    }
}

/// Accounts selected by a sampling run.
#[derive(Debug, Clone, Default)]
pub struct SamplingOutcome {
    pub accounts: Vec<Account>,
    pub tiers: Vec<TierSample>,
}

/// Quota-based account sampler.
pub struct StratifiedSampler {
    source: Arc<dyn MatchSource>,
    limiter: Arc<RateLimiter>,
    quotas: BTreeMap<String, usize>,
    candidates_per_tier: usize,
    diversity_characters: Vec<String>,
    per_character_limit: usize,
}

impl StratifiedSampler {
    pub fn new(
        source: Arc<dyn MatchSource>,
        limiter: Arc<RateLimiter>,
        config: &DiscoveryConfig,
    ) -> Self {
        Self {
            source,
            limiter,
            quotas: config.quotas.clone(),
            candidates_per_tier: config.candidates_per_tier,
            diversity_characters: config.diversity_characters.clone(),
            per_character_limit: config.per_character_limit,
        }
    }

    /// Run one sampling pass. Identifiers in the result are unique.
    pub async fn sample(&self) -> SamplingOutcome {
        let mut pooled = self.character_pool().await;
        let mut outcome = SamplingOutcome::default();
        let mut selected: HashSet<String> = HashSet::new();

        for (tier, &quota) in &self.quotas {
            let mut candidates = self.tier_candidates(tier).await;
            if let Some(extra) = pooled.remove(&tier.to_ascii_lowercase()) {
                candidates.extend(extra);
            }

            let mut seen: HashSet<String> = HashSet::new();
            let mut unique: Vec<LeaderboardEntry> = candidates
                .into_iter()
                .filter(|entry| !entry.account_id.trim().is_empty())
                .filter(|entry| !selected.contains(&entry.account_id))
                .filter(|entry| seen.insert(entry.account_id.clone()))
                .collect();

            let available = unique.len();
            unique.shuffle(&mut rand::thread_rng());
            unique.truncate(quota);

            if unique.len() < quota {
                warn!(
                    "Tier {} under-sampled: {} of {} requested",
                    tier,
                    unique.len(),
                    quota
                );
            } else {
                debug!("Tier {}: selected {} of {} candidates", tier, quota, available);
            }

            outcome.tiers.push(TierSample {
                tier: tier.clone(),
                quota,
                available,
                selected: unique.len(),
            });

            for entry in unique {
                selected.insert(entry.account_id.clone());
                outcome
                    .accounts
                    .push(Account::new(entry.account_id, tier.clone()).with_tier_score(entry.tier_score));
            }
        }

        info!(
            "Sampled {} accounts across {} tiers",
            outcome.accounts.len(),
            outcome.tiers.len()
        );
        outcome
    }

    async fn tier_candidates(&self, tier: &str) -> Vec<LeaderboardEntry> {
        self.limiter.wait_if_needed().await;
        match self
            .source
            .list_accounts(tier, self.candidates_per_tier)
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to list accounts for tier {}: {}", tier, e);
                Vec::new()
            }
        }
    }

    /// Entries from character leaderboards, bucketed by lowercased tier label.
    async fn character_pool(&self) -> HashMap<String, Vec<LeaderboardEntry>> {
        let mut pool: HashMap<String, Vec<LeaderboardEntry>> = HashMap::new();

        for character in &self.diversity_characters {
            self.limiter.wait_if_needed().await;
            let entries = match self
                .source
                .list_character_accounts(character, self.per_character_limit)
                .await
            {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Failed to list accounts for character {}: {}", character, e);
                    continue;
                }
            };

            debug!("Character {}: {} candidates", character, entries.len());
            for entry in entries {
                if let Some(tier) = entry.tier.as_deref() {
                    pool.entry(tier.to_ascii_lowercase()).or_default().push(entry);
                }
            }
        }

        pool
    }
}
