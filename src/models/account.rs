//! Sampled account model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An account selected for match-history collection.
///
/// Accounts are only ever inserted (never updated on conflict) and the
/// single mutation is flipping `history_fetched` once its history is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Unique account identifier (the public username)
    pub account_id: String,

    /// Rank tier label the account was sampled into
    pub tier: String,

    /// Rank score reported by the source, if any
    pub tier_score: Option<f64>,

    /// When the account was first discovered
    pub discovered_at: DateTime<Utc>,

    /// Whether the match history has been ingested
    pub history_fetched: bool,
}

impl Account {
    /// Create a freshly discovered account.
    pub fn new(account_id: impl Into<String>, tier: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            tier: tier.into(),
            tier_score: None,
            discovered_at: Utc::now(),
            history_fetched: false,
        }
    }

    /// Builder method to set the tier score.
    pub fn with_tier_score(mut self, score: Option<f64>) -> Self {
        self.tier_score = score;
        self
    }
}
