//! Configuration loading and validation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::models::BaselineModel;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Missing API key: environment variable {0} is not set")]
    MissingApiKey(String),
}

/// Match data API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_base_url() -> String {
    "https://marvelrivalsapi.com/api/v1".to_string()
}

fn default_api_key_env() -> String {
    "MARVEL_RIVALS_API_KEY".to_string()
}

fn default_requests_per_minute() -> u32 {
    7
}

fn default_timeout() -> u64 {
    30
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            requests_per_minute: default_requests_per_minute(),
            timeout_seconds: default_timeout(),
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Result<String, ConfigError> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingApiKey(self.api_key_env.clone()))
    }
}

/// Match history collection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    #[serde(default = "default_season")]
    pub current_season: u32,

    #[serde(default = "default_game_mode")]
    pub game_mode: String,

    /// Accounts processed per collection run
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Matches requested per account history
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Seats per match (6v6)
    #[serde(default = "default_expected_participants")]
    pub expected_participants: usize,
}

fn default_season() -> u32 {
    1
}

fn default_game_mode() -> String {
    "competitive".to_string()
}

fn default_batch_size() -> usize {
    100
}

fn default_history_limit() -> usize {
    150
}

fn default_expected_participants() -> usize {
    12
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            current_season: default_season(),
            game_mode: default_game_mode(),
            batch_size: default_batch_size(),
            history_limit: default_history_limit(),
            expected_participants: default_expected_participants(),
        }
    }
}

/// Stratified account discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Target accounts per tier
    #[serde(default = "default_quotas")]
    pub quotas: BTreeMap<String, usize>,

    /// Leaderboard entries requested per tier
    #[serde(default = "default_candidates_per_tier")]
    pub candidates_per_tier: usize,

    /// Characters whose leaderboards are pooled into the candidate lists
    #[serde(default)]
    pub diversity_characters: Vec<String>,

    #[serde(default = "default_per_character_limit")]
    pub per_character_limit: usize,
}

fn default_quotas() -> BTreeMap<String, usize> {
    [
        ("Bronze", 50),
        ("Silver", 75),
        ("Gold", 100),
        ("Platinum", 100),
        ("Diamond", 75),
        ("Master", 50),
        ("Grandmaster", 25),
        ("Celestial", 25),
    ]
    .into_iter()
    .map(|(tier, quota)| (tier.to_string(), quota))
    .collect()
}

fn default_candidates_per_tier() -> usize {
    1000
}

fn default_per_character_limit() -> usize {
    50
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            quotas: default_quotas(),
            candidates_per_tier: default_candidates_per_tier(),
            diversity_characters: Vec::new(),
            per_character_limit: default_per_character_limit(),
        }
    }
}

impl DiscoveryConfig {
    pub fn total_quota(&self) -> usize {
        self.quotas.values().sum()
    }
}

/// Analyzer thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_min_games_overall")]
    pub min_games_overall: u32,

    #[serde(default = "default_min_games_per_tier")]
    pub min_games_per_tier: u32,

    #[serde(default = "default_min_games_together")]
    pub min_games_together: u32,

    #[serde(default = "default_alpha")]
    pub alpha: f64,

    #[serde(default)]
    pub baseline: BaselineModel,

    /// Synergies kept per character
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

fn default_min_games_overall() -> u32 {
    100
}

fn default_min_games_per_tier() -> u32 {
    30
}

fn default_min_games_together() -> u32 {
    50
}

fn default_alpha() -> f64 {
    0.05
}

fn default_top_n() -> usize {
    10
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_games_overall: default_min_games_overall(),
            min_games_per_tier: default_min_games_per_tier(),
            min_games_together: default_min_games_together(),
            alpha: default_alpha(),
            baseline: BaselineModel::default(),
            top_n: default_top_n(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub collection: CollectionConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub analysis: AnalysisConfig,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./data/rivals.db")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            log_level: default_log_level(),
            api: ApiConfig::default(),
            collection: CollectionConfig::default(),
            discovery: DiscoveryConfig::default(),
            analysis: AnalysisConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if given, otherwise use defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.requests_per_minute == 0 {
            return Err(ConfigError::ValidationError(
                "requests_per_minute must be greater than 0".to_string(),
            ));
        }

        if self.api.timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "API timeout must be greater than 0".to_string(),
            ));
        }

        if self.collection.expected_participants == 0 {
            return Err(ConfigError::ValidationError(
                "expected_participants must be greater than 0".to_string(),
            ));
        }

        if self.discovery.quotas.is_empty() {
            return Err(ConfigError::ValidationError(
                "discovery quota table is empty".to_string(),
            ));
        }

        let alpha = self.analysis.alpha;
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(ConfigError::ValidationError(format!(
                "alpha must be in (0, 1), got {}",
                alpha
            )));
        }

        if self.analysis.top_n == 0 {
            return Err(ConfigError::ValidationError(
                "top_n must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
