//! Match data source access.
//!
//! The pipeline talks to the outside world only through [`MatchSource`]:
//! leaderboard listings per tier or per character, and an account's match
//! history. [`ApiClient`] is the HTTP implementation; outbound spacing is
//! enforced by the caller through [`RateLimiter`].

mod payload;
mod rate_limit;

pub use payload::{LeaderboardEntry, RawMatch, RawPlayer, RawTeam, RawTimestamp};
pub use rate_limit::RateLimiter;

#[cfg(test)]
pub(crate) use payload::fixtures;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use payload::{LeaderboardResponse, MatchHistoryResponse};

/// Errors returned by a match data source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SourceError {
    /// Whether a later run could reasonably succeed where this one failed.
    ///
    /// Rate limits, 5xx responses and transport failures are transient; a
    /// missing account or an unparseable body is not.
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::RateLimited { .. } => true,
            SourceError::HttpStatus { status, .. } => *status >= 500,
            SourceError::Http(e) => !e.is_decode() && !e.is_builder(),
            SourceError::InvalidUrl(_) | SourceError::NotFound(_) | SourceError::Json(_) => false,
        }
    }
}

/// Read-only access to leaderboards and match histories.
#[async_trait]
pub trait MatchSource: Send + Sync {
    /// Source name for logging.
    fn name(&self) -> &str;

    /// Candidate accounts ranked in `tier`.
    async fn list_accounts(
        &self,
        tier: &str,
        limit: usize,
    ) -> Result<Vec<LeaderboardEntry>, SourceError>;

    /// Candidate accounts from one character's leaderboard.
    async fn list_character_accounts(
        &self,
        character: &str,
        limit: usize,
    ) -> Result<Vec<LeaderboardEntry>, SourceError>;

    /// Most recent matches played by `account_id`.
    async fn match_history(
        &self,
        account_id: &str,
        limit: usize,
    ) -> Result<Vec<RawMatch>, SourceError>;
}

/// Settings for the HTTP client.
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://marvelrivalsapi.com/api/v1".to_string(),
            api_key: String::new(),
            timeout: Duration::from_secs(30),
            user_agent: format!("rivals-stats/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// HTTP implementation of [`MatchSource`].
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(config: ApiClientConfig) -> Result<Self, SourceError> {
        // A trailing slash keeps the last path segment when joining.
        let base = format!("{}/", config.base_url.trim_end_matches('/'));
        let base_url =
            Url::parse(&base).map_err(|e| SourceError::InvalidUrl(format!("{}: {}", base, e)))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .unwrap_or_else(|_| HeaderValue::from_static("rivals-stats")),
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if !config.api_key.is_empty() {
            let mut key = HeaderValue::from_str(&config.api_key)
                .map_err(|_| SourceError::InvalidUrl("API key is not a valid header".into()))?;
            key.set_sensitive(true);
            headers.insert("x-api-key", key);
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str, query: &[(&str, String)]) -> Result<Url, SourceError> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| SourceError::InvalidUrl(format!("{}: {}", path, e)))?;
        url.query_pairs_mut().extend_pairs(query);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, SourceError> {
        debug!("GET {}", url);

        let response = self.client.get(url.as_str()).send().await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);

            return Err(SourceError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if status == StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(url.path().to_string()));
        }

        if !status.is_success() {
            return Err(SourceError::HttpStatus {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl MatchSource for ApiClient {
    fn name(&self) -> &str {
        self.base_url.host_str().unwrap_or("api")
    }

    async fn list_accounts(
        &self,
        tier: &str,
        limit: usize,
    ) -> Result<Vec<LeaderboardEntry>, SourceError> {
        let url = self.endpoint(
            "leaderboard",
            &[("tier", tier.to_string()), ("limit", limit.to_string())],
        )?;
        let response: LeaderboardResponse = self.get_json(url).await?;
        info!("Leaderboard {}: {} entries", tier, response.players.len());
        Ok(response.players)
    }

    async fn list_character_accounts(
        &self,
        character: &str,
        limit: usize,
    ) -> Result<Vec<LeaderboardEntry>, SourceError> {
        let mut url = self.endpoint("heroes/leaderboard/", &[("limit", limit.to_string())])?;
        url.path_segments_mut()
            .map_err(|_| SourceError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push(character);
        let response: LeaderboardResponse = self.get_json(url).await?;
        info!(
            "Character leaderboard {}: {} entries",
            character,
            response.players.len()
        );
        Ok(response.players)
    }

    async fn match_history(
        &self,
        account_id: &str,
        limit: usize,
    ) -> Result<Vec<RawMatch>, SourceError> {
        let mut url = self.endpoint("player/", &[("limit", limit.to_string())])?;
        url.path_segments_mut()
            .map_err(|_| SourceError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push(account_id)
            .push("match-history");
        let response: MatchHistoryResponse = self.get_json(url).await?;
        Ok(response.matches)
    }
}

/// Scripted in-memory source for pipeline tests.
#[cfg(test)]
pub(crate) mod mock {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// Failure a scripted history request should produce.
    #[derive(Debug, Clone, Copy)]
    pub(crate) enum MockFailure {
        Transient,
        NotFound,
    }

    #[derive(Default)]
    pub(crate) struct MockSource {
        tiers: HashMap<String, Vec<LeaderboardEntry>>,
        characters: HashMap<String, Vec<LeaderboardEntry>>,
        histories: HashMap<String, Result<Vec<RawMatch>, MockFailure>>,
        history_calls: Mutex<HashMap<String, usize>>,
    }

    pub(crate) fn entry(account_id: &str, tier: &str) -> LeaderboardEntry {
        LeaderboardEntry {
            account_id: account_id.to_string(),
            tier: Some(tier.to_string()),
            tier_score: Some(1000.0),
        }
    }

    impl MockSource {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn with_tier(mut self, tier: &str, accounts: &[&str]) -> Self {
            self.tiers.insert(
                tier.to_string(),
                accounts.iter().map(|a| entry(a, tier)).collect(),
            );
            self
        }

        pub(crate) fn with_character(mut self, character: &str, entries: Vec<LeaderboardEntry>) -> Self {
            self.characters.insert(character.to_string(), entries);
            self
        }

        pub(crate) fn with_history(mut self, account_id: &str, matches: Vec<RawMatch>) -> Self {
            self.histories.insert(account_id.to_string(), Ok(matches));
            self
        }

        pub(crate) fn with_failure(mut self, account_id: &str, failure: MockFailure) -> Self {
            self.histories.insert(account_id.to_string(), Err(failure));
            self
        }

        pub(crate) fn history_calls(&self, account_id: &str) -> usize {
            self.history_calls
                .lock()
                .unwrap()
                .get(account_id)
                .copied()
                .unwrap_or(0)
        }

        pub(crate) fn total_history_calls(&self) -> usize {
            self.history_calls.lock().unwrap().values().sum()
        }
    }

    #[async_trait]
    impl MatchSource for MockSource {
        fn name(&self) -> &str {
            "mock"
        }

        async fn list_accounts(
            &self,
            tier: &str,
            limit: usize,
        ) -> Result<Vec<LeaderboardEntry>, SourceError> {
            Ok(self
                .tiers
                .get(tier)
                .map(|entries| entries.iter().take(limit).cloned().collect())
                .unwrap_or_default())
        }

        async fn list_character_accounts(
            &self,
            character: &str,
            limit: usize,
        ) -> Result<Vec<LeaderboardEntry>, SourceError> {
            Ok(self
                .characters
                .get(character)
                .map(|entries| entries.iter().take(limit).cloned().collect())
                .unwrap_or_default())
        }

        async fn match_history(
            &self,
            account_id: &str,
            limit: usize,
        ) -> Result<Vec<RawMatch>, SourceError> {
            *self
                .history_calls
                .lock()
                .unwrap()
                .entry(account_id.to_string())
                .or_default() += 1;

            match self.histories.get(account_id) {
                Some(Ok(matches)) => Ok(matches.iter().take(limit).cloned().collect()),
                Some(Err(MockFailure::Transient)) => Err(SourceError::HttpStatus {
                    status: 503,
                    message: "Service Unavailable".to_string(),
                }),
                Some(Err(MockFailure::NotFound)) | None => {
                    Err(SourceError::NotFound(account_id.to_string()))
                }
            }
        }
    }
}
