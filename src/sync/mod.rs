//! Ingestion pipeline.
//!
//! Two stages, each safe to re-run:
//! 1. Discovery: sample accounts per tier and insert the new ones
//! 2. Collection: fetch each pending account's history, keep in-scope
//!    matches, and store every new match with all of its participants
//!
//! Progress is checkpointed in the store. A match is written in one
//! transaction and an account is flagged fetched once its history has been
//! handled, so an interrupted run resumes where it stopped.

pub mod discovery;

pub use discovery::{SamplingOutcome, StratifiedSampler, TierSample};

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{CollectionConfig, DiscoveryConfig};
use crate::fetch::{MatchSource, RateLimiter, RawMatch};
use crate::models::Account;
use crate::storage::{StorageError, Store};

/// Collection metadata keys.
pub const META_TOTAL_ACCOUNTS: &str = "total_players_discovered";
pub const META_LAST_DISCOVERY: &str = "last_discovery_run";
pub const META_LAST_COLLECTION: &str = "last_collection_run";
pub const META_TOTAL_MATCHES: &str = "total_matches_collected";

/// Errors that stop a pipeline run.
///
/// Everything else (source failures, malformed payloads, single failed
/// writes) is logged, counted in the run report, and skipped.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Summary of a discovery run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoveryReport {
    pub tiers: Vec<TierSample>,
    pub sampled: usize,
    pub new_accounts: usize,
    pub existing_accounts: usize,
    pub persistence_errors: usize,
}

/// Summary of a collection run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CollectionReport {
    pub dry_run: bool,
    pub accounts_processed: usize,
    /// Accounts left pending after a transient source failure
    pub accounts_deferred: usize,
    pub matches_collected: usize,
    pub matches_skipped_existing: usize,
    pub matches_out_of_scope: usize,
    pub matches_malformed: usize,
    pub participants_inserted: usize,
    pub source_errors: usize,
    pub persistence_errors: usize,
}

/// Options for one collection run.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectOptions {
    /// Overrides the configured batch size
    pub batch_size: Option<usize>,
    /// Fetch and validate without writing anything
    pub dry_run: bool,
}

/// What happened to one match from an account's history.
enum MatchOutcome {
    Collected(usize),
    Existing,
    OutOfScope,
    Malformed,
    Failed,
}

/// Discovery and history collection over a shared store.
pub struct IngestionPipeline {
    store: Arc<Store>,
    source: Arc<dyn MatchSource>,
    limiter: Arc<RateLimiter>,
    collection: CollectionConfig,
    discovery: DiscoveryConfig,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<Store>,
        source: Arc<dyn MatchSource>,
        limiter: Arc<RateLimiter>,
        collection: CollectionConfig,
        discovery: DiscoveryConfig,
    ) -> Self {
        Self {
            store,
            source,
            limiter,
            collection,
            discovery,
        }
    }

    /// Sample accounts and insert any not already known.
    pub async fn discover(&self) -> Result<DiscoveryReport, SyncError> {
        info!(
            "Starting discovery from {} (target {} accounts)",
            self.source.name(),
            self.discovery.total_quota()
        );

        let sampler =
            StratifiedSampler::new(self.source.clone(), self.limiter.clone(), &self.discovery);
        let outcome = sampler.sample().await;

        let mut report = DiscoveryReport {
            sampled: outcome.accounts.len(),
            tiers: outcome.tiers,
            ..Default::default()
        };

        for account in &outcome.accounts {
            match self.store.upsert_account(account) {
                Ok(true) => report.new_accounts += 1,
                Ok(false) => report.existing_accounts += 1,
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    error!("Failed to store account {}: {}", account.account_id, e);
                    report.persistence_errors += 1;
                }
            }
        }

        let counts = self.store.counts()?;
        self.store
            .set_metadata(META_TOTAL_ACCOUNTS, &counts.accounts.to_string())?;
        self.store
            .set_metadata(META_LAST_DISCOVERY, &Utc::now().to_rfc3339())?;

        info!(
            "Discovery complete: {} sampled, {} new, {} already known",
            report.sampled, report.new_accounts, report.existing_accounts
        );
        Ok(report)
    }

    /// Collect match histories for the next batch of pending accounts.
    pub async fn collect(&self, options: CollectOptions) -> Result<CollectionReport, SyncError> {
        let batch_size = options.batch_size.unwrap_or(self.collection.batch_size);
        let accounts = self.store.pending_accounts(batch_size)?;

        let mut report = CollectionReport {
            dry_run: options.dry_run,
            ..Default::default()
        };

        if accounts.is_empty() {
            info!("No pending accounts to collect");
            return Ok(report);
        }

        info!(
            "Collecting {} accounts (season {}, mode {}){}",
            accounts.len(),
            self.collection.current_season,
            self.collection.game_mode,
            if options.dry_run { " [dry run]" } else { "" }
        );

        // Match ids counted by a dry run, which never reaches the store.
        let mut seen = HashSet::new();
        for account in &accounts {
            self.collect_account(account, options.dry_run, &mut seen, &mut report)
                .await?;
        }

        if !options.dry_run {
            let counts = self.store.counts()?;
            self.store
                .set_metadata(META_TOTAL_MATCHES, &counts.matches.to_string())?;
            self.store
                .set_metadata(META_LAST_COLLECTION, &Utc::now().to_rfc3339())?;
        }

        info!(
            "Collection complete: {} accounts, {} matches collected, {} existing, {} malformed, {} source errors",
            report.accounts_processed,
            report.matches_collected,
            report.matches_skipped_existing,
            report.matches_malformed,
            report.source_errors
        );
        Ok(report)
    }

    async fn collect_account(
        &self,
        account: &Account,
        dry_run: bool,
        seen: &mut HashSet<String>,
        report: &mut CollectionReport,
    ) -> Result<(), SyncError> {
        let account_id = account.account_id.as_str();

        self.limiter.wait_if_needed().await;
        let history = match self
            .source
            .match_history(account_id, self.collection.history_limit)
            .await
        {
            Ok(history) => history,
            Err(e) if e.is_transient() => {
                warn!("Deferring account {}: {}", account_id, e);
                report.source_errors += 1;
                report.accounts_deferred += 1;
                return Ok(());
            }
            Err(e) => {
                warn!("Skipping account {}: {}", account_id, e);
                report.source_errors += 1;
                return self.finish_account(account_id, dry_run, report);
            }
        };

        debug!("Account {}: {} matches in history", account_id, history.len());

        for raw in history {
            match self.ingest_match(account_id, raw, dry_run, seen)? {
                MatchOutcome::Collected(participants) => {
                    report.matches_collected += 1;
                    report.participants_inserted += participants;
                }
                MatchOutcome::Existing => report.matches_skipped_existing += 1,
                MatchOutcome::OutOfScope => report.matches_out_of_scope += 1,
                MatchOutcome::Malformed => report.matches_malformed += 1,
                MatchOutcome::Failed => report.persistence_errors += 1,
            }
        }

        self.finish_account(account_id, dry_run, report)
    }

    fn finish_account(
        &self,
        account_id: &str,
        dry_run: bool,
        report: &mut CollectionReport,
    ) -> Result<(), SyncError> {
        report.accounts_processed += 1;
        if dry_run {
            return Ok(());
        }

        match self.store.mark_history_fetched(account_id) {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                error!("Failed to mark account {} fetched: {}", account_id, e);
                report.persistence_errors += 1;
                Ok(())
            }
        }
    }

    fn ingest_match(
        &self,
        account_id: &str,
        raw: RawMatch,
        dry_run: bool,
        seen: &mut HashSet<String>,
    ) -> Result<MatchOutcome, SyncError> {
        if !raw.is_in_scope(self.collection.current_season, &self.collection.game_mode) {
            return Ok(MatchOutcome::OutOfScope);
        }

        let match_id = raw.match_id.clone().unwrap_or_default();

        if !match_id.is_empty() {
            match self.store.match_exists(&match_id) {
                Ok(true) => {
                    debug!("Match {} already stored", match_id);
                    return Ok(MatchOutcome::Existing);
                }
                Ok(false) => {}
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    error!(
                        "Failed to look up match {} from account {}: {}",
                        match_id, account_id, e
                    );
                    return Ok(MatchOutcome::Failed);
                }
            }
        }

        let record = match raw.into_record(self.collection.expected_participants) {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    "Skipping malformed match {:?} from account {}: {}",
                    match_id, account_id, e
                );
                return Ok(MatchOutcome::Malformed);
            }
        };

        if dry_run {
            if !seen.insert(record.match_id().to_string()) {
                return Ok(MatchOutcome::Existing);
            }
            return Ok(MatchOutcome::Collected(record.participants.len()));
        }

        match self.store.insert_match_record(&record) {
            Ok(0) => Ok(MatchOutcome::Existing),
            Ok(participants) => Ok(MatchOutcome::Collected(participants)),
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                error!(
                    "Failed to store match {} from account {}: {}",
                    match_id, account_id, e
                );
                Ok(MatchOutcome::Failed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::fixtures::{lobby, raw_match};
    use crate::fetch::mock::{MockFailure, MockSource};
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

    fn pipeline(store: Arc<Store>, source: Arc<MockSource>, quotas: &[(&str, usize)]) -> IngestionPipeline {
        let discovery = DiscoveryConfig {
            quotas: quotas
                .iter()
                .map(|(tier, quota)| (tier.to_string(), *quota))
                .collect(),
            ..Default::default()
        };
        IngestionPipeline::new(
            store,
            source,
            Arc::new(RateLimiter::new(60_000)),
            CollectionConfig::default(),
            discovery,
        )
    }

    fn seed_accounts(store: &Store, ids: &[&str]) {
        for id in ids {
            store.upsert_account(&Account::new(*id, "Gold")).unwrap();
        }
    }

    /// Match where `account` sits in the first seat of the red team.
    fn played_by(account: &str, match_id: &str, red_won: bool) -> RawMatch {
        let mut raw = lobby(match_id, RED, BLUE, red_won);
        raw.teams[0].players[0].username = Some(account.to_string());
        raw
    }

    #[tokio::test]
    async fn test_discover_is_idempotent() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let source = Arc::new(
            MockSource::new()
                .with_tier("Gold", &["g1", "g2", "g3"])
                .with_tier("Silver", &["s1"]),
        );
        let pipeline = pipeline(store.clone(), source, &[("Gold", 2), ("Silver", 5)]);

        let first = pipeline.discover().await.unwrap();
        assert_eq!(first.sampled, 3);
        assert_eq!(first.new_accounts, 3);

        let second = pipeline.discover().await.unwrap();
        assert!(second.new_accounts <= 1);
        assert_eq!(second.new_accounts + second.existing_accounts, 3);

        let accounts = store.counts().unwrap().accounts as usize;
        assert_eq!(accounts, 3 + second.new_accounts);
        assert_eq!(
            store.get_metadata(META_TOTAL_ACCOUNTS).unwrap(),
            Some(accounts.to_string())
        );
        assert!(store.get_metadata(META_LAST_DISCOVERY).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_collect_stores_matches_and_flags_accounts() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        seed_accounts(&store, &["p1", "p2"]);
        let source = Arc::new(
            MockSource::new()
                .with_history("p1", vec![played_by("p1", "m1", true), played_by("p1", "m2", false)])
                .with_history("p2", vec![played_by("p2", "m3", true)]),
        );
        let pipeline = pipeline(store.clone(), source, &[("Gold", 1)]);

        let report = pipeline.collect(CollectOptions::default()).await.unwrap();

        assert_eq!(report.accounts_processed, 2);
        assert_eq!(report.matches_collected, 3);
        assert_eq!(report.participants_inserted, 36);
        assert_eq!(store.counts().unwrap().pending_accounts, 0);
        assert_eq!(
            store.get_metadata(META_TOTAL_MATCHES).unwrap(),
            Some("3".to_string())
        );
    }

    #[tokio::test]
    async fn test_collect_twice_does_not_duplicate_or_refetch() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        seed_accounts(&store, &["p1", "p2"]);
        let source = Arc::new(
            MockSource::new()
                .with_history("p1", vec![played_by("p1", "m1", true)])
                .with_history("p2", vec![played_by("p2", "m2", true)]),
        );
        let pipeline = pipeline(store.clone(), source.clone(), &[("Gold", 1)]);

        pipeline.collect(CollectOptions::default()).await.unwrap();
        let after_first = store.counts().unwrap();

        let second = pipeline.collect(CollectOptions::default()).await.unwrap();
        let after_second = store.counts().unwrap();

        assert_eq!(second.accounts_processed, 0);
        assert_eq!(after_first, after_second);
        assert_eq!(source.history_calls("p1"), 1);
        assert_eq!(source.history_calls("p2"), 1);
    }

    #[tokio::test]
    async fn test_shared_match_is_stored_once() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        seed_accounts(&store, &["p1", "p2"]);

        let shared = raw_match(
            "shared",
            &[
                ("p1", "Hulk"),
                ("p2", "Thor"),
                ("x1", "Iron Man"),
                ("x2", "Hela"),
                ("x3", "Luna Snow"),
                ("x4", "Mantis"),
            ],
            &[
                ("y1", "Magneto"),
                ("y2", "Groot"),
                ("y3", "Spider-Man"),
                ("y4", "Storm"),
                ("y5", "Rocket Raccoon"),
                ("y6", "Loki"),
            ],
            true,
        );
        let source = Arc::new(
            MockSource::new()
                .with_history("p1", vec![shared.clone()])
                .with_history("p2", vec![shared]),
        );
        let pipeline = pipeline(store.clone(), source, &[("Gold", 1)]);

        let report = pipeline.collect(CollectOptions::default()).await.unwrap();

        assert_eq!(report.matches_collected, 1);
        assert_eq!(report.matches_skipped_existing, 1);
        assert_eq!(store.counts().unwrap().participants, 12);
    }

    #[tokio::test]
    async fn test_out_of_scope_and_malformed_matches_are_skipped() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        seed_accounts(&store, &["p1"]);

        let mut old_season = played_by("p1", "old", true);
        old_season.season = Some(0);
        let mut quickplay = played_by("p1", "qp", true);
        quickplay.mode = Some("quickplay".to_string());
        let mut short = played_by("p1", "short", true);
        short.teams[1].players.truncate(4);

        let source = Arc::new(MockSource::new().with_history(
            "p1",
            vec![old_season, quickplay, short, played_by("p1", "good", true)],
        ));
        let pipeline = pipeline(store.clone(), source, &[("Gold", 1)]);

        let report = pipeline.collect(CollectOptions::default()).await.unwrap();

        assert_eq!(report.matches_out_of_scope, 2);
        assert_eq!(report.matches_malformed, 1);
        assert_eq!(report.matches_collected, 1);
        assert!(store.match_exists("good").unwrap());
        assert!(!store.match_exists("short").unwrap());
        assert!(store.get_account("p1").unwrap().unwrap().history_fetched);
    }

    #[tokio::test]
    async fn test_source_failures() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        seed_accounts(&store, &["busy", "gone", "ok"]);
        let source = Arc::new(
            MockSource::new()
                .with_failure("busy", MockFailure::Transient)
                .with_failure("gone", MockFailure::NotFound)
                .with_history("ok", vec![played_by("ok", "m1", true)]),
        );
        let pipeline = pipeline(store.clone(), source, &[("Gold", 1)]);

        let report = pipeline.collect(CollectOptions::default()).await.unwrap();

        assert_eq!(report.source_errors, 2);
        assert_eq!(report.accounts_deferred, 1);
        assert_eq!(report.accounts_processed, 2);
        assert_eq!(report.matches_collected, 1);

        assert!(!store.get_account("busy").unwrap().unwrap().history_fetched);
        assert!(store.get_account("gone").unwrap().unwrap().history_fetched);
        assert!(store.get_account("ok").unwrap().unwrap().history_fetched);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        seed_accounts(&store, &["p1"]);
        let source = Arc::new(
            MockSource::new().with_history("p1", vec![played_by("p1", "m1", true)]),
        );
        let pipeline = pipeline(store.clone(), source, &[("Gold", 1)]);

        let report = pipeline
            .collect(CollectOptions {
                batch_size: None,
                dry_run: true,
            })
            .await
            .unwrap();

        assert!(report.dry_run);
        assert_eq!(report.matches_collected, 1);
        assert_eq!(report.participants_inserted, 12);

        let counts = store.counts().unwrap();
        assert_eq!(counts.matches, 0);
        assert_eq!(counts.pending_accounts, 1);
        assert!(store.get_metadata(META_LAST_COLLECTION).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dry_run_counts_shared_match_once() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        seed_accounts(&store, &["p1", "p2"]);

        let mut shared = played_by("p1", "shared", true);
        shared.teams[0].players[1].username = Some("p2".to_string());
        let source = Arc::new(
            MockSource::new()
                .with_history("p1", vec![shared.clone()])
                .with_history("p2", vec![shared]),
        );
        let pipeline = pipeline(store.clone(), source, &[("Gold", 1)]);

        let report = pipeline
            .collect(CollectOptions {
                batch_size: None,
                dry_run: true,
            })
            .await
            .unwrap();

        assert_eq!(report.accounts_processed, 2);
        assert_eq!(report.matches_collected, 1);
        assert_eq!(report.matches_skipped_existing, 1);
        assert_eq!(report.participants_inserted, 12);
    }

    #[tokio::test]
    async fn test_match_lookup_failure_is_counted_not_fatal() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        seed_accounts(&store, &["p1"]);
        store
            .execute_raw("DROP TABLE participants; DROP TABLE matches;")
            .unwrap();

        let source = Arc::new(
            MockSource::new().with_history("p1", vec![played_by("p1", "m1", true)]),
        );
        let pipeline = pipeline(store.clone(), source, &[("Gold", 1)]);

        let report = pipeline
            .collect(CollectOptions {
                batch_size: None,
                dry_run: true,
            })
            .await
            .unwrap();

        assert_eq!(report.persistence_errors, 1);
        assert_eq!(report.matches_collected, 0);
        assert_eq!(report.accounts_processed, 1);
    }

    #[tokio::test]
    async fn test_batch_size_limits_accounts() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        seed_accounts(&store, &["p1", "p2", "p3"]);
        let source = Arc::new(
            MockSource::new()
                .with_history("p1", vec![])
                .with_history("p2", vec![])
                .with_history("p3", vec![]),
        );
        let pipeline = pipeline(store.clone(), source.clone(), &[("Gold", 1)]);

        let report = pipeline
            .collect(CollectOptions {
                batch_size: Some(2),
                dry_run: false,
            })
            .await
            .unwrap();

        assert_eq!(report.accounts_processed, 2);
        assert_eq!(store.counts().unwrap().pending_accounts, 1);
        assert_eq!(source.total_history_calls(), 2);
    }
}
