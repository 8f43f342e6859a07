//! SQLite persistence.
//!
//! [`Store`] owns the single connection and exposes typed operations for
//! accounts, matches, participants, cached statistics and collection
//! metadata. Every statement binds its parameters; writes that form one
//! logical unit run inside a transaction.
//!
//! The store is the normalization boundary for computed values: any
//! non-finite float is rejected here instead of being written.

mod schema;

pub use schema::SCHEMA;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{
    Account, BaselineModel, CachedCharacterStat, CachedSynergyStat, MatchRecord,
    SampleConfidence, TierScope, ALL_TIERS,
};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Non-finite value for {field}")]
    NonFinite { field: &'static str },

    #[error("Invalid stored value for {column}: {value}")]
    InvalidValue { column: &'static str, value: String },
}

impl StorageError {
    /// Whether the store itself is unusable, as opposed to one bad write.
    pub fn is_fatal(&self) -> bool {
        match self {
            StorageError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                ErrorCode::CannotOpen
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::NotADatabase
                    | ErrorCode::DatabaseCorrupt
                    | ErrorCode::DiskFull
            ),
            StorageError::Io(_) => true,
            _ => false,
        }
    }
}

/// Games and wins for one character within one tier scope.
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeCount {
    pub character: String,
    pub tier: TierScope,
    pub games: u32,
    pub wins: u32,
}

/// Games and wins a focal character shared with one teammate character.
#[derive(Debug, Clone, PartialEq)]
pub struct TeammateCount {
    pub partner: String,
    pub games: u32,
    pub wins: u32,
}

/// Row counts for status reporting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreCounts {
    pub accounts: u64,
    pub pending_accounts: u64,
    pub matches: u64,
    pub participants: u64,
    pub character_stats: u64,
    pub synergy_stats: u64,
}

fn ensure_finite(field: &'static str, value: f64) -> Result<f64, StorageError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(StorageError::NonFinite { field })
    }
}

fn parse_timestamp(column: &'static str, value: String) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StorageError::InvalidValue { column, value })
}

/// SQLite-backed store shared by every pipeline stage.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        info!("Opened database {}", path.display());
        Self::with_connection(conn)
    }

    /// In-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<(), StorageError> {
        self.conn().execute_batch(sql)?;
        Ok(())
    }

    /// Insert an account unless it already exists. Returns `true` if new.
    pub fn upsert_account(&self, account: &Account) -> Result<bool, StorageError> {
        let tier_score = account
            .tier_score
            .map(|s| ensure_finite("tier_score", s))
            .transpose()?;

        let inserted = self.conn().execute(
            "INSERT INTO accounts (account_id, tier, tier_score, discovered_at, history_fetched)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(account_id) DO NOTHING",
            params![
                account.account_id,
                account.tier,
                tier_score,
                account.discovered_at.to_rfc3339(),
                account.history_fetched,
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn get_account(&self, account_id: &str) -> Result<Option<Account>, StorageError> {
        let row = self
            .conn()
            .query_row(
                "SELECT account_id, tier, tier_score, discovered_at, history_fetched
                 FROM accounts WHERE account_id = ?1",
                params![account_id],
                read_account_columns,
            )
            .optional()?;

        row.map(account_from_columns).transpose()
    }

    /// Accounts whose history has not been fetched, oldest discovery first.
    pub fn pending_accounts(&self, limit: usize) -> Result<Vec<Account>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT account_id, tier, tier_score, discovered_at, history_fetched
             FROM accounts
             WHERE history_fetched = 0
             ORDER BY discovered_at, account_id
             LIMIT ?1",
        )?;

        let rows = stmt
            .query_map(params![limit as i64], read_account_columns)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(account_from_columns).collect()
    }

    /// Flip the fetched flag. The flag never reverts.
    pub fn mark_history_fetched(&self, account_id: &str) -> Result<(), StorageError> {
        self.conn().execute(
            "UPDATE accounts SET history_fetched = 1 WHERE account_id = ?1",
            params![account_id],
        )?;
        Ok(())
    }

    /// Discovered accounts per tier.
    pub fn account_tier_counts(&self) -> Result<BTreeMap<String, u64>, StorageError> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT tier, COUNT(*) FROM accounts GROUP BY tier ORDER BY tier")?;
        let counts = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?)))?
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(counts)
    }

    pub fn match_exists(&self, match_id: &str) -> Result<bool, StorageError> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM matches WHERE match_id = ?1",
                params![match_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Insert a match and all of its participants in one transaction.
    ///
    /// Returns the number of participant rows written, or 0 when the match
    /// was already stored.
    pub fn insert_match_record(&self, record: &MatchRecord) -> Result<usize, StorageError> {
        for participant in &record.participants {
            ensure_finite("damage", participant.counters.damage)?;
            ensure_finite("healing", participant.counters.healing)?;
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let summary = &record.summary;
        let inserted = tx.execute(
            "INSERT INTO matches (match_id, game_mode, season, played_at, collected_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(match_id) DO NOTHING",
            params![
                summary.match_id,
                summary.game_mode,
                summary.season,
                summary.played_at.to_rfc3339(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        if inserted == 0 {
            debug!("Match {} already stored", summary.match_id);
            return Ok(0);
        }

        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO participants
                     (match_id, account_id, character, role, team, won,
                      kills, deaths, assists, damage, healing)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(match_id, account_id) DO NOTHING",
            )?;
            for p in &record.participants {
                written += stmt.execute(params![
                    p.match_id,
                    p.account_id,
                    p.character,
                    p.role.as_str(),
                    p.team.index(),
                    p.outcome.is_win(),
                    p.counters.kills,
                    p.counters.deaths,
                    p.counters.assists,
                    p.counters.damage,
                    p.counters.healing,
                ])?;
            }
        }

        tx.commit()?;
        Ok(written)
    }

    /// Games and wins per character over every participant row.
    pub fn character_totals(&self) -> Result<Vec<OutcomeCount>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT character, COUNT(*), COALESCE(SUM(won), 0)
             FROM participants
             GROUP BY character
             ORDER BY character",
        )?;
        let counts = stmt
            .query_map([], |row| {
                Ok(OutcomeCount {
                    character: row.get(0)?,
                    tier: TierScope::All,
                    games: row.get(1)?,
                    wins: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(counts)
    }

    /// Games and wins per (character, tier), for participants whose account
    /// tier is known.
    pub fn character_tier_totals(&self) -> Result<Vec<OutcomeCount>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT p.character, a.tier, COUNT(*), COALESCE(SUM(p.won), 0)
             FROM participants p
             JOIN accounts a ON a.account_id = p.account_id
             GROUP BY p.character, a.tier
             ORDER BY p.character, a.tier",
        )?;
        let counts = stmt
            .query_map([], |row| {
                Ok(OutcomeCount {
                    character: row.get(0)?,
                    tier: TierScope::Tier(row.get(1)?),
                    games: row.get(2)?,
                    wins: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(counts)
    }

    /// Teammate characters of `character`: seats on the same match and team.
    ///
    /// With a tier, only matches where the focal seat's account has that
    /// tier are counted.
    pub fn teammate_counts(
        &self,
        character: &str,
        tier: &TierScope,
    ) -> Result<Vec<TeammateCount>, StorageError> {
        let tier_filter: Option<&str> = match tier {
            TierScope::All => None,
            TierScope::Tier(t) => Some(t.as_str()),
        };

        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT t.character, COUNT(*), COALESCE(SUM(p.won), 0)
             FROM participants p
             JOIN participants t
               ON t.match_id = p.match_id
              AND t.team = p.team
              AND t.account_id <> p.account_id
             LEFT JOIN accounts a ON a.account_id = p.account_id
             WHERE p.character = ?1
               AND t.character <> ?1
               AND (?2 IS NULL OR a.tier = ?2)
             GROUP BY t.character
             ORDER BY t.character",
        )?;
        let counts = stmt
            .query_map(params![character, tier_filter], |row| {
                Ok(TeammateCount {
                    partner: row.get(0)?,
                    games: row.get(1)?,
                    wins: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(counts)
    }

    /// Upsert win-rate rows in one transaction.
    pub fn upsert_character_stats(
        &self,
        rows: &[CachedCharacterStat],
    ) -> Result<usize, StorageError> {
        for row in rows {
            ensure_finite("win_rate", row.win_rate)?;
            ensure_finite("ci_lower", row.ci_lower)?;
            ensure_finite("ci_upper", row.ci_upper)?;
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO character_stats
                     (character, tier, games, wins, losses, win_rate,
                      ci_lower, ci_upper, model_tag, analyzed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(character, tier) DO UPDATE SET
                     games = excluded.games,
                     wins = excluded.wins,
                     losses = excluded.losses,
                     win_rate = excluded.win_rate,
                     ci_lower = excluded.ci_lower,
                     ci_upper = excluded.ci_upper,
                     model_tag = excluded.model_tag,
                     analyzed_at = excluded.analyzed_at",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.character,
                    row.tier.as_str(),
                    row.games,
                    row.wins,
                    row.losses,
                    row.win_rate,
                    row.ci_lower,
                    row.ci_upper,
                    row.model_tag,
                    row.analyzed_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// Cached win-rate rows, optionally restricted to one tier scope.
    pub fn character_stats(
        &self,
        tier: Option<&TierScope>,
    ) -> Result<Vec<CachedCharacterStat>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT character, tier, games, wins, losses, win_rate,
                    ci_lower, ci_upper, model_tag, analyzed_at
             FROM character_stats
             WHERE (?1 IS NULL OR tier = ?1)
             ORDER BY tier, win_rate DESC, character",
        )?;

        let rows = stmt
            .query_map(params![tier.map(TierScope::as_str)], |row| {
                Ok((
                    CachedCharacterStat {
                        character: row.get(0)?,
                        tier: TierScope::from(row.get::<_, String>(1)?),
                        games: row.get(2)?,
                        wins: row.get(3)?,
                        losses: row.get(4)?,
                        win_rate: row.get(5)?,
                        ci_lower: row.get(6)?,
                        ci_upper: row.get(7)?,
                        model_tag: row.get(8)?,
                        analyzed_at: DateTime::<Utc>::MIN_UTC,
                    },
                    row.get::<_, String>(9)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(mut stat, analyzed_at)| {
                stat.analyzed_at = parse_timestamp("analyzed_at", analyzed_at)?;
                Ok(stat)
            })
            .collect()
    }

    /// Overall (`tier = all`) win rate per character.
    pub fn overall_win_rates(&self) -> Result<HashMap<String, f64>, StorageError> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT character, win_rate FROM character_stats WHERE tier = ?1")?;
        let rates = stmt
            .query_map(params![ALL_TIERS], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(rates)
    }

    /// Upsert synergy rows in one transaction, in canonical pair order.
    pub fn upsert_synergy_stats(&self, rows: &[CachedSynergyStat]) -> Result<usize, StorageError> {
        for row in rows {
            ensure_finite("win_rate", row.win_rate)?;
            ensure_finite("expected_win_rate", row.expected_win_rate)?;
            ensure_finite("synergy_score", row.synergy_score)?;
            ensure_finite("ci_lower", row.ci_lower)?;
            ensure_finite("ci_upper", row.ci_upper)?;
            ensure_finite("p_value", row.p_value)?;
            ensure_finite("bonferroni_alpha", row.bonferroni_alpha)?;
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO synergy_stats
                     (character_a, character_b, tier, games_together, wins_together,
                      win_rate, expected_win_rate, synergy_score, ci_lower, ci_upper,
                      p_value, significant, significant_bonferroni, bonferroni_alpha,
                      confidence, sample_size_warning, baseline_model, analyzed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                         ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
                 ON CONFLICT(character_a, character_b, tier) DO UPDATE SET
                     games_together = excluded.games_together,
                     wins_together = excluded.wins_together,
                     win_rate = excluded.win_rate,
                     expected_win_rate = excluded.expected_win_rate,
                     synergy_score = excluded.synergy_score,
                     ci_lower = excluded.ci_lower,
                     ci_upper = excluded.ci_upper,
                     p_value = excluded.p_value,
                     significant = excluded.significant,
                     significant_bonferroni = excluded.significant_bonferroni,
                     bonferroni_alpha = excluded.bonferroni_alpha,
                     confidence = excluded.confidence,
                     sample_size_warning = excluded.sample_size_warning,
                     baseline_model = excluded.baseline_model,
                     analyzed_at = excluded.analyzed_at",
            )?;
            for row in rows {
                let row = row.clone().canonical();
                stmt.execute(params![
                    row.character_a,
                    row.character_b,
                    row.tier.as_str(),
                    row.games_together,
                    row.wins_together,
                    row.win_rate,
                    row.expected_win_rate,
                    row.synergy_score,
                    row.ci_lower,
                    row.ci_upper,
                    row.p_value,
                    row.significant,
                    row.significant_bonferroni,
                    row.bonferroni_alpha,
                    row.confidence.as_str(),
                    row.sample_size_warning,
                    row.baseline_model.as_str(),
                    row.analyzed_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// Cached synergy rows, optionally restricted to one tier scope.
    pub fn synergy_stats(
        &self,
        tier: Option<&TierScope>,
    ) -> Result<Vec<CachedSynergyStat>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT character_a, character_b, tier, games_together, wins_together,
                    win_rate, expected_win_rate, synergy_score, ci_lower, ci_upper,
                    p_value, significant, significant_bonferroni, bonferroni_alpha,
                    confidence, sample_size_warning, baseline_model, analyzed_at
             FROM synergy_stats
             WHERE (?1 IS NULL OR tier = ?1)
             ORDER BY tier, synergy_score DESC, games_together DESC, character_a, character_b",
        )?;

        let rows = stmt
            .query_map(params![tier.map(TierScope::as_str)], |row| {
                Ok(RawSynergyRow {
                    stat: CachedSynergyStat {
                        character_a: row.get(0)?,
                        character_b: row.get(1)?,
                        tier: TierScope::from(row.get::<_, String>(2)?),
                        games_together: row.get(3)?,
                        wins_together: row.get(4)?,
                        win_rate: row.get(5)?,
                        expected_win_rate: row.get(6)?,
                        synergy_score: row.get(7)?,
                        ci_lower: row.get(8)?,
                        ci_upper: row.get(9)?,
                        p_value: row.get(10)?,
                        significant: row.get(11)?,
                        significant_bonferroni: row.get(12)?,
                        bonferroni_alpha: row.get(13)?,
                        confidence: SampleConfidence::Low,
                        sample_size_warning: row.get(15)?,
                        baseline_model: BaselineModel::default(),
                        analyzed_at: DateTime::<Utc>::MIN_UTC,
                    },
                    confidence: row.get(14)?,
                    baseline_model: row.get(16)?,
                    analyzed_at: row.get(17)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawSynergyRow::finish).collect()
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.conn().execute(
            "INSERT INTO collection_metadata (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>, StorageError> {
        let value = self
            .conn()
            .query_row(
                "SELECT value FROM collection_metadata WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn metadata(&self) -> Result<BTreeMap<String, String>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT key, value FROM collection_metadata")?;
        let entries = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<BTreeMap<String, String>, _>>()?;
        Ok(entries)
    }

    pub fn counts(&self) -> Result<StoreCounts, StorageError> {
        let conn = self.conn();
        let count = |sql: &str| -> Result<u64, rusqlite::Error> {
            conn.query_row(sql, [], |row| row.get(0))
        };

        Ok(StoreCounts {
            accounts: count("SELECT COUNT(*) FROM accounts")?,
            pending_accounts: count("SELECT COUNT(*) FROM accounts WHERE history_fetched = 0")?,
            matches: count("SELECT COUNT(*) FROM matches")?,
            participants: count("SELECT COUNT(*) FROM participants")?,
            character_stats: count("SELECT COUNT(*) FROM character_stats")?,
            synergy_stats: count("SELECT COUNT(*) FROM synergy_stats")?,
        })
    }
}

type AccountColumns = (String, String, Option<f64>, String, bool);

fn read_account_columns(row: &Row<'_>) -> rusqlite::Result<AccountColumns> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn account_from_columns(columns: AccountColumns) -> Result<Account, StorageError> {
    let (account_id, tier, tier_score, discovered_at, history_fetched) = columns;
    Ok(Account {
        account_id,
        tier,
        tier_score,
        discovered_at: parse_timestamp("discovered_at", discovered_at)?,
        history_fetched,
    })
}

/// Synergy row with its text-encoded columns still unparsed.
struct RawSynergyRow {
    stat: CachedSynergyStat,
    confidence: String,
    baseline_model: String,
    analyzed_at: String,
}

impl RawSynergyRow {
    fn finish(self) -> Result<CachedSynergyStat, StorageError> {
        let mut stat = self.stat;
        stat.confidence =
            SampleConfidence::parse(&self.confidence).ok_or(StorageError::InvalidValue {
                column: "confidence",
                value: self.confidence.clone(),
            })?;
        stat.baseline_model =
            self.baseline_model
                .parse()
                .map_err(|_| StorageError::InvalidValue {
                    column: "baseline_model",
                    value: self.baseline_model.clone(),
                })?;
        stat.analyzed_at = parse_timestamp("analyzed_at", self.analyzed_at)?;
        Ok(stat)
    }
}
