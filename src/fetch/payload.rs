//! Wire payloads returned by the match data API.
//!
//! Every field is optional on the wire; [`RawMatch::into_record`] is the
//! single place where a payload is checked and turned into model rows.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{
    Match, MatchRecord, Outcome, Participant, PayloadError, PerformanceCounters, Role, Team,
};

/// One row of a leaderboard listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    #[serde(alias = "username")]
    pub account_id: String,

    #[serde(default, alias = "rank_tier")]
    pub tier: Option<String>,

    #[serde(default, alias = "rank_score")]
    pub tier_score: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LeaderboardResponse {
    #[serde(default)]
    pub players: Vec<LeaderboardEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MatchHistoryResponse {
    #[serde(default)]
    pub matches: Vec<RawMatch>,
}

/// Match timestamp as either unix seconds or an RFC 3339 string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Unix(i64),
    Text(String),
}

impl RawTimestamp {
    fn to_datetime(&self) -> Result<DateTime<Utc>, PayloadError> {
        match self {
            RawTimestamp::Unix(secs) => Utc
                .timestamp_opt(*secs, 0)
                .single()
                .ok_or_else(|| PayloadError::InvalidTimestamp(secs.to_string())),
            RawTimestamp::Text(text) => DateTime::parse_from_rfc3339(text)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| PayloadError::InvalidTimestamp(text.clone())),
        }
    }
}

/// A match as delivered in an account's history.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawMatch {
    #[serde(default)]
    pub match_id: Option<String>,

    #[serde(default)]
    pub mode: Option<String>,

    #[serde(default)]
    pub season: Option<u32>,

    #[serde(default)]
    pub timestamp: Option<RawTimestamp>,

    #[serde(default)]
    pub teams: Vec<RawTeam>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawTeam {
    #[serde(default)]
    pub team: Option<i64>,

    #[serde(default)]
    pub won: Option<bool>,

    #[serde(default)]
    pub players: Vec<RawPlayer>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawPlayer {
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub hero_name: Option<String>,

    #[serde(default)]
    pub role: Option<String>,

    #[serde(default)]
    pub kills: Option<u32>,

    #[serde(default)]
    pub deaths: Option<u32>,

    #[serde(default)]
    pub assists: Option<u32>,

    #[serde(default)]
    pub damage: Option<f64>,

    #[serde(default)]
    pub healing: Option<f64>,
}

impl RawMatch {
    /// Whether the match belongs to the season and mode being collected.
    pub fn is_in_scope(&self, season: u32, game_mode: &str) -> bool {
        self.season == Some(season)
            && self
                .mode
                .as_deref()
                .is_some_and(|mode| mode.eq_ignore_ascii_case(game_mode))
    }

    /// Validate the payload into a match row plus all of its seats.
    pub fn into_record(self, expected_participants: usize) -> Result<MatchRecord, PayloadError> {
        let match_id = self
            .match_id
            .filter(|id| !id.trim().is_empty())
            .ok_or(PayloadError::MissingField("match_id"))?;
        let game_mode = self.mode.ok_or(PayloadError::MissingField("mode"))?;
        let season = self.season.ok_or(PayloadError::MissingField("season"))?;
        let played_at = self
            .timestamp
            .ok_or(PayloadError::MissingField("timestamp"))?
            .to_datetime()?;

        let mut sides = Vec::with_capacity(self.teams.len());
        for raw_team in &self.teams {
            let team = Team::from_index(raw_team.team.ok_or(PayloadError::MissingField("team"))?)?;
            let won = raw_team.won.ok_or(PayloadError::MissingField("won"))?;
            sides.push((team, Outcome::from_won(won)));
        }
        match sides.as_slice() {
            [(first, first_outcome), (second, second_outcome)]
                if first != second && first_outcome != second_outcome => {}
            _ => return Err(PayloadError::InconsistentTeams(match_id)),
        }

        let mut participants = Vec::with_capacity(expected_participants);
        for (raw_team, (team, outcome)) in self.teams.into_iter().zip(sides) {

            for player in raw_team.players {
                let account_id = player
                    .username
                    .ok_or(PayloadError::MissingField("username"))?;
                let character = player
                    .hero_name
                    .ok_or(PayloadError::MissingField("hero_name"))?;
                let role = Role::parse(player.role.as_deref().unwrap_or_default())?;

                participants.push(Participant {
                    match_id: match_id.clone(),
                    account_id,
                    character,
                    role,
                    team,
                    outcome,
                    counters: PerformanceCounters {
                        kills: player.kills.unwrap_or(0),
                        deaths: player.deaths.unwrap_or(0),
                        assists: player.assists.unwrap_or(0),
                        damage: player.damage.unwrap_or(0.0),
                        healing: player.healing.unwrap_or(0.0),
                    },
                });
            }
        }

        MatchRecord::new(
            Match {
                match_id,
                game_mode: game_mode.to_ascii_lowercase(),
                season,
                played_at,
            },
            participants,
            expected_participants,
        )
    }
}
