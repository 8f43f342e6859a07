//! Match and participant models.
//!
//! These are the validated forms of source payloads. Anything that reaches
//! the store has already passed through [`MatchRecord::new`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for match payloads that cannot be turned into valid rows.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PayloadError {
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid team index {0} (expected 0 or 1)")]
    InvalidTeam(i64),

    #[error("Match {0} needs one winning and one losing team, indexed 0 and 1")]
    InconsistentTeams(String),

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Match {match_id} has {found} participants (expected {expected})")]
    ParticipantCount {
        match_id: String,
        found: usize,
        expected: usize,
    },

    #[error("Account {account_id} appears twice in match {match_id}")]
    DuplicateParticipant {
        match_id: String,
        account_id: String,
    },
}

/// Hero role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Vanguard,
    Duelist,
    Strategist,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Vanguard => "vanguard",
            Role::Duelist => "duelist",
            Role::Strategist => "strategist",
        }
    }

    /// Parse a role label case-insensitively.
    pub fn parse(label: &str) -> Result<Self, PayloadError> {
        match label.trim().to_ascii_lowercase().as_str() {
            "vanguard" | "tank" => Ok(Role::Vanguard),
            "duelist" | "dps" => Ok(Role::Duelist),
            "strategist" | "support" => Ok(Role::Strategist),
            _ => Err(PayloadError::UnknownRole(label.to_string())),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Team seat group within a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Team {
    First,
    Second,
}

impl Team {
    pub fn from_index(index: i64) -> Result<Self, PayloadError> {
        match index {
            0 => Ok(Team::First),
            1 => Ok(Team::Second),
            other => Err(PayloadError::InvalidTeam(other)),
        }
    }

    pub fn index(&self) -> i64 {
        match self {
            Team::First => 0,
            Team::Second => 1,
        }
    }
}

/// Result of a match from one participant's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Won,
    Lost,
}

impl Outcome {
    pub fn from_won(won: bool) -> Self {
        if won {
            Outcome::Won
        } else {
            Outcome::Lost
        }
    }

    pub fn is_win(&self) -> bool {
        matches!(self, Outcome::Won)
    }
}

/// Raw per-seat performance counters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PerformanceCounters {
    pub kills: u32,
    pub deaths: u32,
    pub assists: u32,
    pub damage: f64,
    pub healing: f64,
}

/// Match header row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub match_id: String,
    pub game_mode: String,
    pub season: u32,
    pub played_at: DateTime<Utc>,
}

/// One seat in a match, keyed by (match_id, account_id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub match_id: String,
    pub account_id: String,
    pub character: String,
    pub role: Role,
    pub team: Team,
    pub outcome: Outcome,
    pub counters: PerformanceCounters,
}

/// A match together with every seat, validated as one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchRecord {
    pub summary: Match,
    pub participants: Vec<Participant>,
}

impl MatchRecord {
    /// Build a record, checking seat count and participant uniqueness.
    pub fn new(
        summary: Match,
        participants: Vec<Participant>,
        expected_participants: usize,
    ) -> Result<Self, PayloadError> {
        if participants.len() != expected_participants {
            return Err(PayloadError::ParticipantCount {
                match_id: summary.match_id.clone(),
                found: participants.len(),
                expected: expected_participants,
            });
        }

        let mut seen = std::collections::HashSet::new();
        for participant in &participants {
            if !seen.insert(participant.account_id.as_str()) {
                return Err(PayloadError::DuplicateParticipant {
                    match_id: summary.match_id.clone(),
                    account_id: participant.account_id.clone(),
                });
            }
        }

        Ok(Self {
            summary,
            participants,
        })
    }

    pub fn match_id(&self) -> &str {
        &self.summary.match_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(account: &str, team: Team) -> Participant {
        Participant {
            match_id: "m1".to_string(),
            account_id: account.to_string(),
            character: "Hulk".to_string(),
            role: Role::Vanguard,
            team,
            outcome: Outcome::from_won(team == Team::First),
            counters: PerformanceCounters::default(),
        }
    }

    fn summary() -> Match {
        Match {
            match_id: "m1".to_string(),
            game_mode: "competitive".to_string(),
            season: 1,
            played_at: Utc::now(),
        }
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("Vanguard").unwrap(), Role::Vanguard);
        assert_eq!(Role::parse(" STRATEGIST ").unwrap(), Role::Strategist);
        assert_eq!(Role::parse("duelist").unwrap(), Role::Duelist);
        assert!(matches!(
            Role::parse("healer-ish"),
            Err(PayloadError::UnknownRole(_))
        ));
    }

    #[test]
    fn test_team_from_index() {
        assert_eq!(Team::from_index(0).unwrap(), Team::First);
        assert_eq!(Team::from_index(1).unwrap().index(), 1);
        assert_eq!(Team::from_index(2), Err(PayloadError::InvalidTeam(2)));
    }

    #[test]
    fn test_outcome() {
        assert!(Outcome::from_won(true).is_win());
        assert!(!Outcome::from_won(false).is_win());
    }

    #[test]
    fn test_match_record_requires_full_lobby() {
        let participants = vec![participant("a", Team::First), participant("b", Team::Second)];

        assert!(MatchRecord::new(summary(), participants.clone(), 2).is_ok());
        assert_eq!(
            MatchRecord::new(summary(), participants, 12),
            Err(PayloadError::ParticipantCount {
                match_id: "m1".to_string(),
                found: 2,
                expected: 12,
            })
        );
    }

    #[test]
    fn test_match_record_rejects_duplicate_seat() {
        let participants = vec![participant("a", Team::First), participant("a", Team::Second)];

        let err = MatchRecord::new(summary(), participants, 2).unwrap_err();
        assert!(matches!(err, PayloadError::DuplicateParticipant { .. }));
    }
}
