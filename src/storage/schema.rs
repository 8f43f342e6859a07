//! SQLite schema.

/// Schema applied on every open. All statements are idempotent.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    account_id      TEXT PRIMARY KEY,
    tier            TEXT NOT NULL,
    tier_score      REAL,
    discovered_at   TEXT NOT NULL,
    history_fetched INTEGER NOT NULL DEFAULT 0 CHECK (history_fetched IN (0, 1))
);

CREATE INDEX IF NOT EXISTS idx_accounts_pending ON accounts(history_fetched, discovered_at);
CREATE INDEX IF NOT EXISTS idx_accounts_tier ON accounts(tier);

CREATE TABLE IF NOT EXISTS matches (
    match_id     TEXT PRIMARY KEY,
    game_mode    TEXT NOT NULL,
    season       INTEGER NOT NULL,
    played_at    TEXT NOT NULL,
    collected_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_matches_season_mode ON matches(season, game_mode);

CREATE TABLE IF NOT EXISTS participants (
    match_id   TEXT NOT NULL REFERENCES matches(match_id),
    account_id TEXT NOT NULL,
    character  TEXT NOT NULL,
    role       TEXT NOT NULL CHECK (role IN ('vanguard', 'duelist', 'strategist')),
    team       INTEGER NOT NULL CHECK (team IN (0, 1)),
    won        INTEGER NOT NULL CHECK (won IN (0, 1)),
    kills      INTEGER NOT NULL DEFAULT 0,
    deaths     INTEGER NOT NULL DEFAULT 0,
    assists    INTEGER NOT NULL DEFAULT 0,
    damage     REAL NOT NULL DEFAULT 0,
    healing    REAL NOT NULL DEFAULT 0,
    PRIMARY KEY (match_id, account_id)
);

CREATE INDEX IF NOT EXISTS idx_participants_character ON participants(character);
CREATE INDEX IF NOT EXISTS idx_participants_account ON participants(account_id);
CREATE INDEX IF NOT EXISTS idx_participants_match_team ON participants(match_id, team);

CREATE TABLE IF NOT EXISTS character_stats (
    character   TEXT NOT NULL,
    tier        TEXT NOT NULL,
    games       INTEGER NOT NULL,
    wins        INTEGER NOT NULL,
    losses      INTEGER NOT NULL,
    win_rate    REAL NOT NULL,
    ci_lower    REAL NOT NULL,
    ci_upper    REAL NOT NULL,
    model_tag   TEXT NOT NULL,
    analyzed_at TEXT NOT NULL,
    PRIMARY KEY (character, tier)
);

CREATE TABLE IF NOT EXISTS synergy_stats (
    character_a            TEXT NOT NULL,
    character_b            TEXT NOT NULL,
    tier                   TEXT NOT NULL,
    games_together         INTEGER NOT NULL,
    wins_together          INTEGER NOT NULL,
    win_rate               REAL NOT NULL,
    expected_win_rate      REAL NOT NULL,
    synergy_score          REAL NOT NULL,
    ci_lower               REAL NOT NULL,
    ci_upper               REAL NOT NULL,
    p_value                REAL NOT NULL,
    significant            INTEGER NOT NULL,
    significant_bonferroni INTEGER NOT NULL,
    bonferroni_alpha       REAL NOT NULL,
    confidence             TEXT NOT NULL,
    sample_size_warning    TEXT,
    baseline_model         TEXT NOT NULL,
    analyzed_at            TEXT NOT NULL,
    PRIMARY KEY (character_a, character_b, tier),
    CHECK (character_a < character_b)
);

CREATE TABLE IF NOT EXISTS collection_metadata (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;
