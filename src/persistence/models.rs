//! Database row shapes and their conversion into domain types.
//!
//! Queries decode into plain tuples; the functions here turn those tuples
//! into domain records, rejecting codes the domain does not know.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use uuid::Uuid;

use crate::domain::{
    BanRecord, Counters, DemoStatus, LeagueConfig, LeagueId, MatchId, MatchRecord, MatchStatus,
    RatingWeights, ScoreboardRow, ServerId, ServerRecord, StatisticRow, Team, TeamSide, UserId,
};
use crate::error::GatewayError;

/// Column list matching [`MatchRow`].
pub const MATCH_COLUMNS: &str = "match_id, league_id, server_id, raw_ip, game_port, status, \
     demo_status, map, team_1_name, team_2_name, team_1_score, team_2_score, team_1_side, \
     team_2_side, timestamp, archive_id";

/// Column list matching [`ServerRow`].
pub const SERVER_COLUMNS: &str =
    "server_id, game_token, game_token_id, game_token_expires, month_credits, month_reset_at";

/// Column list matching [`ScoreboardDbRow`].
pub const SCOREBOARD_COLUMNS: &str = "match_id, user_id, team, captain, alive, ping, kills, \
     headshots, assists, deaths, shots_fired, shots_hit, mvps, score, disconnected";

/// Column list matching [`StatisticDbRow`].
pub const STATISTIC_COLUMNS: &str = "user_id, league_id, kills, headshots, assists, deaths, \
     shots_fired, shots_hit, mvps, rating";

/// Column list matching [`LeagueRow`].
pub const LEAGUE_COLUMNS: &str =
    "league_id, league_name, region, tickrate, demo_tickrate, use_rating, rating_weights, integrations";

/// Column list matching [`BanRow`].
pub const BAN_COLUMNS: &str =
    "ban_id, user_id, league_id, global, reason, timestamp, expires, revoked, exceptions";

/// A `scoreboard_total` row.
pub type MatchRow = (
    Uuid,
    String,
    String,
    String,
    i32,
    i16,
    i16,
    String,
    String,
    String,
    i32,
    i32,
    i16,
    i16,
    DateTime<Utc>,
    Option<String>,
);

/// A `server` row.
pub type ServerRow = (
    String,
    Option<String>,
    Option<String>,
    DateTime<Utc>,
    f64,
    DateTime<Utc>,
);

/// A `scoreboard` row.
pub type ScoreboardDbRow = (
    Uuid,
    Uuid,
    i16,
    bool,
    bool,
    i32,
    i32,
    i32,
    i32,
    i32,
    i32,
    i32,
    i32,
    i32,
    bool,
);

/// A `statistic` row.
pub type StatisticDbRow = (Uuid, String, i32, i32, i32, i32, i32, i32, i32, f64);

/// A `league` row.
pub type LeagueRow = (
    String,
    String,
    String,
    i32,
    i32,
    bool,
    Json<RatingWeights>,
    Vec<String>,
);

/// A `ban` row.
pub type BanRow = (
    Uuid,
    Uuid,
    String,
    bool,
    String,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
    bool,
    Vec<String>,
);

fn narrow<T: TryFrom<i32>>(value: i32, column: &str) -> Result<T, GatewayError> {
    T::try_from(value).map_err(|_| {
        GatewayError::PersistenceError(format!("{column} value {value} out of range"))
    })
}

/// Decodes a match row.
///
/// # Errors
///
/// Returns [`GatewayError::PersistenceError`] for out-of-range ports and
/// [`GatewayError::InvalidRequest`] for unknown status codes.
pub fn match_from_row(row: MatchRow) -> Result<MatchRecord, GatewayError> {
    let (
        match_id,
        league_id,
        server_id,
        raw_ip,
        game_port,
        status,
        demo_status,
        map,
        team_1_name,
        team_2_name,
        team_1_score,
        team_2_score,
        team_1_side,
        team_2_side,
        timestamp,
        archive_id,
    ) = row;
    Ok(MatchRecord {
        match_id: MatchId::from_uuid(match_id),
        league_id: LeagueId::new(league_id),
        server_id: ServerId::new(server_id),
        raw_ip,
        game_port: narrow(game_port, "game_port")?,
        status: MatchStatus::from_code(status)?,
        demo_status: DemoStatus::from_code(demo_status)?,
        map,
        team_1_name,
        team_2_name,
        team_1_score,
        team_2_score,
        team_1_side: TeamSide::from_code(team_1_side)?,
        team_2_side: TeamSide::from_code(team_2_side)?,
        timestamp,
        archive_id,
    })
}

/// Decodes a server row.
#[must_use]
pub fn server_from_row(row: ServerRow) -> ServerRecord {
    let (server_id, game_token, game_token_id, game_token_expires, month_credits, month_reset_at) =
        row;
    ServerRecord {
        server_id: ServerId::new(server_id),
        game_token,
        game_token_id,
        game_token_expires,
        month_credits,
        month_reset_at,
    }
}

/// Decodes a scoreboard row.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] for unknown team codes.
pub fn scoreboard_from_row(row: ScoreboardDbRow) -> Result<ScoreboardRow, GatewayError> {
    let (
        match_id,
        user_id,
        team,
        captain,
        alive,
        ping,
        kills,
        headshots,
        assists,
        deaths,
        shots_fired,
        shots_hit,
        mvps,
        score,
        disconnected,
    ) = row;
    Ok(ScoreboardRow {
        match_id: MatchId::from_uuid(match_id),
        user_id: UserId::from_uuid(user_id),
        team: Team::from_code(team)?,
        captain,
        alive,
        ping,
        counters: Counters {
            kills,
            headshots,
            assists,
            deaths,
            shots_fired,
            shots_hit,
            mvps,
        },
        score,
        disconnected,
    })
}

/// Decodes a statistic row.
#[must_use]
pub fn statistic_from_row(row: StatisticDbRow) -> StatisticRow {
    let (user_id, league_id, kills, headshots, assists, deaths, shots_fired, shots_hit, mvps, rating) =
        row;
    StatisticRow {
        user_id: UserId::from_uuid(user_id),
        league_id: LeagueId::new(league_id),
        counters: Counters {
            kills,
            headshots,
            assists,
            deaths,
            shots_fired,
            shots_hit,
            mvps,
        },
        rating,
    }
}

/// Decodes a league row.
///
/// # Errors
///
/// Returns [`GatewayError::PersistenceError`] for tickrates outside `u16`.
pub fn league_from_row(row: LeagueRow) -> Result<LeagueConfig, GatewayError> {
    let (league_id, league_name, region, tickrate, demo_tickrate, use_rating, weights, integrations) =
        row;
    Ok(LeagueConfig {
        league_id: LeagueId::new(league_id),
        league_name,
        region,
        tickrate: narrow(tickrate, "tickrate")?,
        demo_tickrate: narrow(demo_tickrate, "demo_tickrate")?,
        use_rating,
        weights: weights.0,
        integrations,
    })
}

/// Decodes a ban row.
#[must_use]
pub fn ban_from_row(row: BanRow) -> BanRecord {
    let (ban_id, user_id, league_id, global, reason, timestamp, expires, revoked, exceptions) = row;
    BanRecord {
        ban_id,
        user_id: UserId::from_uuid(user_id),
        league_id: LeagueId::new(league_id),
        global,
        reason,
        timestamp,
        expires,
        revoked,
        exceptions: exceptions.into_iter().map(LeagueId::new).collect(),
    }
}

/// Raw uuids of a list of players, for `= ANY($n)` binds.
#[must_use]
pub fn user_uuids(users: &[UserId]) -> Vec<Uuid> {
    users.iter().map(|u| *u.as_uuid()).collect()
}
