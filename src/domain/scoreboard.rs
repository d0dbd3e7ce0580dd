//! Per-player scoreboard rows, league statistics and incoming deltas.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{LeagueId, MatchId, MatchRecord, Team, UserId};

/// Cumulative per-player counters shared by scoreboards and statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct Counters {
    /// Kills.
    pub kills: i32,
    /// Headshot kills.
    pub headshots: i32,
    /// Assists.
    pub assists: i32,
    /// Deaths.
    pub deaths: i32,
    /// Shots fired.
    pub shots_fired: i32,
    /// Shots that hit.
    pub shots_hit: i32,
    /// Round MVP awards.
    pub mvps: i32,
}

impl Counters {
    /// Field-wise saturating sum of two counter sets.
    #[must_use]
    pub const fn merged(self, delta: Self) -> Self {
        Self {
            kills: self.kills.saturating_add(delta.kills),
            headshots: self.headshots.saturating_add(delta.headshots),
            assists: self.assists.saturating_add(delta.assists),
            deaths: self.deaths.saturating_add(delta.deaths),
            shots_fired: self.shots_fired.saturating_add(delta.shots_fired),
            shots_hit: self.shots_hit.saturating_add(delta.shots_hit),
            mvps: self.mvps.saturating_add(delta.mvps),
        }
    }
}

/// One player's row on a match scoreboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreboardRow {
    /// Match the row belongs to.
    pub match_id: MatchId,
    /// Player.
    pub user_id: UserId,
    /// Team assignment.
    pub team: Team,
    /// Whether the player captains their team.
    pub captain: bool,
    /// Whether the player is currently alive.
    pub alive: bool,
    /// Latest ping in milliseconds.
    pub ping: i32,
    /// Cumulative counters.
    #[serde(flatten)]
    pub counters: Counters,
    /// Cumulative in-game score.
    pub score: i32,
    /// Whether the player is disconnected.
    pub disconnected: bool,
}

impl ScoreboardRow {
    /// Zeroed row inserted for every participant when a match is created.
    #[must_use]
    pub fn initial(match_id: MatchId, user_id: UserId, team: Team, captain: bool) -> Self {
        Self {
            match_id,
            user_id,
            team,
            captain,
            alive: true,
            ping: 0,
            counters: Counters::default(),
            score: 0,
            disconnected: false,
        }
    }
}

/// Incremental player update reported by the game server.
///
/// Counter fields are deltas added to the stored values; `team`, `alive`,
/// `ping` and `disconnected` are instantaneous and replace stored values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PlayerDelta {
    /// Player.
    pub user_id: UserId,
    /// Current team.
    pub team: Team,
    /// Currently alive.
    pub alive: bool,
    /// Current ping.
    pub ping: i32,
    /// Counter increments.
    #[serde(flatten)]
    pub counters: Counters,
    /// Score increment.
    pub score: i32,
    /// Currently disconnected.
    pub disconnected: bool,
    /// Teammates blinded since the last update.
    #[serde(default)]
    pub team_blinds: i32,
    /// Teammates killed since the last update.
    #[serde(default)]
    pub team_kills: i32,
}

/// A player's cumulative statistics within one league.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticRow {
    /// Player.
    pub user_id: UserId,
    /// League the statistics are scoped to.
    pub league_id: LeagueId,
    /// Cumulative counters.
    #[serde(flatten)]
    pub counters: Counters,
    /// Weighted rating.
    pub rating: f64,
}

impl StatisticRow {
    /// Empty statistics for a player's first appearance in a league.
    #[must_use]
    pub fn empty(user_id: UserId, league_id: LeagueId) -> Self {
        Self {
            user_id,
            league_id,
            counters: Counters::default(),
            rating: 0.0,
        }
    }
}

/// Increment applied to a [`StatisticRow`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatisticDelta {
    /// Player.
    pub user_id: UserId,
    /// Counter increments.
    pub counters: Counters,
    /// Rating increment.
    pub rating: f64,
}

/// A match together with both teams' scoreboard rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Scoreboard {
    /// The match row.
    pub record: MatchRecord,
    /// Rows of team one.
    pub team_1: Vec<ScoreboardRow>,
    /// Rows of team two.
    pub team_2: Vec<ScoreboardRow>,
}

impl Scoreboard {
    /// Splits rows by team into a scoreboard.
    #[must_use]
    pub fn from_rows(record: MatchRecord, rows: Vec<ScoreboardRow>) -> Self {
        let (team_1, team_2) = rows.into_iter().partition(|row| row.team == Team::One);
        Self {
            record,
            team_1,
            team_2,
        }
    }

    /// Iterates over every player row of both teams.
    pub fn players(&self) -> impl Iterator<Item = &ScoreboardRow> {
        self.team_1.iter().chain(self.team_2.iter())
    }

    /// Returns the captain of the given team, if any.
    #[must_use]
    pub fn captain(&self, team: Team) -> Option<&ScoreboardRow> {
        let rows = match team {
            Team::One => &self.team_1,
            Team::Two => &self.team_2,
        };
        rows.iter().find(|row| row.captain)
    }
}
