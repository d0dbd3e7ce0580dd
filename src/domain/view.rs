//! Public and private JSON views of a match.
//!
//! Views are plain serializable structs built from a [`Scoreboard`] by
//! [`MatchView::build`]. Webhook payloads and HTTP responses both use them.

use serde::Serialize;
use utoipa::ToSchema;

use super::{Counters, DemoStatus, LeagueId, MatchId, Scoreboard, ScoreboardRow, ServerId, UserId};

/// Which fields a view exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Safe for players and webhook subscribers.
    Public,
    /// Adds operator-only fields (`server_id`, `archive_id`).
    Private,
}

/// How to connect to the match server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ConnectView {
    /// Server IP.
    pub ip: String,
    /// Game port.
    pub port: u16,
    /// `ip:port`.
    pub ip_port: String,
    /// Console command joining the server.
    pub console: String,
    /// Browser link joining the server.
    pub browser_protocol: String,
}

impl ConnectView {
    fn new(ip: &str, port: u16) -> Self {
        let ip_port = format!("{ip}:{port}");
        Self {
            ip: ip.to_string(),
            port,
            console: format!("connect {ip_port}"),
            browser_protocol: format!("steam://connect/{ip_port}"),
            ip_port,
        }
    }
}

/// Demo availability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct DemoView {
    /// Demo status code.
    pub status: i16,
    /// Download URL, only while the demo is ready.
    pub url: Option<String>,
}

/// One player on a scoreboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PlayerView {
    /// Player id.
    pub user_id: UserId,
    /// Team code.
    pub team: i16,
    /// Captain flag.
    pub captain: bool,
    /// Alive flag.
    pub alive: bool,
    /// Ping.
    pub ping: i32,
    /// Counters.
    #[serde(flatten)]
    pub counters: Counters,
    /// In-game score.
    pub score: i32,
    /// Disconnected flag.
    pub disconnected: bool,
}

impl From<&ScoreboardRow> for PlayerView {
    fn from(row: &ScoreboardRow) -> Self {
        Self {
            user_id: row.user_id,
            team: row.team.code(),
            captain: row.captain,
            alive: row.alive,
            ping: row.ping,
            counters: row.counters,
            score: row.score,
            disconnected: row.disconnected,
        }
    }
}

/// One team of a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct TeamView {
    /// Display name.
    pub name: String,
    /// Rounds won.
    pub score: i32,
    /// Side code.
    pub side: i16,
    /// Captain, if the team has one.
    pub captain_id: Option<UserId>,
    /// Players.
    pub players: Vec<PlayerView>,
}

/// A match with both teams, as returned to callers and webhooks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct MatchView {
    /// Match id.
    pub match_id: MatchId,
    /// Owning league.
    pub league_id: LeagueId,
    /// Creation time, unix seconds.
    pub timestamp: i64,
    /// Status code.
    pub status: i16,
    /// Map.
    pub map: String,
    /// Connect information.
    pub connect: ConnectView,
    /// Demo information.
    pub demo: DemoView,
    /// Team one.
    pub team_1: TeamView,
    /// Team two.
    pub team_2: TeamView,
    /// Leased server, private views only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<ServerId>,
    /// Archived demo id, private views only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_id: Option<String>,
}

impl MatchView {
    /// Builds a view of `board`.
    ///
    /// `demo_url` is only exposed while the demo is [`DemoStatus::Ready`].
    #[must_use]
    pub fn build(board: &Scoreboard, visibility: Visibility, demo_url: Option<String>) -> Self {
        let record = &board.record;
        let team = |name: &str, score: i32, side: i16, rows: &[ScoreboardRow]| TeamView {
            name: name.to_string(),
            score,
            side,
            captain_id: rows.iter().find(|r| r.captain).map(|r| r.user_id),
            players: rows.iter().map(PlayerView::from).collect(),
        };
        let private = visibility == Visibility::Private;

        Self {
            match_id: record.match_id,
            league_id: record.league_id.clone(),
            timestamp: record.timestamp.timestamp(),
            status: record.status.code(),
            map: record.map.clone(),
            connect: ConnectView::new(&record.raw_ip, record.game_port),
            demo: DemoView {
                status: record.demo_status.code(),
                url: demo_url.filter(|_| record.demo_status == DemoStatus::Ready),
            },
            team_1: team(
                &record.team_1_name,
                record.team_1_score,
                record.team_1_side.code(),
                &board.team_1,
            ),
            team_2: team(
                &record.team_2_name,
                record.team_2_score,
                record.team_2_side.code(),
                &board.team_2,
            ),
            server_id: private.then(|| record.server_id.clone()),
            archive_id: if private {
                record.archive_id.clone()
            } else {
                None
            },
        }
    }

    /// Serializes the view into a JSON object for webhook payloads.
    #[must_use]
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
