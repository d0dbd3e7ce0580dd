//! Match records and the lifecycle state machine.
//!
//! A [`MatchRecord`] is the persisted "scoreboard total" row for one match.
//! Its address fields are a snapshot taken when the server was leased and
//! are corrected at most once after the server finished booting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{LeagueId, MatchId, ServerId};
use crate::error::GatewayError;

/// Lifecycle status of a match.
///
/// Persisted as a small integer: `Finished = 0`, `Live = 1`,
/// `Processing = 2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// The match is over; terminal state.
    Finished,
    /// Players are on the server and the match is running.
    Live,
    /// A server was leased and is being prepared.
    Processing,
}

impl MatchStatus {
    /// Returns the persisted status code.
    #[must_use]
    pub const fn code(self) -> i16 {
        match self {
            Self::Finished => 0,
            Self::Live => 1,
            Self::Processing => 2,
        }
    }

    /// Parses a persisted status code.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidRequest`] for unknown codes.
    pub fn from_code(code: i16) -> Result<Self, GatewayError> {
        match code {
            0 => Ok(Self::Finished),
            1 => Ok(Self::Live),
            2 => Ok(Self::Processing),
            other => Err(GatewayError::InvalidRequest(format!(
                "unknown match status code {other}"
            ))),
        }
    }

    /// Position of the status along `Processing → Live → Finished`.
    const fn rank(self) -> u8 {
        match self {
            Self::Processing => 0,
            Self::Live => 1,
            Self::Finished => 2,
        }
    }

    /// Checks that moving from `self` to `next` follows the state machine.
    ///
    /// Staying in the same state is allowed. `Finished` is terminal and
    /// no status may move backwards.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::MatchAlreadyEnded`] when leaving `Finished`
    /// and [`GatewayError::InvalidRequest`] for backwards moves.
    pub fn check_transition(self, next: Self) -> Result<(), GatewayError> {
        if self == Self::Finished && next != Self::Finished {
            return Err(GatewayError::MatchAlreadyEnded);
        }
        if next.rank() < self.rank() {
            return Err(GatewayError::InvalidRequest(format!(
                "match cannot move from {self:?} back to {next:?}"
            )));
        }
        Ok(())
    }
}

/// Status of the recorded demo of a match.
///
/// Persisted as `None = 0`, `Processing = 1`, `Ready = 2`, `TooLarge = 3`,
/// `Expired = 4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DemoStatus {
    /// No demo has been captured yet.
    None,
    /// The capture pipeline is running.
    Processing,
    /// The archived demo is available for download.
    Ready,
    /// The compressed demo exceeded the configured size cap.
    TooLarge,
    /// The recording was no longer available on the server.
    Expired,
}

impl DemoStatus {
    /// Returns the persisted status code.
    #[must_use]
    pub const fn code(self) -> i16 {
        match self {
            Self::None => 0,
            Self::Processing => 1,
            Self::Ready => 2,
            Self::TooLarge => 3,
            Self::Expired => 4,
        }
    }

    /// Parses a persisted status code.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidRequest`] for unknown codes.
    pub fn from_code(code: i16) -> Result<Self, GatewayError> {
        match code {
            0 => Ok(Self::None),
            1 => Ok(Self::Processing),
            2 => Ok(Self::Ready),
            3 => Ok(Self::TooLarge),
            4 => Ok(Self::Expired),
            other => Err(GatewayError::InvalidRequest(format!(
                "unknown demo status code {other}"
            ))),
        }
    }
}

/// Side a team is playing on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TeamSide {
    /// Counter-terrorists, code `0`.
    CounterTerrorist,
    /// Terrorists, code `1`.
    Terrorist,
}

impl TeamSide {
    /// Returns the persisted side code.
    #[must_use]
    pub const fn code(self) -> i16 {
        match self {
            Self::CounterTerrorist => 0,
            Self::Terrorist => 1,
        }
    }

    /// Parses a persisted side code.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidRequest`] for unknown codes.
    pub fn from_code(code: i16) -> Result<Self, GatewayError> {
        match code {
            0 => Ok(Self::CounterTerrorist),
            1 => Ok(Self::Terrorist),
            other => Err(GatewayError::InvalidRequest(format!(
                "unknown team side code {other}"
            ))),
        }
    }
}

/// Which of the two teams a player belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    /// First team, code `0`.
    One,
    /// Second team, code `1`.
    Two,
}

impl Team {
    /// Returns the persisted team code.
    #[must_use]
    pub const fn code(self) -> i16 {
        match self {
            Self::One => 0,
            Self::Two => 1,
        }
    }

    /// Parses a persisted team code.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidRequest`] for unknown codes.
    pub fn from_code(code: i16) -> Result<Self, GatewayError> {
        match code {
            0 => Ok(Self::One),
            1 => Ok(Self::Two),
            other => Err(GatewayError::InvalidRequest(format!(
                "unknown team code {other}"
            ))),
        }
    }
}

/// Persisted match row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    /// Match identifier.
    pub match_id: MatchId,
    /// Owning league.
    pub league_id: LeagueId,
    /// Server leased for the match.
    pub server_id: ServerId,
    /// Connect IP as observed at lease time (corrected once after boot).
    pub raw_ip: String,
    /// Connect port as observed at lease time (corrected once after boot).
    pub game_port: u16,
    /// Lifecycle status.
    pub status: MatchStatus,
    /// Demo capture status.
    pub demo_status: DemoStatus,
    /// Map being played.
    pub map: String,
    /// Display name of team one.
    pub team_1_name: String,
    /// Display name of team two.
    pub team_2_name: String,
    /// Rounds won by team one.
    pub team_1_score: i32,
    /// Rounds won by team two.
    pub team_2_score: i32,
    /// Side team one is on.
    pub team_1_side: TeamSide,
    /// Side team two is on.
    pub team_2_side: TeamSide,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Object-storage id of the archived demo.
    pub archive_id: Option<String>,
}

impl MatchRecord {
    /// Builds the initial record for a freshly reserved server.
    ///
    /// The connect address is empty until the lease manager reports the
    /// server's live state.
    #[must_use]
    pub fn reserved(reservation: &MatchReservation, server_id: ServerId) -> Self {
        Self {
            match_id: reservation.match_id,
            league_id: reservation.league_id.clone(),
            server_id,
            raw_ip: String::new(),
            game_port: 0,
            status: MatchStatus::Processing,
            demo_status: DemoStatus::None,
            map: reservation.map.clone(),
            team_1_name: reservation.team_1_name.clone(),
            team_2_name: reservation.team_2_name.clone(),
            team_1_score: 0,
            team_2_score: 0,
            team_1_side: TeamSide::CounterTerrorist,
            team_2_side: TeamSide::Terrorist,
            timestamp: reservation.timestamp,
            archive_id: None,
        }
    }

    /// Returns the team with more rounds, or `None` on a tie.
    #[must_use]
    pub fn leading_team(&self) -> Option<Team> {
        match self.team_1_score.cmp(&self.team_2_score) {
            std::cmp::Ordering::Greater => Some(Team::One),
            std::cmp::Ordering::Less => Some(Team::Two),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// Applies a partial update in place.
    pub fn apply(&mut self, update: &MatchUpdate) {
        if let Some(raw_ip) = &update.raw_ip {
            self.raw_ip.clone_from(raw_ip);
        }
        if let Some(port) = update.game_port {
            self.game_port = port;
        }
        if let Some(server_id) = &update.server_id {
            self.server_id = server_id.clone();
        }
        if let Some(archive_id) = &update.archive_id {
            self.archive_id = Some(archive_id.clone());
        }
        if let Some(timestamp) = update.timestamp {
            self.timestamp = timestamp;
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(demo_status) = update.demo_status {
            self.demo_status = demo_status;
        }
        if let Some(map) = &update.map {
            self.map.clone_from(map);
        }
        if let Some(name) = &update.team_1_name {
            self.team_1_name.clone_from(name);
        }
        if let Some(name) = &update.team_2_name {
            self.team_2_name.clone_from(name);
        }
        if let Some(score) = update.team_1_score {
            self.team_1_score = score;
        }
        if let Some(score) = update.team_2_score {
            self.team_2_score = score;
        }
        if let Some(side) = update.team_1_side {
            self.team_1_side = side;
        }
        if let Some(side) = update.team_2_side {
            self.team_2_side = side;
        }
    }
}

/// Partial update of a [`MatchRecord`]. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchUpdate {
    /// New connect IP.
    pub raw_ip: Option<String>,
    /// New connect port.
    pub game_port: Option<u16>,
    /// New server id.
    pub server_id: Option<ServerId>,
    /// Archived demo id.
    pub archive_id: Option<String>,
    /// New creation time.
    pub timestamp: Option<DateTime<Utc>>,
    /// New lifecycle status.
    pub status: Option<MatchStatus>,
    /// New demo status.
    pub demo_status: Option<DemoStatus>,
    /// New map.
    pub map: Option<String>,
    /// New team one name.
    pub team_1_name: Option<String>,
    /// New team two name.
    pub team_2_name: Option<String>,
    /// New team one score.
    pub team_1_score: Option<i32>,
    /// New team two score.
    pub team_2_score: Option<i32>,
    /// New team one side.
    pub team_1_side: Option<TeamSide>,
    /// New team two side.
    pub team_2_side: Option<TeamSide>,
}

impl MatchUpdate {
    /// Returns `true` when no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Update that only rewrites the connect address.
    #[must_use]
    pub fn address(raw_ip: &str, game_port: u16) -> Self {
        Self {
            raw_ip: Some(raw_ip.to_string()),
            game_port: Some(game_port),
            ..Self::default()
        }
    }

    /// Update that only changes the lifecycle status.
    #[must_use]
    pub fn status(status: MatchStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Update that only changes the demo status.
    #[must_use]
    pub fn demo_status(demo_status: DemoStatus) -> Self {
        Self {
            demo_status: Some(demo_status),
            ..Self::default()
        }
    }
}

/// Everything needed to insert the match row that reserves a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchReservation {
    /// Match to create.
    pub match_id: MatchId,
    /// Owning league.
    pub league_id: LeagueId,
    /// Map to play.
    pub map: String,
    /// Team one display name.
    pub team_1_name: String,
    /// Team two display name.
    pub team_2_name: String,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
}

/// Reference to a match within its league.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchRef {
    /// Owning league.
    pub league_id: LeagueId,
    /// Match identifier.
    pub match_id: MatchId,
}

impl MatchRef {
    /// Creates a new reference.
    #[must_use]
    pub const fn new(league_id: LeagueId, match_id: MatchId) -> Self {
        Self {
            league_id,
            match_id,
        }
    }
}
