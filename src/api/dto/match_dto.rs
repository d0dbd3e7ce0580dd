//! Match endpoint DTOs.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::domain::{MatchStatus, MatchUpdate, PlayerDelta, TeamSide};

/// Body of `PATCH /leagues/{league_id}/matches/{match_id}`.
///
/// Every field is optional; `players` carries incremental player deltas.
/// The connect address and demo fields are owned by the engine and cannot
/// be set here.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(default)]
pub struct UpdateMatchRequest {
    /// New lifecycle status.
    pub status: Option<MatchStatus>,
    /// New map.
    pub map: Option<String>,
    /// New team one name.
    pub team_1_name: Option<String>,
    /// New team two name.
    pub team_2_name: Option<String>,
    /// Rounds won by team one.
    pub team_1_score: Option<i32>,
    /// Rounds won by team two.
    pub team_2_score: Option<i32>,
    /// Side of team one.
    pub team_1_side: Option<TeamSide>,
    /// Side of team two.
    pub team_2_side: Option<TeamSide>,
    /// Player deltas since the previous update.
    pub players: Vec<PlayerDelta>,
}

impl UpdateMatchRequest {
    /// Splits the request into the row update and the player deltas.
    #[must_use]
    pub fn into_parts(self) -> (MatchUpdate, Vec<PlayerDelta>) {
        let update = MatchUpdate {
            status: self.status,
            map: self.map,
            team_1_name: self.team_1_name,
            team_2_name: self.team_2_name,
            team_1_score: self.team_1_score,
            team_2_score: self.team_2_score,
            team_1_side: self.team_1_side,
            team_2_side: self.team_2_side,
            ..MatchUpdate::default()
        };
        (update, self.players)
    }
}

/// Query parameters of `GET /leagues/{league_id}/matches/{match_id}`.
#[derive(Debug, Clone, Copy, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct MatchQuery {
    /// Include operator-only fields.
    #[serde(default)]
    pub private: bool,
}

/// Response of `POST …/analyze`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AnalyzeResponse {
    /// `"submitted"`, or `"skipped"` when the league has no replay
    /// analysis.
    pub status: String,
}
