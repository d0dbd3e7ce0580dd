//! Match settings and their resolution into concrete rosters.
//!
//! Callers describe how teams, captains and the map are picked
//! ([`MatchSettings`]); [`MatchSettings::resolve`] turns that description
//! into a [`ResolvedMatch`] given the players' current league ratings.

use std::collections::HashMap;

use rand::Rng;
use rand::seq::{IndexedRandom, SliceRandom};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::UserId;
use crate::error::GatewayError;

/// How players are split into two teams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PlayerSelection {
    /// Teams are given explicitly.
    Given {
        /// Team one players.
        team_1: Vec<UserId>,
        /// Team two players.
        team_2: Vec<UserId>,
    },
    /// Players are shuffled and dealt alternately.
    Random {
        /// Players to split.
        players: Vec<UserId>,
    },
    /// Players are ordered by rating and dealt alternately.
    Rated {
        /// Players to split.
        players: Vec<UserId>,
    },
}

/// How each team's captain is picked.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CaptainSelection {
    /// Captains are given and must belong to their team.
    Given {
        /// Captain of team one.
        team_1: UserId,
        /// Captain of team two.
        team_2: UserId,
    },
    /// A random player of each team.
    #[default]
    Random,
    /// The highest rated player of each team.
    Rated,
}

/// How the map is picked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "mode", content = "maps", rename_all = "snake_case")]
pub enum MapSelection {
    /// The first listed map.
    Given(Vec<String>),
    /// A random listed map.
    Random(Vec<String>),
}

/// Options forwarded to the server's match configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct RosterOptions {
    /// Seconds players have to connect.
    pub connection_time: u32,
    /// Play a knife round for sides.
    pub knife_round: bool,
    /// Hold the start until spectators have joined.
    pub wait_for_spectators: bool,
    /// Warmup length in seconds.
    pub warmup_time: u32,
}

impl Default for RosterOptions {
    fn default() -> Self {
        Self {
            connection_time: 300,
            knife_round: false,
            wait_for_spectators: true,
            warmup_time: 15,
        }
    }
}

/// Caller description of a match to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MatchSettings {
    /// Team one display name.
    #[serde(default = "default_team_1_name")]
    pub team_1_name: String,
    /// Team two display name.
    #[serde(default = "default_team_2_name")]
    pub team_2_name: String,
    /// Team selection.
    pub players: PlayerSelection,
    /// Captain selection.
    #[serde(default)]
    pub captains: CaptainSelection,
    /// Map selection.
    pub map: MapSelection,
    /// Server-side match options.
    #[serde(default)]
    pub options: RosterOptions,
}

fn default_team_1_name() -> String {
    "One".to_string()
}

fn default_team_2_name() -> String {
    "Two".to_string()
}

/// Concrete rosters, captains and map for a new match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMatch {
    /// Team one display name.
    pub team_1_name: String,
    /// Team two display name.
    pub team_2_name: String,
    /// Team one players.
    pub team_1: Vec<UserId>,
    /// Team two players.
    pub team_2: Vec<UserId>,
    /// Team one captain.
    pub captain_1: UserId,
    /// Team two captain.
    pub captain_2: UserId,
    /// Map to play.
    pub map: String,
    /// Server-side match options.
    pub options: RosterOptions,
}

impl ResolvedMatch {
    /// Every participant, team one first.
    pub fn participants(&self) -> impl Iterator<Item = &UserId> {
        self.team_1.iter().chain(self.team_2.iter())
    }
}

impl MatchSettings {
    /// Every player named by the settings, in no particular order.
    #[must_use]
    pub fn participants(&self) -> Vec<UserId> {
        match &self.players {
            PlayerSelection::Given { team_1, team_2 } => {
                team_1.iter().chain(team_2.iter()).copied().collect()
            }
            PlayerSelection::Random { players } | PlayerSelection::Rated { players } => {
                players.clone()
            }
        }
    }

    /// Returns `true` if resolution needs players' league ratings.
    #[must_use]
    pub fn needs_ratings(&self) -> bool {
        matches!(self.players, PlayerSelection::Rated { .. })
            || matches!(self.captains, CaptainSelection::Rated)
    }

    /// Resolves teams, captains and map.
    ///
    /// `ratings` maps players with league statistics to their rating;
    /// players without an entry rank below every rated player.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::PlayersNotGiven`] if either team ends up empty.
    /// - [`GatewayError::CaptainsNotInTeam`] if a given captain is not on
    ///   their team.
    /// - [`GatewayError::InvalidRequest`] if no map is listed.
    pub fn resolve<R: Rng + ?Sized>(
        &self,
        ratings: &HashMap<UserId, f64>,
        rng: &mut R,
    ) -> Result<ResolvedMatch, GatewayError> {
        let (team_1, team_2) = match &self.players {
            PlayerSelection::Given { team_1, team_2 } => (team_1.clone(), team_2.clone()),
            PlayerSelection::Random { players } => {
                let mut shuffled = players.clone();
                shuffled.shuffle(rng);
                deal(shuffled)
            }
            PlayerSelection::Rated { players } => deal(by_rating(players, ratings)),
        };

        let (Some(&first_1), Some(&first_2)) = (team_1.first(), team_2.first()) else {
            return Err(GatewayError::PlayersNotGiven);
        };

        let (captain_1, captain_2) = match &self.captains {
            CaptainSelection::Given {
                team_1: c1,
                team_2: c2,
            } => {
                if !team_1.contains(c1) || !team_2.contains(c2) {
                    return Err(GatewayError::CaptainsNotInTeam);
                }
                (*c1, *c2)
            }
            CaptainSelection::Random => (
                team_1.choose(rng).copied().unwrap_or(first_1),
                team_2.choose(rng).copied().unwrap_or(first_2),
            ),
            CaptainSelection::Rated => {
                match (top_rated(&team_1, ratings), top_rated(&team_2, ratings)) {
                    (None, None) => (
                        team_1.choose(rng).copied().unwrap_or(first_1),
                        team_2.choose(rng).copied().unwrap_or(first_2),
                    ),
                    (c1, c2) => (c1.unwrap_or(first_1), c2.unwrap_or(first_2)),
                }
            }
        };

        let map = match &self.map {
            MapSelection::Given(maps) => maps.first().cloned(),
            MapSelection::Random(maps) => maps.choose(rng).cloned(),
        }
        .ok_or_else(|| GatewayError::InvalidRequest("at least one map is required".into()))?;

        Ok(ResolvedMatch {
            team_1_name: self.team_1_name.clone(),
            team_2_name: self.team_2_name.clone(),
            team_1,
            team_2,
            captain_1,
            captain_2,
            map,
            options: self.options,
        })
    }
}

/// Deals players alternately into two teams, team one first.
fn deal(players: Vec<UserId>) -> (Vec<UserId>, Vec<UserId>) {
    let mut team_1 = Vec::with_capacity(players.len().div_ceil(2));
    let mut team_2 = Vec::with_capacity(players.len() / 2);
    for (i, player) in players.into_iter().enumerate() {
        if i % 2 == 0 {
            team_1.push(player);
        } else {
            team_2.push(player);
        }
    }
    (team_1, team_2)
}

/// Orders players by rating descending; unrated players keep their given
/// order after every rated player.
fn by_rating(players: &[UserId], ratings: &HashMap<UserId, f64>) -> Vec<UserId> {
    let (mut rated, unrated): (Vec<_>, Vec<_>) = players
        .iter()
        .copied()
        .partition(|p| ratings.contains_key(p));
    rated.sort_by(|a, b| {
        let ra = ratings.get(a).copied().unwrap_or_default();
        let rb = ratings.get(b).copied().unwrap_or_default();
        rb.total_cmp(&ra)
    });
    rated.extend(unrated);
    rated
}

fn top_rated(team: &[UserId], ratings: &HashMap<UserId, f64>) -> Option<UserId> {
    team.iter()
        .filter_map(|p| ratings.get(p).map(|r| (*p, *r)))
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(p, _)| p)
}
