//! League configuration consumed by the match engine.
//!
//! League CRUD lives elsewhere; this module only models the fields the
//! engine reads when creating and scoring a match.

use serde::{Deserialize, Serialize};

use super::LeagueId;
use crate::error::GatewayError;

/// Regions a league may host its servers in.
pub const REGIONS: &[&str] = &[
    "amsterdam",
    "barcelona",
    "bristol",
    "chicago",
    "dallas",
    "dusseldorf",
    "istanbul",
    "los_angeles",
    "moscow",
    "new_york_city",
    "portland",
    "singapore",
    "stockholm",
    "strasbourg",
    "sydney",
    "warsaw",
];

/// Supported game simulation tickrates.
pub const GAME_TICKRATES: &[u16] = &[64, 128];

/// Supported demo (spectator) snapshot rates.
pub const DEMO_TICKRATES: &[u16] = &[16, 32, 64, 128];

/// Integration flag enabling replay analysis for a league.
pub const ANALYZER_INTEGRATION: &str = "playwin";

/// League-configurable weight vector applied to statistic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingWeights {
    /// Per kill.
    pub kill: f64,
    /// Per death.
    pub death: f64,
    /// Per round won by the player's team.
    pub round_won: f64,
    /// Per round lost by the player's team.
    pub round_lost: f64,
    /// Once per match won.
    pub match_won: f64,
    /// Once per match lost.
    pub match_lost: f64,
    /// Per assist.
    pub assist: f64,
    /// Per teammate blinded.
    pub mate_blinded: f64,
    /// Per teammate killed.
    pub mate_killed: f64,
    /// Per headshot.
    pub headshot: f64,
    /// Per point of in-game score.
    pub score: f64,
}

/// The subset of a league the engine needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeagueConfig {
    /// League identifier.
    pub league_id: LeagueId,
    /// Display name, pushed to servers as their hostname.
    pub league_name: String,
    /// Region servers are provisioned in.
    pub region: String,
    /// Game tickrate.
    pub tickrate: u16,
    /// Demo snapshot rate.
    pub demo_tickrate: u16,
    /// Whether the league keeps ratings at all.
    pub use_rating: bool,
    /// Rating weights.
    pub weights: RatingWeights,
    /// Enabled integration names.
    pub integrations: Vec<String>,
}

impl LeagueConfig {
    /// Checks region and tickrates against the supported values.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::InvalidRegion`] for an unknown region.
    /// - [`GatewayError::InvalidTickRate`] for an unsupported game or demo
    ///   tickrate.
    /// - [`GatewayError::DemoTickRateAboveGame`] when the demo rate exceeds
    ///   the game rate.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if !REGIONS.contains(&self.region.as_str()) {
            return Err(GatewayError::InvalidRegion(self.region.clone()));
        }
        if !GAME_TICKRATES.contains(&self.tickrate) {
            return Err(GatewayError::InvalidTickRate(self.tickrate));
        }
        if !DEMO_TICKRATES.contains(&self.demo_tickrate) {
            return Err(GatewayError::InvalidTickRate(self.demo_tickrate));
        }
        if self.demo_tickrate > self.tickrate {
            return Err(GatewayError::DemoTickRateAboveGame {
                demo: self.demo_tickrate,
                game: self.tickrate,
            });
        }
        Ok(())
    }

    /// Returns `true` if the named integration is enabled.
    #[must_use]
    pub fn has_integration(&self, name: &str) -> bool {
        self.integrations.iter().any(|i| i == name)
    }
}
