//! Persistence layer: server directory, match tables and league read models.
//!
//! Three traits split the stored state by owner:
//!
//! - [`ServerDirectory`]: rented servers and the reservation rule that keeps
//!   a server from backing two unfinished matches.
//! - [`MatchRepository`]: match rows, scoreboard rows and league statistics.
//! - [`LeagueDirectory`]: read-only league, ban, player and webhook data
//!   owned by other services.
//!
//! [`postgres::PostgresStore`] implements all three on `sqlx::PgPool`;
//! [`memory::MemoryStore`] implements them in process for tests and
//! persistence-disabled runs.

pub mod memory;
pub mod models;
pub mod postgres;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    BanRecord, LeagueConfig, LeagueId, MatchId, MatchRecord, MatchRef, MatchReservation,
    MatchUpdate, PlayerDelta, ScoreboardRow, ServerId, ServerRecord, StatisticDelta, UserId,
    WebhookEvent, WebhookSubscription,
};
use crate::error::GatewayError;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Rented servers and the reservation rule.
#[async_trait]
pub trait ServerDirectory: Send + Sync + fmt::Debug {
    /// Selects the idle server with the most credits left (ties broken by
    /// the soonest reset) and inserts `reservation` as a `Processing` match
    /// on it, as one atomic step.
    ///
    /// A server is idle when no unfinished match references it. Returns
    /// `None` without inserting anything when every server is busy.
    /// Implementations that retry on contention return
    /// [`GatewayError::ServerUnavailable`] once they give up, never `None`,
    /// so that contention does not provision a new server.
    async fn reserve_idle(
        &self,
        reservation: &MatchReservation,
    ) -> Result<Option<ServerRecord>, GatewayError>;

    /// Inserts a newly provisioned server together with the reservation
    /// referencing it.
    async fn insert_reserved(
        &self,
        server: &ServerRecord,
        reservation: &MatchReservation,
    ) -> Result<(), GatewayError>;

    /// Overwrites a server's token and billing fields.
    async fn update_server(&self, server: &ServerRecord) -> Result<(), GatewayError>;

    /// Updates only the billing snapshot of a server.
    async fn refresh_billing(
        &self,
        server_id: &ServerId,
        month_credits: f64,
        month_reset_at: DateTime<Utc>,
    ) -> Result<(), GatewayError>;

    /// Loads one server.
    async fn server(&self, server_id: &ServerId) -> Result<Option<ServerRecord>, GatewayError>;
}

/// Match rows, scoreboards and league statistics.
#[async_trait]
pub trait MatchRepository: Send + Sync + fmt::Debug {
    /// Loads one match.
    async fn get_match(&self, match_ref: &MatchRef) -> Result<Option<MatchRecord>, GatewayError>;

    /// Applies a partial update and returns the updated row.
    ///
    /// A status change is validated against the stored status under the
    /// same row lock that applies it.
    ///
    /// # Errors
    ///
    /// [`GatewayError::InvalidMatchId`] for unknown matches, or the
    /// transition error from [`crate::domain::MatchStatus::check_transition`].
    async fn update_match(
        &self,
        match_ref: &MatchRef,
        update: &MatchUpdate,
    ) -> Result<MatchRecord, GatewayError>;

    /// Moves a match to `Finished`.
    ///
    /// # Errors
    ///
    /// [`GatewayError::MatchAlreadyEnded`] if it already is.
    async fn finish_match(&self, match_ref: &MatchRef) -> Result<MatchRecord, GatewayError>;

    /// Inserts the initial scoreboard rows of a new match.
    async fn insert_players(&self, rows: &[ScoreboardRow]) -> Result<(), GatewayError>;

    /// Loads every scoreboard row of a match.
    async fn players(&self, match_id: MatchId) -> Result<Vec<ScoreboardRow>, GatewayError>;

    /// Adds each delta to its player's scoreboard row under a row lock.
    async fn merge_players(
        &self,
        match_id: MatchId,
        deltas: &[PlayerDelta],
    ) -> Result<(), GatewayError>;

    /// Adds each increment to the player's league statistics under a row
    /// lock, creating missing rows.
    async fn merge_statistics(
        &self,
        league_id: &LeagueId,
        deltas: &[StatisticDelta],
    ) -> Result<(), GatewayError>;

    /// Current league ratings of the given players; players without
    /// statistics are absent from the map.
    async fn ratings(
        &self,
        league_id: &LeagueId,
        users: &[UserId],
    ) -> Result<HashMap<UserId, f64>, GatewayError>;
}

/// Read models owned by other services.
#[async_trait]
pub trait LeagueDirectory: Send + Sync + fmt::Debug {
    /// Loads a league's engine settings.
    async fn league(&self, league_id: &LeagueId) -> Result<Option<LeagueConfig>, GatewayError>;

    /// Bans that block any of `users` from playing in `league_id` at `now`.
    async fn active_bans(
        &self,
        league_id: &LeagueId,
        users: &[UserId],
        now: DateTime<Utc>,
    ) -> Result<Vec<BanRecord>, GatewayError>;

    /// Steam ids of the given players.
    async fn steam_ids(&self, users: &[UserId]) -> Result<HashMap<UserId, String>, GatewayError>;

    /// A league's subscriptions to one event.
    async fn webhooks(
        &self,
        league_id: &LeagueId,
        event: WebhookEvent,
    ) -> Result<Vec<WebhookSubscription>, GatewayError>;
}
