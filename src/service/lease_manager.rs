//! Server leasing: reserve an idle server or provision a new one.
//!
//! The reservation itself happens in the [`ServerDirectory`]; this module
//! brings the reserved server up to date before the match uses it.

use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::control::{GameServerControl, ServerHandle, TokenIssuer};
use crate::domain::{
    MatchRef, MatchReservation, ServerId, ServerRecord, ServerSettings, ServerState,
};
use crate::error::GatewayError;
use crate::persistence::{MatchRepository, ServerDirectory};

/// What a match needs from its server.
#[derive(Debug, Clone)]
pub struct LeaseRequest {
    /// Match row to insert together with the reservation.
    pub reservation: MatchReservation,
    /// Server display name.
    pub name: String,
    /// Provider region.
    pub region: String,
    /// Game tickrate.
    pub tickrate: u16,
}

/// A server reserved for one match.
#[derive(Debug, Clone)]
pub struct Lease {
    /// Directory entry after token and billing refresh.
    pub record: ServerRecord,
    /// Live state read while leasing.
    pub state: ServerState,
    /// Control handle bound to the server.
    pub handle: ServerHandle,
}

/// Hands out servers to matches.
#[derive(Debug, Clone)]
pub struct LeaseManager {
    servers: Arc<dyn ServerDirectory>,
    matches: Arc<dyn MatchRepository>,
    control: Arc<dyn GameServerControl>,
    tokens: Arc<dyn TokenIssuer>,
    template: Option<ServerId>,
    token_lifetime: Duration,
}

impl LeaseManager {
    /// Creates a lease manager. Without a `template` no servers can be
    /// provisioned once the fleet is busy.
    #[must_use]
    pub fn new(
        servers: Arc<dyn ServerDirectory>,
        matches: Arc<dyn MatchRepository>,
        control: Arc<dyn GameServerControl>,
        tokens: Arc<dyn TokenIssuer>,
        template: Option<ServerId>,
        token_lifetime_days: i64,
    ) -> Self {
        Self {
            servers,
            matches,
            control,
            tokens,
            template,
            token_lifetime: Duration::days(token_lifetime_days),
        }
    }

    /// Binds `server_id` to the control API.
    #[must_use]
    pub fn handle(&self, server_id: ServerId) -> ServerHandle {
        ServerHandle::new(server_id, Arc::clone(&self.control))
    }

    /// Reserves a server for `request.reservation` and prepares it.
    ///
    /// If preparing the server fails after the reservation was committed,
    /// the reservation is finished again so the server returns to the
    /// idle pool.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::ServerUnavailable`] when every server is busy and
    ///   no template is configured.
    /// - [`GatewayError::ControlApi`] for control or token API failures.
    /// - [`GatewayError::PersistenceError`] for directory failures.
    pub async fn acquire(&self, request: &LeaseRequest) -> Result<Lease, GatewayError> {
        let reservation = &request.reservation;
        let match_ref = MatchRef::new(reservation.league_id.clone(), reservation.match_id);
        let (record, state, token) = match self.servers.reserve_idle(reservation).await? {
            Some(record) => match self.refresh(record).await {
                Ok(prepared) => prepared,
                Err(e) => {
                    self.release(&match_ref).await;
                    return Err(e);
                }
            },
            None => self.provision(reservation).await?,
        };

        let handle = self.handle(record.server_id.clone());
        let settings = ServerSettings {
            name: request.name.clone(),
            region: request.region.clone(),
            game_token: token,
            tickrate: request.tickrate,
        };
        if let Err(e) = handle.update_settings(&settings).await {
            self.release(&match_ref).await;
            return Err(e.into());
        }

        tracing::info!(
            server_id = %record.server_id,
            match_id = %reservation.match_id,
            credits = record.month_credits,
            "server leased"
        );
        Ok(Lease {
            record,
            state,
            handle,
        })
    }

    /// Finishes a reservation whose match never started.
    pub async fn release(&self, match_ref: &MatchRef) {
        if let Err(e) = self.matches.finish_match(match_ref).await {
            tracing::warn!(match_id = %match_ref.match_id, error = %e, "could not release reservation");
        }
    }

    /// Copies the server's live billing snapshot into the directory.
    ///
    /// # Errors
    ///
    /// Propagates control API and directory failures.
    pub async fn settle(&self, handle: &ServerHandle) -> Result<ServerState, GatewayError> {
        let state = handle.state().await?;
        self.servers
            .refresh_billing(handle.server_id(), state.month_credits, state.month_reset_at)
            .await?;
        Ok(state)
    }

    /// Rotates an expired token and refreshes stale billing fields.
    async fn refresh(
        &self,
        mut record: ServerRecord,
    ) -> Result<(ServerRecord, ServerState, Option<String>), GatewayError> {
        let state = self.control.get(&record.server_id).await?;
        let now = Utc::now();
        let mut changed = false;

        let mut fresh_token = None;
        if record.token_expired(now) {
            if let Some(old) = &record.game_token_id {
                self.tokens.revoke(old).await?;
                tracing::debug!(server_id = %record.server_id, token_id = %old, "game token revoked");
            }
            let issued = self.tokens.issue(record.server_id.as_str()).await?;
            record.game_token = Some(issued.token.clone());
            record.game_token_id = Some(issued.token_id);
            record.game_token_expires = now + self.token_lifetime;
            fresh_token = Some(issued.token);
            changed = true;
        }

        if record.billing_rolled_over(now) {
            record.month_credits = state.month_credits;
            record.month_reset_at = state.month_reset_at;
            changed = true;
        }

        if changed {
            self.servers.update_server(&record).await?;
        }
        Ok((record, state, fresh_token))
    }

    /// Clones the template server and reserves the copy.
    async fn provision(
        &self,
        reservation: &MatchReservation,
    ) -> Result<(ServerRecord, ServerState, Option<String>), GatewayError> {
        let Some(template) = &self.template else {
            return Err(GatewayError::ServerUnavailable(
                "every server is busy and no template is configured".to_string(),
            ));
        };
        let state = self.control.duplicate(template).await?;
        let issued = self.tokens.issue(state.server_id.as_str()).await?;

        let record = ServerRecord {
            server_id: state.server_id.clone(),
            game_token: Some(issued.token.clone()),
            game_token_id: Some(issued.token_id),
            game_token_expires: Utc::now() + self.token_lifetime,
            month_credits: state.month_credits,
            month_reset_at: state.month_reset_at,
        };
        self.servers.insert_reserved(&record, reservation).await?;
        tracing::info!(server_id = %record.server_id, template = %template, "server provisioned");
        Ok((record, state, Some(issued.token)))
    }
}
