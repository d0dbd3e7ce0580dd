//! Rented game-server records and live server state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ServerId;

/// Directory entry for a rented server instance.
///
/// Owned by the server directory and mutated only by the lease manager
/// (token rotation, billing refresh). Rows are never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRecord {
    /// Provider server id.
    pub server_id: ServerId,
    /// Current game login token, if one has been issued.
    pub game_token: Option<String>,
    /// Provider id of the current game token, used to revoke it.
    pub game_token_id: Option<String>,
    /// When the current game token stops being valid.
    pub game_token_expires: DateTime<Utc>,
    /// Remaining credits in the current billing cycle.
    pub month_credits: f64,
    /// When the billing cycle rolls over.
    pub month_reset_at: DateTime<Utc>,
}

impl ServerRecord {
    /// Returns `true` when the game token is no longer valid at `now`.
    #[must_use]
    pub fn token_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.game_token_expires
    }

    /// Returns `true` when the cached billing fields are stale at `now`.
    #[must_use]
    pub fn billing_rolled_over(&self, now: DateTime<Utc>) -> bool {
        now >= self.month_reset_at
    }
}

/// Live state of a server as reported by the control API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerState {
    /// Provider server id.
    pub server_id: ServerId,
    /// Public IPv4 address players connect to.
    pub raw_ip: String,
    /// Game port players connect to.
    pub game_port: u16,
    /// Remaining credits in the current billing cycle.
    pub month_credits: f64,
    /// When the billing cycle rolls over.
    pub month_reset_at: DateTime<Utc>,
}

impl ServerState {
    /// Returns `true` when the connect address differs from the given one.
    #[must_use]
    pub fn address_differs(&self, raw_ip: &str, game_port: u16) -> bool {
        self.raw_ip != raw_ip || self.game_port != game_port
    }
}

/// Configuration pushed to a server before it hosts a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Display name, usually the league name.
    pub name: String,
    /// Provider region code.
    pub region: String,
    /// Freshly issued game token, `None` to keep the current one.
    pub game_token: Option<String>,
    /// Game simulation tickrate.
    pub tickrate: u16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(expires_in: Duration, resets_in: Duration) -> ServerRecord {
        let now = Utc::now();
        ServerRecord {
            server_id: ServerId::new("srv-1"),
            game_token: Some("token".to_string()),
            game_token_id: Some("token-id".to_string()),
            game_token_expires: now + expires_in,
            month_credits: 10.0,
            month_reset_at: now + resets_in,
        }
    }

    #[test]
    fn token_expiry_is_inclusive() {
        let rec = record(Duration::zero(), Duration::days(1));
        assert!(rec.token_expired(rec.game_token_expires));
        assert!(!rec.token_expired(rec.game_token_expires - Duration::seconds(1)));
    }

    #[test]
    fn billing_rollover_detected() {
        let rec = record(Duration::days(1), Duration::hours(-1));
        assert!(rec.billing_rolled_over(Utc::now()));
    }

    #[test]
    fn address_comparison() {
        let state = ServerState {
            server_id: ServerId::new("srv-1"),
            raw_ip: "10.0.0.1".to_string(),
            game_port: 27015,
            month_credits: 1.0,
            month_reset_at: Utc::now(),
        };
        assert!(!state.address_differs("10.0.0.1", 27015));
        assert!(state.address_differs("10.0.0.1", 27016));
        assert!(state.address_differs("10.0.0.2", 27015));
    }
}
