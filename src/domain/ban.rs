//! Ban records checked before a match reserves a server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{LeagueId, UserId};

/// A ban issued against a player.
///
/// Bans are managed outside the engine; `create` only reads them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BanRecord {
    /// Ban identifier.
    pub ban_id: uuid::Uuid,
    /// Banned player.
    pub user_id: UserId,
    /// League that issued the ban.
    pub league_id: LeagueId,
    /// Whether the ban applies to every league.
    pub global: bool,
    /// Reason shown to the player.
    pub reason: String,
    /// When the ban was issued.
    pub timestamp: DateTime<Utc>,
    /// When the ban lapses; `None` for permanent bans.
    pub expires: Option<DateTime<Utc>>,
    /// Whether the ban was revoked.
    pub revoked: bool,
    /// Leagues exempted from a global ban.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exceptions: Vec<LeagueId>,
}

impl BanRecord {
    /// Returns `true` if the ban blocks the player from a match in `league`
    /// at `now`.
    #[must_use]
    pub fn blocks(&self, league: &LeagueId, now: DateTime<Utc>) -> bool {
        if self.revoked {
            return false;
        }
        if self.expires.is_some_and(|expires| expires <= now) {
            return false;
        }
        if !self.global && &self.league_id != league {
            return false;
        }
        !self.exceptions.contains(league)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ban(global: bool) -> BanRecord {
        BanRecord {
            ban_id: uuid::Uuid::new_v4(),
            user_id: UserId::new(),
            league_id: LeagueId::new("home"),
            global,
            reason: "griefing".to_string(),
            timestamp: Utc::now(),
            expires: None,
            revoked: false,
            exceptions: vec![],
        }
    }

    #[test]
    fn permanent_ban_blocks_issuing_league() {
        assert!(ban(false).blocks(&LeagueId::new("home"), Utc::now()));
        assert!(!ban(false).blocks(&LeagueId::new("other"), Utc::now()));
    }

    #[test]
    fn expired_and_revoked_bans_do_not_block() {
        let now = Utc::now();
        let mut expired = ban(true);
        expired.expires = Some(now - Duration::minutes(1));
        assert!(!expired.blocks(&LeagueId::new("home"), now));

        let mut revoked = ban(true);
        revoked.revoked = true;
        assert!(!revoked.blocks(&LeagueId::new("home"), now));

        let mut future = ban(true);
        future.expires = Some(now + Duration::days(1));
        assert!(future.blocks(&LeagueId::new("home"), now));
    }

    #[test]
    fn global_ban_respects_exceptions() {
        let mut b = ban(true);
        b.exceptions.push(LeagueId::new("friendly"));
        assert!(b.blocks(&LeagueId::new("other"), Utc::now()));
        assert!(!b.blocks(&LeagueId::new("friendly"), Utc::now()));
    }
}
