//! In-process store with per-match fine-grained locking.
//!
//! [`MemoryStore`] keeps every table in a `HashMap` behind a
//! [`tokio::sync::RwLock`]. Match rows are additionally wrapped in their own
//! `Arc<RwLock<_>>` so updates to different matches proceed concurrently.
//!
//! # Concurrency
//!
//! - Reservation holds the server and match maps for writing while it picks
//!   a server, so two reservations never see the same server as idle.
//! - Writes to the same match are serialized on its entry lock.
//! - Lock order is servers, then matches, then a match entry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{LeagueDirectory, MatchRepository, ServerDirectory};
use crate::domain::rating::{merge_scoreboard, merge_statistic};
use crate::domain::{
    BanRecord, LeagueConfig, LeagueId, MatchId, MatchRecord, MatchRef, MatchReservation,
    MatchStatus, MatchUpdate, PlayerDelta, ScoreboardRow, ServerId, ServerRecord, StatisticDelta,
    StatisticRow, UserId, WebhookEvent, WebhookSubscription,
};
use crate::error::GatewayError;

type MatchEntry = Arc<RwLock<MatchRecord>>;

/// Store used by tests and persistence-disabled deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    servers: RwLock<HashMap<ServerId, ServerRecord>>,
    matches: RwLock<HashMap<MatchRef, MatchEntry>>,
    scoreboards: RwLock<HashMap<MatchId, HashMap<UserId, ScoreboardRow>>>,
    statistics: RwLock<HashMap<(UserId, LeagueId), StatisticRow>>,
    leagues: RwLock<HashMap<LeagueId, LeagueConfig>>,
    bans: RwLock<Vec<BanRecord>>,
    steam_ids: RwLock<HashMap<UserId, String>>,
    webhooks: RwLock<Vec<WebhookSubscription>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a server.
    pub async fn insert_server(&self, server: ServerRecord) {
        self.servers
            .write()
            .await
            .insert(server.server_id.clone(), server);
    }

    /// Adds or replaces a league.
    pub async fn insert_league(&self, league: LeagueConfig) {
        self.leagues
            .write()
            .await
            .insert(league.league_id.clone(), league);
    }

    /// Adds a ban.
    pub async fn insert_ban(&self, ban: BanRecord) {
        self.bans.write().await.push(ban);
    }

    /// Links a player to a Steam id.
    pub async fn insert_steam_id(&self, user_id: UserId, steam_id: impl Into<String>) {
        self.steam_ids.write().await.insert(user_id, steam_id.into());
    }

    /// Adds a webhook subscription.
    pub async fn insert_webhook(&self, subscription: WebhookSubscription) {
        self.webhooks.write().await.push(subscription);
    }

    /// Adds or replaces a statistic row.
    pub async fn insert_statistic(&self, row: StatisticRow) {
        self.statistics
            .write()
            .await
            .insert((row.user_id, row.league_id.clone()), row);
    }

    /// Returns a player's league statistics.
    pub async fn statistic(&self, user_id: UserId, league_id: &LeagueId) -> Option<StatisticRow> {
        self.statistics
            .read()
            .await
            .get(&(user_id, league_id.clone()))
            .cloned()
    }

    /// Number of unfinished matches referencing `server_id`.
    pub async fn active_matches_on(&self, server_id: &ServerId) -> usize {
        let map = self.matches.read().await;
        let mut count = 0;
        for entry in map.values() {
            let record = entry.read().await;
            if &record.server_id == server_id && record.status != MatchStatus::Finished {
                count += 1;
            }
        }
        count
    }

    async fn entry(&self, match_ref: &MatchRef) -> Result<MatchEntry, GatewayError> {
        let map = self.matches.read().await;
        map.get(match_ref)
            .map(Arc::clone)
            .ok_or(GatewayError::InvalidMatchId(*match_ref.match_id.as_uuid()))
    }

    fn insert_match(
        map: &mut HashMap<MatchRef, MatchEntry>,
        reservation: &MatchReservation,
        server_id: ServerId,
    ) -> Result<(), GatewayError> {
        let key = MatchRef::new(reservation.league_id.clone(), reservation.match_id);
        if map.contains_key(&key) {
            return Err(GatewayError::PersistenceError(format!(
                "match {} already exists",
                reservation.match_id
            )));
        }
        let record = MatchRecord::reserved(reservation, server_id);
        map.insert(key, Arc::new(RwLock::new(record)));
        Ok(())
    }
}

#[async_trait]
impl ServerDirectory for MemoryStore {
    async fn reserve_idle(
        &self,
        reservation: &MatchReservation,
    ) -> Result<Option<ServerRecord>, GatewayError> {
        let servers = self.servers.read().await;
        let mut matches = self.matches.write().await;

        let mut busy = Vec::new();
        for entry in matches.values() {
            let record = entry.read().await;
            if record.status != MatchStatus::Finished {
                busy.push(record.server_id.clone());
            }
        }

        let chosen = servers
            .values()
            .filter(|s| !busy.contains(&s.server_id))
            .max_by(|a, b| {
                a.month_credits
                    .total_cmp(&b.month_credits)
                    .then_with(|| b.month_reset_at.cmp(&a.month_reset_at))
                    .then_with(|| b.server_id.as_str().cmp(a.server_id.as_str()))
            })
            .cloned();

        if let Some(server) = &chosen {
            Self::insert_match(&mut matches, reservation, server.server_id.clone())?;
        }
        Ok(chosen)
    }

    async fn insert_reserved(
        &self,
        server: &ServerRecord,
        reservation: &MatchReservation,
    ) -> Result<(), GatewayError> {
        let mut servers = self.servers.write().await;
        let mut matches = self.matches.write().await;
        if servers.contains_key(&server.server_id) {
            return Err(GatewayError::PersistenceError(format!(
                "server {} already exists",
                server.server_id
            )));
        }
        Self::insert_match(&mut matches, reservation, server.server_id.clone())?;
        servers.insert(server.server_id.clone(), server.clone());
        Ok(())
    }

    async fn update_server(&self, server: &ServerRecord) -> Result<(), GatewayError> {
        let mut servers = self.servers.write().await;
        let slot = servers.get_mut(&server.server_id).ok_or_else(|| {
            GatewayError::PersistenceError(format!("server {} not found", server.server_id))
        })?;
        *slot = server.clone();
        Ok(())
    }

    async fn refresh_billing(
        &self,
        server_id: &ServerId,
        month_credits: f64,
        month_reset_at: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        let mut servers = self.servers.write().await;
        if let Some(server) = servers.get_mut(server_id) {
            server.month_credits = month_credits;
            server.month_reset_at = month_reset_at;
        }
        Ok(())
    }

    async fn server(&self, server_id: &ServerId) -> Result<Option<ServerRecord>, GatewayError> {
        Ok(self.servers.read().await.get(server_id).cloned())
    }
}

#[async_trait]
impl MatchRepository for MemoryStore {
    async fn get_match(&self, match_ref: &MatchRef) -> Result<Option<MatchRecord>, GatewayError> {
        let entry = self.matches.read().await.get(match_ref).map(Arc::clone);
        match entry {
            Some(entry) => Ok(Some(entry.read().await.clone())),
            None => Ok(None),
        }
    }

    async fn update_match(
        &self,
        match_ref: &MatchRef,
        update: &MatchUpdate,
    ) -> Result<MatchRecord, GatewayError> {
        let entry = self.entry(match_ref).await?;
        let mut record = entry.write().await;
        if let Some(next) = update.status {
            record.status.check_transition(next)?;
        }
        record.apply(update);
        Ok(record.clone())
    }

    async fn finish_match(&self, match_ref: &MatchRef) -> Result<MatchRecord, GatewayError> {
        let entry = self.entry(match_ref).await?;
        let mut record = entry.write().await;
        if record.status == MatchStatus::Finished {
            return Err(GatewayError::MatchAlreadyEnded);
        }
        record.status = MatchStatus::Finished;
        Ok(record.clone())
    }

    async fn insert_players(&self, rows: &[ScoreboardRow]) -> Result<(), GatewayError> {
        let mut boards = self.scoreboards.write().await;
        for row in rows {
            boards
                .entry(row.match_id)
                .or_default()
                .insert(row.user_id, row.clone());
        }
        Ok(())
    }

    async fn players(&self, match_id: MatchId) -> Result<Vec<ScoreboardRow>, GatewayError> {
        let boards = self.scoreboards.read().await;
        let mut rows: Vec<ScoreboardRow> = boards
            .get(&match_id)
            .map(|board| board.values().cloned().collect())
            .unwrap_or_default();
        rows.sort_by(|a, b| {
            a.team
                .code()
                .cmp(&b.team.code())
                .then_with(|| b.captain.cmp(&a.captain))
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        Ok(rows)
    }

    async fn merge_players(
        &self,
        match_id: MatchId,
        deltas: &[PlayerDelta],
    ) -> Result<(), GatewayError> {
        let mut boards = self.scoreboards.write().await;
        let board = boards.entry(match_id).or_default();
        for delta in deltas {
            let current = board.get(&delta.user_id).cloned().unwrap_or_else(|| {
                ScoreboardRow::initial(match_id, delta.user_id, delta.team, false)
            });
            board.insert(delta.user_id, merge_scoreboard(&current, delta));
        }
        Ok(())
    }

    async fn merge_statistics(
        &self,
        league_id: &LeagueId,
        deltas: &[StatisticDelta],
    ) -> Result<(), GatewayError> {
        let mut stats = self.statistics.write().await;
        for delta in deltas {
            let key = (delta.user_id, league_id.clone());
            let current = stats
                .get(&key)
                .cloned()
                .unwrap_or_else(|| StatisticRow::empty(delta.user_id, league_id.clone()));
            stats.insert(key, merge_statistic(&current, delta));
        }
        Ok(())
    }

    async fn ratings(
        &self,
        league_id: &LeagueId,
        users: &[UserId],
    ) -> Result<HashMap<UserId, f64>, GatewayError> {
        let stats = self.statistics.read().await;
        Ok(users
            .iter()
            .filter_map(|user| {
                stats
                    .get(&(*user, league_id.clone()))
                    .map(|row| (*user, row.rating))
            })
            .collect())
    }
}

#[async_trait]
impl LeagueDirectory for MemoryStore {
    async fn league(&self, league_id: &LeagueId) -> Result<Option<LeagueConfig>, GatewayError> {
        Ok(self.leagues.read().await.get(league_id).cloned())
    }

    async fn active_bans(
        &self,
        league_id: &LeagueId,
        users: &[UserId],
        now: DateTime<Utc>,
    ) -> Result<Vec<BanRecord>, GatewayError> {
        Ok(self
            .bans
            .read()
            .await
            .iter()
            .filter(|ban| users.contains(&ban.user_id) && ban.blocks(league_id, now))
            .cloned()
            .collect())
    }

    async fn steam_ids(&self, users: &[UserId]) -> Result<HashMap<UserId, String>, GatewayError> {
        let ids = self.steam_ids.read().await;
        Ok(users
            .iter()
            .filter_map(|user| ids.get(user).map(|id| (*user, id.clone())))
            .collect())
    }

    async fn webhooks(
        &self,
        league_id: &LeagueId,
        event: WebhookEvent,
    ) -> Result<Vec<WebhookSubscription>, GatewayError> {
        Ok(self
            .webhooks
            .read()
            .await
            .iter()
            .filter(|s| &s.league_id == league_id && s.event == event)
            .cloned()
            .collect())
    }
}
