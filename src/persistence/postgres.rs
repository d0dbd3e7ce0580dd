//! PostgreSQL implementation of the persistence layer.
//!
//! Reservation relies on two guards: `FOR UPDATE SKIP LOCKED` keeps
//! concurrent transactions from picking the same candidate server, and the
//! partial unique index `scoreboard_total_active_server` rejects a second
//! unfinished match on a server if two transactions still collide. A
//! rejected insert is retried against the next candidate.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::models::{
    BAN_COLUMNS, BanRow, LEAGUE_COLUMNS, LeagueRow, MATCH_COLUMNS, MatchRow, SCOREBOARD_COLUMNS,
    SERVER_COLUMNS, STATISTIC_COLUMNS, ScoreboardDbRow, ServerRow, StatisticDbRow, ban_from_row,
    league_from_row, match_from_row, scoreboard_from_row, server_from_row, statistic_from_row,
    user_uuids,
};
use super::{LeagueDirectory, MatchRepository, ServerDirectory};
use crate::domain::rating::{merge_scoreboard, merge_statistic};
use crate::domain::{
    BanRecord, LeagueConfig, LeagueId, MatchId, MatchRecord, MatchRef, MatchReservation,
    MatchStatus, MatchUpdate, PlayerDelta, ScoreboardRow, ServerId, ServerRecord, StatisticDelta,
    UserId, WebhookEvent, WebhookSubscription,
};
use crate::error::GatewayError;

/// How many candidate servers a reservation tries before giving up.
const RESERVE_ATTEMPTS: usize = 3;

/// PostgreSQL-backed store using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

async fn insert_match(conn: &mut PgConnection, record: &MatchRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO scoreboard_total (match_id, league_id, server_id, raw_ip, game_port, status, \
         demo_status, map, team_1_name, team_2_name, team_1_score, team_2_score, team_1_side, \
         team_2_side, timestamp, archive_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
    )
    .bind(record.match_id.as_uuid())
    .bind(record.league_id.as_str())
    .bind(record.server_id.as_str())
    .bind(&record.raw_ip)
    .bind(i32::from(record.game_port))
    .bind(record.status.code())
    .bind(record.demo_status.code())
    .bind(&record.map)
    .bind(&record.team_1_name)
    .bind(&record.team_2_name)
    .bind(record.team_1_score)
    .bind(record.team_2_score)
    .bind(record.team_1_side.code())
    .bind(record.team_2_side.code())
    .bind(record.timestamp)
    .bind(&record.archive_id)
    .execute(conn)
    .await?;
    Ok(())
}

async fn lock_match(
    conn: &mut PgConnection,
    match_ref: &MatchRef,
) -> Result<MatchRecord, GatewayError> {
    let row = sqlx::query_as::<_, MatchRow>(&format!(
        "SELECT {MATCH_COLUMNS} FROM scoreboard_total \
         WHERE league_id = $1 AND match_id = $2 FOR UPDATE"
    ))
    .bind(match_ref.league_id.as_str())
    .bind(match_ref.match_id.as_uuid())
    .fetch_optional(conn)
    .await
    .map_err(|e| GatewayError::PersistenceError(e.to_string()))?
    .ok_or(GatewayError::InvalidMatchId(*match_ref.match_id.as_uuid()))?;
    match_from_row(row)
}

async fn write_match(conn: &mut PgConnection, record: &MatchRecord) -> Result<(), GatewayError> {
    sqlx::query(
        "UPDATE scoreboard_total SET server_id = $3, raw_ip = $4, game_port = $5, status = $6, \
         demo_status = $7, map = $8, team_1_name = $9, team_2_name = $10, team_1_score = $11, \
         team_2_score = $12, team_1_side = $13, team_2_side = $14, timestamp = $15, \
         archive_id = $16 \
         WHERE league_id = $1 AND match_id = $2",
    )
    .bind(record.league_id.as_str())
    .bind(record.match_id.as_uuid())
    .bind(record.server_id.as_str())
    .bind(&record.raw_ip)
    .bind(i32::from(record.game_port))
    .bind(record.status.code())
    .bind(record.demo_status.code())
    .bind(&record.map)
    .bind(&record.team_1_name)
    .bind(&record.team_2_name)
    .bind(record.team_1_score)
    .bind(record.team_2_score)
    .bind(record.team_1_side.code())
    .bind(record.team_2_side.code())
    .bind(record.timestamp)
    .bind(&record.archive_id)
    .execute(conn)
    .await
    .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;
    Ok(())
}

impl PostgresStore {
    /// Creates a new store with the given connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies pending migrations from `migrations/`.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError::PersistenceError`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), GatewayError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| GatewayError::PersistenceError(e.to_string()))
    }

    /// One reservation attempt. `Ok(None)` means no idle server exists.
    async fn try_reserve(
        &self,
        reservation: &MatchReservation,
    ) -> Result<Option<ServerRecord>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let candidate = sqlx::query_as::<_, ServerRow>(&format!(
            "SELECT {SERVER_COLUMNS} FROM server s \
             WHERE NOT EXISTS (SELECT 1 FROM scoreboard_total t \
                               WHERE t.server_id = s.server_id AND t.status <> $1) \
             ORDER BY month_credits DESC, month_reset_at ASC \
             LIMIT 1 FOR UPDATE SKIP LOCKED"
        ))
        .bind(MatchStatus::Finished.code())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = candidate else {
            tx.rollback().await?;
            return Ok(None);
        };
        let server = server_from_row(row);
        let record = MatchRecord::reserved(reservation, server.server_id.clone());
        insert_match(&mut *tx, &record).await?;
        tx.commit().await?;
        Ok(Some(server))
    }

    async fn merge_player(
        conn: &mut PgConnection,
        match_id: MatchId,
        delta: &PlayerDelta,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO scoreboard (match_id, user_id, team) VALUES ($1, $2, $3) \
             ON CONFLICT (match_id, user_id) DO NOTHING",
        )
        .bind(match_id.as_uuid())
        .bind(delta.user_id.as_uuid())
        .bind(delta.team.code())
        .execute(&mut *conn)
        .await?;

        let row = sqlx::query_as::<_, ScoreboardDbRow>(&format!(
            "SELECT {SCOREBOARD_COLUMNS} FROM scoreboard \
             WHERE match_id = $1 AND user_id = $2 FOR UPDATE"
        ))
        .bind(match_id.as_uuid())
        .bind(delta.user_id.as_uuid())
        .fetch_one(&mut *conn)
        .await?;
        let current = scoreboard_from_row(row).map_err(|e| sqlx::Error::Decode(e.into()))?;
        let merged = merge_scoreboard(&current, delta);
        let c = merged.counters;

        sqlx::query(
            "UPDATE scoreboard SET team = $3, alive = $4, ping = $5, kills = $6, headshots = $7, \
             assists = $8, deaths = $9, shots_fired = $10, shots_hit = $11, mvps = $12, \
             score = $13, disconnected = $14 \
             WHERE match_id = $1 AND user_id = $2",
        )
        .bind(match_id.as_uuid())
        .bind(delta.user_id.as_uuid())
        .bind(merged.team.code())
        .bind(merged.alive)
        .bind(merged.ping)
        .bind(c.kills)
        .bind(c.headshots)
        .bind(c.assists)
        .bind(c.deaths)
        .bind(c.shots_fired)
        .bind(c.shots_hit)
        .bind(c.mvps)
        .bind(merged.score)
        .bind(merged.disconnected)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn merge_statistic_row(
        conn: &mut PgConnection,
        league_id: &LeagueId,
        delta: &StatisticDelta,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO statistic (user_id, league_id) VALUES ($1, $2) \
             ON CONFLICT (user_id, league_id) DO NOTHING",
        )
        .bind(delta.user_id.as_uuid())
        .bind(league_id.as_str())
        .execute(&mut *conn)
        .await?;

        let row = sqlx::query_as::<_, StatisticDbRow>(&format!(
            "SELECT {STATISTIC_COLUMNS} FROM statistic \
             WHERE user_id = $1 AND league_id = $2 FOR UPDATE"
        ))
        .bind(delta.user_id.as_uuid())
        .bind(league_id.as_str())
        .fetch_one(&mut *conn)
        .await?;
        let merged = merge_statistic(&statistic_from_row(row), delta);
        let c = merged.counters;

        sqlx::query(
            "UPDATE statistic SET kills = $3, headshots = $4, assists = $5, deaths = $6, \
             shots_fired = $7, shots_hit = $8, mvps = $9, rating = $10 \
             WHERE user_id = $1 AND league_id = $2",
        )
        .bind(delta.user_id.as_uuid())
        .bind(league_id.as_str())
        .bind(c.kills)
        .bind(c.headshots)
        .bind(c.assists)
        .bind(c.deaths)
        .bind(c.shots_fired)
        .bind(c.shots_hit)
        .bind(c.mvps)
        .bind(merged.rating)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ServerDirectory for PostgresStore {
    async fn reserve_idle(
        &self,
        reservation: &MatchReservation,
    ) -> Result<Option<ServerRecord>, GatewayError> {
        for attempt in 1..=RESERVE_ATTEMPTS {
            match self.try_reserve(reservation).await {
                Ok(found) => return Ok(found),
                Err(e) if is_unique_violation(&e) => {
                    tracing::debug!(attempt, match_id = %reservation.match_id, "reservation raced, retrying");
                }
                Err(e) => return Err(GatewayError::PersistenceError(e.to_string())),
            }
        }
        tracing::warn!(match_id = %reservation.match_id, "reservation kept racing, giving up");
        Err(GatewayError::ServerUnavailable(
            "servers are being reserved concurrently, retry shortly".to_string(),
        ))
    }

    async fn insert_reserved(
        &self,
        server: &ServerRecord,
        reservation: &MatchReservation,
    ) -> Result<(), GatewayError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;
        sqlx::query(
            "INSERT INTO server (server_id, game_token, game_token_id, game_token_expires, \
             month_credits, month_reset_at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(server.server_id.as_str())
        .bind(&server.game_token)
        .bind(&server.game_token_id)
        .bind(server.game_token_expires)
        .bind(server.month_credits)
        .bind(server.month_reset_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;

        let record = MatchRecord::reserved(reservation, server.server_id.clone());
        insert_match(&mut *tx, &record)
            .await
            .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;
        tx.commit()
            .await
            .map_err(|e| GatewayError::PersistenceError(e.to_string()))
    }

    async fn update_server(&self, server: &ServerRecord) -> Result<(), GatewayError> {
        sqlx::query(
            "UPDATE server SET game_token = $2, game_token_id = $3, game_token_expires = $4, \
             month_credits = $5, month_reset_at = $6 WHERE server_id = $1",
        )
        .bind(server.server_id.as_str())
        .bind(&server.game_token)
        .bind(&server.game_token_id)
        .bind(server.game_token_expires)
        .bind(server.month_credits)
        .bind(server.month_reset_at)
        .execute(&self.pool)
        .await
        .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;
        Ok(())
    }

    async fn refresh_billing(
        &self,
        server_id: &ServerId,
        month_credits: f64,
        month_reset_at: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        sqlx::query("UPDATE server SET month_credits = $2, month_reset_at = $3 WHERE server_id = $1")
            .bind(server_id.as_str())
            .bind(month_credits)
            .bind(month_reset_at)
            .execute(&self.pool)
            .await
            .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;
        Ok(())
    }

    async fn server(&self, server_id: &ServerId) -> Result<Option<ServerRecord>, GatewayError> {
        let row = sqlx::query_as::<_, ServerRow>(&format!(
            "SELECT {SERVER_COLUMNS} FROM server WHERE server_id = $1"
        ))
        .bind(server_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;
        Ok(row.map(server_from_row))
    }
}

#[async_trait]
impl MatchRepository for PostgresStore {
    async fn get_match(&self, match_ref: &MatchRef) -> Result<Option<MatchRecord>, GatewayError> {
        let row = sqlx::query_as::<_, MatchRow>(&format!(
            "SELECT {MATCH_COLUMNS} FROM scoreboard_total WHERE league_id = $1 AND match_id = $2"
        ))
        .bind(match_ref.league_id.as_str())
        .bind(match_ref.match_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;
        row.map(match_from_row).transpose()
    }

    async fn update_match(
        &self,
        match_ref: &MatchRef,
        update: &MatchUpdate,
    ) -> Result<MatchRecord, GatewayError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;
        let mut record = lock_match(&mut *tx, match_ref).await?;
        if let Some(next) = update.status {
            record.status.check_transition(next)?;
        }
        record.apply(update);
        write_match(&mut *tx, &record).await?;
        tx.commit()
            .await
            .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;
        Ok(record)
    }

    async fn finish_match(&self, match_ref: &MatchRef) -> Result<MatchRecord, GatewayError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;
        let mut record = lock_match(&mut *tx, match_ref).await?;
        if record.status == MatchStatus::Finished {
            return Err(GatewayError::MatchAlreadyEnded);
        }
        record.status = MatchStatus::Finished;
        write_match(&mut *tx, &record).await?;
        tx.commit()
            .await
            .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;
        Ok(record)
    }

    async fn insert_players(&self, rows: &[ScoreboardRow]) -> Result<(), GatewayError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;
        for row in rows {
            sqlx::query(
                "INSERT INTO scoreboard (match_id, user_id, team, captain, alive) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(row.match_id.as_uuid())
            .bind(row.user_id.as_uuid())
            .bind(row.team.code())
            .bind(row.captain)
            .bind(row.alive)
            .execute(&mut *tx)
            .await
            .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;
        }
        tx.commit()
            .await
            .map_err(|e| GatewayError::PersistenceError(e.to_string()))
    }

    async fn players(&self, match_id: MatchId) -> Result<Vec<ScoreboardRow>, GatewayError> {
        let rows = sqlx::query_as::<_, ScoreboardDbRow>(&format!(
            "SELECT {SCOREBOARD_COLUMNS} FROM scoreboard WHERE match_id = $1 \
             ORDER BY team ASC, captain DESC, user_id ASC"
        ))
        .bind(match_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;
        rows.into_iter().map(scoreboard_from_row).collect()
    }

    async fn merge_players(
        &self,
        match_id: MatchId,
        deltas: &[PlayerDelta],
    ) -> Result<(), GatewayError> {
        // Lock rows in a stable order so concurrent merges cannot deadlock.
        let mut ordered: Vec<&PlayerDelta> = deltas.iter().collect();
        ordered.sort_by_key(|d| d.user_id);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;
        for delta in ordered {
            Self::merge_player(&mut *tx, match_id, delta)
                .await
                .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;
        }
        tx.commit()
            .await
            .map_err(|e| GatewayError::PersistenceError(e.to_string()))
    }

    async fn merge_statistics(
        &self,
        league_id: &LeagueId,
        deltas: &[StatisticDelta],
    ) -> Result<(), GatewayError> {
        let mut ordered: Vec<&StatisticDelta> = deltas.iter().collect();
        ordered.sort_by_key(|d| d.user_id);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;
        for delta in ordered {
            Self::merge_statistic_row(&mut *tx, league_id, delta)
                .await
                .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;
        }
        tx.commit()
            .await
            .map_err(|e| GatewayError::PersistenceError(e.to_string()))
    }

    async fn ratings(
        &self,
        league_id: &LeagueId,
        users: &[UserId],
    ) -> Result<HashMap<UserId, f64>, GatewayError> {
        let rows = sqlx::query_as::<_, (Uuid, f64)>(
            "SELECT user_id, rating FROM statistic WHERE league_id = $1 AND user_id = ANY($2)",
        )
        .bind(league_id.as_str())
        .bind(user_uuids(users))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|(user_id, rating)| (UserId::from_uuid(user_id), rating))
            .collect())
    }
}

#[async_trait]
impl LeagueDirectory for PostgresStore {
    async fn league(&self, league_id: &LeagueId) -> Result<Option<LeagueConfig>, GatewayError> {
        let row = sqlx::query_as::<_, LeagueRow>(&format!(
            "SELECT {LEAGUE_COLUMNS} FROM league WHERE league_id = $1"
        ))
        .bind(league_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;
        row.map(league_from_row).transpose()
    }

    async fn active_bans(
        &self,
        league_id: &LeagueId,
        users: &[UserId],
        now: DateTime<Utc>,
    ) -> Result<Vec<BanRecord>, GatewayError> {
        let rows = sqlx::query_as::<_, BanRow>(&format!(
            "SELECT {BAN_COLUMNS} FROM ban \
             WHERE user_id = ANY($1) AND revoked = FALSE \
               AND (expires IS NULL OR expires > $2) \
               AND (global OR league_id = $3)"
        ))
        .bind(user_uuids(users))
        .bind(now)
        .bind(league_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(ban_from_row)
            .filter(|ban| ban.blocks(league_id, now))
            .collect())
    }

    async fn steam_ids(&self, users: &[UserId]) -> Result<HashMap<UserId, String>, GatewayError> {
        let rows = sqlx::query_as::<_, (Uuid, String)>(
            "SELECT user_id, steam_id FROM users WHERE user_id = ANY($1)",
        )
        .bind(user_uuids(users))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|(user_id, steam_id)| (UserId::from_uuid(user_id), steam_id))
            .collect())
    }

    async fn webhooks(
        &self,
        league_id: &LeagueId,
        event: WebhookEvent,
    ) -> Result<Vec<WebhookSubscription>, GatewayError> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT url, secret FROM webhook WHERE league_id = $1 AND event = $2",
        )
        .bind(league_id.as_str())
        .bind(event.name())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|(url, secret)| WebhookSubscription {
                event,
                league_id: league_id.clone(),
                url,
                secret,
            })
            .collect())
    }
}
