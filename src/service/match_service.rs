//! Match orchestration: create, update, end and read matches.
//!
//! Every mutation follows the same pattern: validate → persist →
//! schedule the webhook on the [`TaskQueue`] → return the private view.
//! Server teardown and demo capture after `end` run on the queue as well;
//! their failures are logged there and never reach the caller.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;

use super::analyzer::ReplayAnalyzer;
use super::demo_pipeline::{DemoOutcome, DemoPipeline};
use super::dispatcher::EventDispatcher;
use super::lease_manager::{Lease, LeaseManager, LeaseRequest};
use super::tasks::TaskQueue;
use crate::control::{MatchRoster, ServerHandle};
use crate::domain::rating::{combine, match_result_bonus, round_outcome, statistic_delta};
use crate::domain::{
    Counters, DemoStatus, LeagueConfig, LeagueId, MatchId, MatchRecord, MatchRef,
    MatchReservation, MatchSettings, MatchStatus, MatchUpdate, MatchView, PlayerDelta,
    RatingWeights, ResolvedMatch, Scoreboard, ScoreboardRow, StatisticDelta, Team, UserId,
    Visibility, WebhookEvent,
};
use crate::error::GatewayError;
use crate::persistence::{LeagueDirectory, MatchRepository};

/// Runs the match lifecycle.
#[derive(Debug, Clone)]
pub struct MatchService {
    leagues: Arc<dyn LeagueDirectory>,
    matches: Arc<dyn MatchRepository>,
    leases: LeaseManager,
    demos: DemoPipeline,
    dispatcher: EventDispatcher,
    analyzer: ReplayAnalyzer,
    tasks: Arc<TaskQueue>,
}

fn not_found(match_ref: &MatchRef) -> GatewayError {
    GatewayError::InvalidMatchId(*match_ref.match_id.as_uuid())
}

/// Per-player statistic increments of one update, one entry per player.
fn statistic_deltas(
    weights: &RatingWeights,
    players: &[PlayerDelta],
    update: &MatchUpdate,
) -> Vec<StatisticDelta> {
    let mut by_user: BTreeMap<UserId, StatisticDelta> = BTreeMap::new();
    for player in players {
        let outcome = round_outcome(player.team, update.team_1_score, update.team_2_score);
        let delta = statistic_delta(weights, player, outcome);
        by_user
            .entry(player.user_id)
            .and_modify(|acc| *acc = combine(acc, &delta))
            .or_insert(delta);
    }
    by_user.into_values().collect()
}

/// Won/lost bonus for every player of a finished match. Ties award nothing.
fn match_bonuses(
    weights: &RatingWeights,
    record: &MatchRecord,
    rows: &[ScoreboardRow],
) -> Vec<StatisticDelta> {
    let leader = record.leading_team();
    rows.iter()
        .map(|row| StatisticDelta {
            user_id: row.user_id,
            counters: Counters::default(),
            rating: match_result_bonus(weights, row.team, leader),
        })
        .filter(|delta| delta.rating != 0.0)
        .collect()
}

fn roster(team: &[UserId], steam_ids: &HashMap<UserId, String>) -> Vec<String> {
    team.iter()
        .filter_map(|user| {
            let steam_id = steam_ids.get(user).cloned();
            if steam_id.is_none() {
                tracing::warn!(user_id = %user, "participant has no steam id");
            }
            steam_id
        })
        .collect()
}

fn initial_rows(match_id: MatchId, resolved: &ResolvedMatch) -> Vec<ScoreboardRow> {
    let team = |players: &[UserId], team: Team, captain: UserId| {
        players
            .iter()
            .map(move |user| ScoreboardRow::initial(match_id, *user, team, *user == captain))
            .collect::<Vec<_>>()
    };
    let mut rows = team(&resolved.team_1, Team::One, resolved.captain_1);
    rows.extend(team(&resolved.team_2, Team::Two, resolved.captain_2));
    rows
}

impl MatchService {
    /// Wires the service to its collaborators.
    #[must_use]
    pub fn new(
        leagues: Arc<dyn LeagueDirectory>,
        matches: Arc<dyn MatchRepository>,
        leases: LeaseManager,
        demos: DemoPipeline,
        dispatcher: EventDispatcher,
        analyzer: ReplayAnalyzer,
        tasks: Arc<TaskQueue>,
    ) -> Self {
        Self {
            leagues,
            matches,
            leases,
            demos,
            dispatcher,
            analyzer,
            tasks,
        }
    }

    /// Creates a match on a freshly leased server.
    ///
    /// Nothing is reserved until the settings resolved and no participant
    /// is banned. Once a server is leased, a failure while preparing it
    /// releases the reservation again.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::LeagueInvalid`] for an unknown league.
    /// - Validation errors from [`LeagueConfig::validate`] and
    ///   [`MatchSettings::resolve`].
    /// - [`GatewayError::UsersBanned`] listing every blocking ban.
    /// - [`GatewayError::ServerUnavailable`] and collaborator errors from
    ///   leasing and server setup.
    pub async fn create(
        &self,
        league_id: &LeagueId,
        settings: &MatchSettings,
    ) -> Result<MatchView, GatewayError> {
        let league = self.league(league_id).await?;
        league.validate()?;

        let ratings = if settings.needs_ratings() {
            self.matches
                .ratings(league_id, &settings.participants())
                .await?
        } else {
            HashMap::new()
        };
        let resolved = settings.resolve(&ratings, &mut rand::rng())?;
        let participants: Vec<UserId> = resolved.participants().copied().collect();

        let bans = self
            .leagues
            .active_bans(league_id, &participants, Utc::now())
            .await?;
        if !bans.is_empty() {
            tracing::info!(%league_id, banned = bans.len(), "match refused");
            return Err(GatewayError::UsersBanned(bans));
        }

        let reservation = MatchReservation {
            match_id: MatchId::new(),
            league_id: league_id.clone(),
            map: resolved.map.clone(),
            team_1_name: resolved.team_1_name.clone(),
            team_2_name: resolved.team_2_name.clone(),
            timestamp: Utc::now(),
        };
        let match_ref = MatchRef::new(league_id.clone(), reservation.match_id);
        let lease = self
            .leases
            .acquire(&LeaseRequest {
                reservation,
                name: league.league_name.clone(),
                region: league.region.clone(),
                tickrate: league.tickrate,
            })
            .await?;

        if let Err(e) = self.prepare(&match_ref, &league, &resolved, &lease).await {
            tracing::error!(match_id = %match_ref.match_id, error = %e, "match setup failed");
            self.leases.release(&match_ref).await;
            return Err(e);
        }

        let board = self.board(&match_ref).await?;
        self.notify(WebhookEvent::MatchStart, &board).await;
        tracing::info!(
            match_id = %match_ref.match_id,
            %league_id,
            server_id = %lease.record.server_id,
            map = %resolved.map,
            "match created"
        );
        Ok(self.view(&board, Visibility::Private))
    }

    /// Writes the lease-time address, inserts the roster and boots the
    /// server.
    async fn prepare(
        &self,
        match_ref: &MatchRef,
        league: &LeagueConfig,
        resolved: &ResolvedMatch,
        lease: &Lease,
    ) -> Result<(), GatewayError> {
        let record = self
            .matches
            .update_match(
                match_ref,
                &MatchUpdate::address(&lease.state.raw_ip, lease.state.game_port),
            )
            .await?;
        self.matches
            .insert_players(&initial_rows(match_ref.match_id, resolved))
            .await?;

        let server = &lease.handle;
        server.start().await?;
        server.console(&format!("map {}", resolved.map)).await?;
        server
            .console(&format!("tv_snapshotrate {}", league.demo_tickrate))
            .await?;

        let participants: Vec<UserId> = resolved.participants().copied().collect();
        let steam_ids = self.leagues.steam_ids(&participants).await?;
        server
            .create_match(&MatchRoster {
                team_1: roster(&resolved.team_1, &steam_ids),
                team_2: roster(&resolved.team_2, &steam_ids),
                options: resolved.options,
            })
            .await?;

        let live = server.state().await?;
        if live.address_differs(&record.raw_ip, record.game_port) {
            self.matches
                .update_match(match_ref, &MatchUpdate::address(&live.raw_ip, live.game_port))
                .await?;
            tracing::debug!(
                match_id = %match_ref.match_id,
                ip = %live.raw_ip,
                port = live.game_port,
                "server address changed after boot"
            );
        }
        Ok(())
    }

    /// Applies a partial update and folds player deltas into the
    /// scoreboard and the league statistics.
    ///
    /// Leagues without ratings still accumulate counters; only the rating
    /// term is left out.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::InvalidMatchId`] for an unknown match.
    /// - [`GatewayError::MatchAlreadyEnded`] when leaving `Finished`.
    /// - [`GatewayError::InvalidRequest`] for a backwards status move, or
    ///   when the update tries to finish the match; that goes through
    ///   [`MatchService::end`].
    pub async fn update(
        &self,
        match_ref: &MatchRef,
        update: &MatchUpdate,
        players: &[PlayerDelta],
    ) -> Result<MatchView, GatewayError> {
        if update.status == Some(MatchStatus::Finished) {
            return Err(GatewayError::InvalidRequest(
                "a match is finished by ending it, not by updating its status".to_string(),
            ));
        }
        self.matches.update_match(match_ref, update).await?;

        if !players.is_empty() {
            self.matches
                .merge_players(match_ref.match_id, players)
                .await?;
            let league = self.league(&match_ref.league_id).await?;
            let weights = if league.use_rating {
                league.weights
            } else {
                RatingWeights::default()
            };
            let deltas = statistic_deltas(&weights, players, update);
            self.matches
                .merge_statistics(&match_ref.league_id, &deltas)
                .await?;
        }

        let board = self.board(match_ref).await?;
        self.notify(WebhookEvent::MatchUpdate, &board).await;
        tracing::debug!(match_id = %match_ref.match_id, players = players.len(), "match updated");
        Ok(self.view(&board, Visibility::Private))
    }

    /// Ends a match, then stops its server and captures the demo in the
    /// background.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::InvalidMatchId`] for an unknown match.
    /// - [`GatewayError::MatchAlreadyEnded`] if the match is finished;
    ///   nothing else happens in that case.
    /// - Control API and persistence errors raised before the match was
    ///   marked finished.
    pub async fn end(&self, match_ref: &MatchRef) -> Result<MatchView, GatewayError> {
        let record = self
            .matches
            .get_match(match_ref)
            .await?
            .ok_or_else(|| not_found(match_ref))?;
        if record.status == MatchStatus::Finished {
            return Err(GatewayError::MatchAlreadyEnded);
        }
        let league = self.league(&match_ref.league_id).await?;

        let server = self.leases.handle(record.server_id.clone());
        server.console("tv_stoprecord").await?;
        self.leases.settle(&server).await?;
        let record = self.matches.finish_match(match_ref).await?;

        if league.use_rating {
            let rows = self.matches.players(record.match_id).await?;
            let bonuses = match_bonuses(&league.weights, &record, &rows);
            if !bonuses.is_empty() {
                self.matches
                    .merge_statistics(&match_ref.league_id, &bonuses)
                    .await?;
            }
        }

        let board = self.board(match_ref).await?;
        self.notify(WebhookEvent::MatchEnd, &board).await;
        self.schedule_teardown(server, match_ref.clone(), league).await;
        tracing::info!(
            match_id = %match_ref.match_id,
            server_id = %record.server_id,
            team_1_score = record.team_1_score,
            team_2_score = record.team_2_score,
            "match ended"
        );
        Ok(self.view(&board, Visibility::Private))
    }

    /// Loads a match view.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidMatchId`] for an unknown match.
    pub async fn get(
        &self,
        match_ref: &MatchRef,
        visibility: Visibility,
    ) -> Result<MatchView, GatewayError> {
        let board = self.board(match_ref).await?;
        Ok(self.view(&board, visibility))
    }

    /// Loads a match with both teams' scoreboard rows.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidMatchId`] for an unknown match.
    pub async fn scoreboard(&self, match_ref: &MatchRef) -> Result<Scoreboard, GatewayError> {
        self.board(match_ref).await
    }

    /// Requests replay analysis of an archived demo.
    ///
    /// Returns `false` without doing anything when analysis is not enabled
    /// for the league, `true` once the demo was submitted.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::InvalidMatchId`] for an unknown match.
    /// - [`GatewayError::NoDemoToAnalyze`] unless the demo is ready.
    pub async fn analyze_demo(&self, match_ref: &MatchRef) -> Result<bool, GatewayError> {
        let record = self
            .matches
            .get_match(match_ref)
            .await?
            .ok_or_else(|| not_found(match_ref))?;
        let league = self.league(&match_ref.league_id).await?;
        if !self.analyzer.enabled_for(&league) {
            tracing::debug!(match_id = %match_ref.match_id, "replay analysis not enabled, skipped");
            return Ok(false);
        }
        let demo_url =
            (record.demo_status == DemoStatus::Ready).then(|| self.demos.demo_url(match_ref));
        self.analyzer
            .submit(record.match_id, demo_url.as_deref())
            .await?;
        Ok(true)
    }

    async fn league(&self, league_id: &LeagueId) -> Result<LeagueConfig, GatewayError> {
        self.leagues
            .league(league_id)
            .await?
            .ok_or_else(|| GatewayError::LeagueInvalid(league_id.to_string()))
    }

    async fn board(&self, match_ref: &MatchRef) -> Result<Scoreboard, GatewayError> {
        let record = self
            .matches
            .get_match(match_ref)
            .await?
            .ok_or_else(|| not_found(match_ref))?;
        let rows = self.matches.players(match_ref.match_id).await?;
        Ok(Scoreboard::from_rows(record, rows))
    }

    fn view(&self, board: &Scoreboard, visibility: Visibility) -> MatchView {
        let match_ref = MatchRef::new(board.record.league_id.clone(), board.record.match_id);
        MatchView::build(board, visibility, Some(self.demos.demo_url(&match_ref)))
    }

    /// Queues delivery of `event` with the public view as payload.
    async fn notify(&self, event: WebhookEvent, board: &Scoreboard) {
        let payload = self.view(board, Visibility::Public).to_payload();
        let dispatcher = self.dispatcher.clone();
        let league_id = board.record.league_id.clone();
        let match_id = board.record.match_id;
        let job = async move {
            dispatcher.fire(event, &league_id, match_id, payload).await;
            Ok(())
        };
        if let Err(e) = self.tasks.spawn(event.name(), job).await {
            tracing::warn!(%event, %match_id, error = %e, "event not scheduled");
        }
    }

    async fn schedule_teardown(
        &self,
        server: ServerHandle,
        match_ref: MatchRef,
        league: LeagueConfig,
    ) {
        let stop = server.clone();
        let stop_job = async move {
            stop.stop().await?;
            tracing::info!(server_id = %stop.server_id(), "server stopped");
            Ok(())
        };
        if let Err(e) = self.tasks.spawn("server.stop", stop_job).await {
            tracing::warn!(server_id = %server.server_id(), error = %e, "server stop not scheduled");
        }

        let this = self.clone();
        let match_id = match_ref.match_id;
        let capture_job = async move { this.capture(&server, &match_ref, &league).await };
        if let Err(e) = self.tasks.spawn("demo.capture", capture_job).await {
            tracing::warn!(%match_id, error = %e, "demo capture not scheduled");
        }
    }

    /// Archives the demo, then announces it and hands it to the analyzer.
    ///
    /// Runs on the task queue, so events are delivered inline.
    async fn capture(
        &self,
        server: &ServerHandle,
        match_ref: &MatchRef,
        league: &LeagueConfig,
    ) -> Result<(), GatewayError> {
        let DemoOutcome::Ready { demo_url, .. } = self.demos.upload(server, match_ref).await?
        else {
            return Ok(());
        };

        let board = self.board(match_ref).await?;
        let payload = self.view(&board, Visibility::Public).to_payload();
        self.dispatcher
            .fire(
                WebhookEvent::DemoUploaded,
                &match_ref.league_id,
                match_ref.match_id,
                payload,
            )
            .await;

        if self.analyzer.enabled_for(league) {
            self.analyzer
                .submit(match_ref.match_id, Some(&demo_url))
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::config::{AnalyzerConfig, DemoConfig, TaskConfig, WebhookConfig};
    use crate::domain::{
        BanRecord, CaptainSelection, EventBus, LifecycleEvent, MapSelection, PlayerSelection,
        RosterOptions, ServerId, ServerRecord,
    };
    use crate::persistence::MemoryStore;
    use crate::testing::{FakeControl, FakeStorage, FakeTokens, server_state};
    use chrono::Duration;
    use tokio::sync::broadcast;
    use tokio_test::{assert_err, assert_ok};

    struct Fixture {
        store: Arc<MemoryStore>,
        control: Arc<FakeControl>,
        tokens: Arc<FakeTokens>,
        storage: Arc<FakeStorage>,
        tasks: Arc<TaskQueue>,
        events: broadcast::Receiver<LifecycleEvent>,
        service: MatchService,
        users: Vec<UserId>,
        league_id: LeagueId,
    }

    fn weights() -> RatingWeights {
        RatingWeights {
            kill: 1.0,
            death: -1.0,
            headshot: 0.1,
            round_won: 1.5,
            match_won: 10.0,
            match_lost: -5.0,
            ..RatingWeights::default()
        }
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let control = Arc::new(FakeControl::default());
        let tokens = Arc::new(FakeTokens::default());
        let storage = Arc::new(FakeStorage::default());
        let tasks = Arc::new(TaskQueue::start(&TaskConfig {
            workers: 2,
            queue_capacity: 32,
        }));
        let bus = EventBus::new(32);
        let events = bus.subscribe();

        let league_id = LeagueId::new("lg1");
        store
            .insert_league(LeagueConfig {
                league_id: league_id.clone(),
                league_name: "Scrim League".to_string(),
                region: "sydney".to_string(),
                tickrate: 128,
                demo_tickrate: 64,
                use_rating: true,
                weights: weights(),
                integrations: vec![],
            })
            .await;
        let users = vec![UserId::new(), UserId::new()];
        for (i, user) in users.iter().enumerate() {
            store.insert_steam_id(*user, format!("steam-{i}")).await;
        }

        let leases = LeaseManager::new(
            Arc::clone(&store) as _,
            Arc::clone(&store) as _,
            Arc::clone(&control) as _,
            Arc::clone(&tokens) as _,
            None,
            31,
        );
        let demos = DemoPipeline::new(
            Arc::clone(&storage) as _,
            Arc::clone(&store) as _,
            DemoConfig {
                extension: ".dem".to_string(),
                compressed_extension: ".zip".to_string(),
                pathway: "demos".to_string(),
                part_size: 1024 * 1024,
                max_bytes: None,
            },
            "https://cdn.example/".to_string(),
        );
        let Ok(dispatcher) = EventDispatcher::new(
            &WebhookConfig {
                caching_url: None,
                caching_key: String::new(),
                timeout_secs: 1,
            },
            Arc::clone(&store) as _,
            bus,
        ) else {
            panic!("dispatcher should build");
        };
        let Ok(analyzer) = ReplayAnalyzer::new(&AnalyzerConfig {
            url: "http://127.0.0.1:9/v1/csgo".to_string(),
            api_key: None,
            webhook_url: String::new(),
            required: false,
            timeout_secs: 1,
        }) else {
            panic!("analyzer should build");
        };

        let service = MatchService::new(
            Arc::clone(&store) as _,
            Arc::clone(&store) as _,
            leases,
            demos,
            dispatcher,
            analyzer,
            Arc::clone(&tasks),
        );
        Fixture {
            store,
            control,
            tokens,
            storage,
            tasks,
            events,
            service,
            users,
            league_id,
        }
    }

    impl Fixture {
        async fn server(&self, id: &str, credits: f64, resets_in: Duration) {
            let now = Utc::now();
            self.store
                .insert_server(ServerRecord {
                    server_id: ServerId::new(id),
                    game_token: Some("token".to_string()),
                    game_token_id: Some("token-id".to_string()),
                    game_token_expires: now + Duration::days(3),
                    month_credits: credits,
                    month_reset_at: now + resets_in,
                })
                .await;
            self.control.add_server(server_state(id, credits)).await;
        }

        fn settings(&self) -> MatchSettings {
            let (Some(&one), Some(&two)) = (self.users.first(), self.users.get(1)) else {
                panic!("fixture has two users");
            };
            MatchSettings {
                team_1_name: "Red".to_string(),
                team_2_name: "Blue".to_string(),
                players: PlayerSelection::Given {
                    team_1: vec![one],
                    team_2: vec![two],
                },
                captains: CaptainSelection::Random,
                map: MapSelection::Given(vec!["de_dust2".to_string()]),
                options: RosterOptions::default(),
            }
        }

        fn user(&self, i: usize) -> UserId {
            let Some(user) = self.users.get(i) else {
                panic!("no user {i}");
            };
            *user
        }

        async fn create(&self) -> MatchRef {
            let view = assert_ok!(self.service.create(&self.league_id, &self.settings()).await);
            MatchRef::new(self.league_id.clone(), view.match_id)
        }

        async fn rating(&self, i: usize) -> f64 {
            self.store
                .statistic(self.user(i), &self.league_id)
                .await
                .map_or(0.0, |row| row.rating)
        }

        fn drain_events(&mut self) -> Vec<WebhookEvent> {
            let mut seen = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                seen.push(event.event);
            }
            seen
        }
    }

    fn player(user_id: UserId, team: Team, kills: i32, deaths: i32, headshots: i32) -> PlayerDelta {
        PlayerDelta {
            user_id,
            team,
            alive: true,
            ping: 30,
            counters: Counters {
                kills,
                deaths,
                headshots,
                ..Counters::default()
            },
            score: 0,
            disconnected: false,
            team_blinds: 0,
            team_kills: 0,
        }
    }

    #[tokio::test]
    async fn create_prefers_most_credits_then_next() {
        let f = fixture().await;
        f.server("A", 10.0, Duration::days(1)).await;
        f.server("B", 50.0, Duration::days(7)).await;

        let first = assert_ok!(f.service.create(&f.league_id, &f.settings()).await);
        assert_eq!(first.server_id, Some(ServerId::new("B")));
        let second = assert_ok!(f.service.create(&f.league_id, &f.settings()).await);
        assert_eq!(second.server_id, Some(ServerId::new("A")));

        let third = f.service.create(&f.league_id, &f.settings()).await;
        assert!(matches!(third, Err(GatewayError::ServerUnavailable(_))));
    }

    #[tokio::test]
    async fn banned_participant_blocks_before_leasing() {
        let f = fixture().await;
        f.server("A", 10.0, Duration::days(1)).await;
        f.store
            .insert_ban(BanRecord {
                ban_id: uuid::Uuid::new_v4(),
                user_id: f.user(1),
                league_id: LeagueId::new("elsewhere"),
                global: true,
                reason: "smurfing".to_string(),
                timestamp: Utc::now(),
                expires: None,
                revoked: false,
                exceptions: vec![],
            })
            .await;

        let err = assert_err!(f.service.create(&f.league_id, &f.settings()).await);
        let GatewayError::UsersBanned(bans) = err else {
            panic!("expected a ban error");
        };
        assert_eq!(bans.len(), 1);
        assert!(f.control.calls.all().await.is_empty());
        assert!(f.tokens.calls.all().await.is_empty());
        assert_eq!(f.store.active_matches_on(&ServerId::new("A")).await, 0);
    }

    #[tokio::test]
    async fn create_boots_server_and_reconciles_address() {
        let mut f = fixture().await;
        f.server("A", 10.0, Duration::days(1)).await;
        *f.control.boot_address.lock().await = Some(("192.0.2.9".to_string(), 27020));

        let match_ref = f.create().await;
        let view = assert_ok!(f.service.get(&match_ref, Visibility::Public).await);
        assert_eq!(view.connect.ip_port, "192.0.2.9:27020");
        assert!(view.server_id.is_none());

        assert_eq!(
            *f.control.console.lock().await,
            vec!["map de_dust2".to_string(), "tv_snapshotrate 64".to_string()]
        );
        let rosters = f.control.rosters.lock().await.clone();
        let Some(roster) = rosters.first() else {
            panic!("roster should be configured");
        };
        assert_eq!(roster.team_1, vec!["steam-0".to_string()]);
        assert_eq!(roster.team_2, vec!["steam-1".to_string()]);

        let board = assert_ok!(f.service.scoreboard(&match_ref).await);
        assert!(board.captain(Team::One).is_some());
        assert!(board.captain(Team::Two).is_some());
        assert_eq!(board.record.status, MatchStatus::Processing);

        f.tasks.shutdown().await;
        assert_eq!(f.drain_events(), vec![WebhookEvent::MatchStart]);
    }

    #[tokio::test]
    async fn update_folds_round_win_into_rating() {
        let f = fixture().await;
        f.server("A", 10.0, Duration::days(1)).await;
        let match_ref = f.create().await;

        let update = MatchUpdate {
            status: Some(MatchStatus::Live),
            team_1_score: Some(9),
            team_2_score: Some(4),
            ..MatchUpdate::default()
        };
        let players = [player(f.user(0), Team::One, 5, 2, 1)];
        let view = assert_ok!(f.service.update(&match_ref, &update, &players).await);
        assert_eq!(view.status, MatchStatus::Live.code());
        assert_eq!(view.team_1.score, 9);

        assert!((f.rating(0).await - 4.6).abs() < 1e-9);
        assert!(f.rating(1).await.abs() < 1e-9);

        let board = assert_ok!(f.service.scoreboard(&match_ref).await);
        let Some(row) = board.players().find(|r| r.user_id == f.user(0)) else {
            panic!("player row should exist");
        };
        assert_eq!(row.counters.kills, 5);
        assert_eq!(row.ping, 30);
    }

    #[tokio::test]
    async fn repeated_player_deltas_add_up() {
        let f = fixture().await;
        f.server("A", 10.0, Duration::days(1)).await;
        let match_ref = f.create().await;

        let first = [player(f.user(1), Team::Two, 1, 0, 0)];
        let second = [player(f.user(1), Team::Two, 2, 1, 0)];
        assert_ok!(
            f.service
                .update(&match_ref, &MatchUpdate::default(), &first)
                .await
        );
        assert_ok!(
            f.service
                .update(&match_ref, &MatchUpdate::default(), &second)
                .await
        );

        let board = assert_ok!(f.service.scoreboard(&match_ref).await);
        let Some(row) = board.players().find(|r| r.user_id == f.user(1)) else {
            panic!("player row should exist");
        };
        assert_eq!(row.counters.kills, 3);
        assert_eq!(row.counters.deaths, 1);
        assert!((f.rating(1).await - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn update_rejects_backwards_status() {
        let f = fixture().await;
        f.server("A", 10.0, Duration::days(1)).await;
        let match_ref = f.create().await;
        assert_ok!(
            f.service
                .update(&match_ref, &MatchUpdate::status(MatchStatus::Live), &[])
                .await
        );
        let result = f
            .service
            .update(&match_ref, &MatchUpdate::status(MatchStatus::Processing), &[])
            .await;
        assert!(matches!(result, Err(GatewayError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn end_awards_match_bonus_and_tears_down() {
        let mut f = fixture().await;
        f.server("A", 10.0, Duration::days(1)).await;
        let match_ref = f.create().await;
        let update = MatchUpdate {
            team_1_score: Some(16),
            team_2_score: Some(10),
            ..MatchUpdate::default()
        };
        assert_ok!(f.service.update(&match_ref, &update, &[]).await);

        let view = assert_ok!(f.service.end(&match_ref).await);
        assert_eq!(view.status, MatchStatus::Finished.code());
        assert!((f.rating(0).await - 10.0).abs() < 1e-9);
        assert!((f.rating(1).await + 5.0).abs() < 1e-9);
        assert_eq!(f.store.active_matches_on(&ServerId::new("A")).await, 0);

        f.tasks.shutdown().await;
        assert_eq!(f.control.calls.count("stop").await, 1);
        assert!(
            f.control
                .console
                .lock()
                .await
                .contains(&"tv_stoprecord".to_string())
        );
        // No recording was produced on the fake server.
        let Ok(Some(record)) = f.store.get_match(&match_ref).await else {
            panic!("match should exist");
        };
        assert_eq!(record.demo_status, DemoStatus::Expired);
        assert_eq!(f.storage.calls.count("cancel").await, 1);

        let events = f.drain_events();
        assert!(events.contains(&WebhookEvent::MatchEnd));
        assert!(!events.contains(&WebhookEvent::DemoUploaded));
    }

    #[tokio::test]
    async fn end_archives_demo_and_announces_it() {
        let mut f = fixture().await;
        f.server("A", 10.0, Duration::days(1)).await;
        let match_ref = f.create().await;
        f.control
            .add_file(
                &format!("{}.dem", match_ref.match_id),
                b"recorded ticks".to_vec(),
            )
            .await;

        assert_ok!(f.service.end(&match_ref).await);
        f.tasks.shutdown().await;

        let view = assert_ok!(f.service.get(&match_ref, Visibility::Public).await);
        assert_eq!(view.demo.status, DemoStatus::Ready.code());
        assert_eq!(
            view.demo.url,
            Some(format!(
                "https://cdn.example/demos/{}.zip",
                match_ref.match_id
            ))
        );
        assert!(f.drain_events().contains(&WebhookEvent::DemoUploaded));
    }

    #[tokio::test]
    async fn ending_twice_has_no_side_effects() {
        let f = fixture().await;
        f.server("A", 10.0, Duration::days(1)).await;
        let match_ref = f.create().await;
        assert_ok!(f.service.end(&match_ref).await);
        f.tasks.shutdown().await;
        let calls = f.control.calls.all().await;
        let rating = f.rating(0).await;

        let result = f.service.end(&match_ref).await;
        assert!(matches!(result, Err(GatewayError::MatchAlreadyEnded)));
        assert_eq!(f.control.calls.all().await.len(), calls.len());
        assert!((f.rating(0).await - rating).abs() < 1e-9);
    }

    #[tokio::test]
    async fn unknown_match_and_league() {
        let f = fixture().await;
        let missing = MatchRef::new(f.league_id.clone(), MatchId::new());
        assert!(matches!(
            f.service.end(&missing).await,
            Err(GatewayError::InvalidMatchId(_))
        ));
        assert!(matches!(
            f.service.get(&missing, Visibility::Private).await,
            Err(GatewayError::InvalidMatchId(_))
        ));
        assert!(matches!(
            f.service
                .create(&LeagueId::new("nope"), &f.settings())
                .await,
            Err(GatewayError::LeagueInvalid(_))
        ));
    }

    #[tokio::test]
    async fn analysis_is_skipped_without_integration() {
        let f = fixture().await;
        f.server("A", 10.0, Duration::days(1)).await;
        let match_ref = f.create().await;
        let submitted = assert_ok!(f.service.analyze_demo(&match_ref).await);
        assert!(!submitted);
    }

    #[tokio::test]
    async fn status_update_cannot_finish_a_match() {
        let mut f = fixture().await;
        f.server("A", 10.0, Duration::days(1)).await;
        let match_ref = f.create().await;
        f.control
            .add_file(&format!("{}.dem", match_ref.match_id), b"ticks".to_vec())
            .await;
        assert_ok!(
            f.service
                .update(&match_ref, &MatchUpdate::status(MatchStatus::Live), &[])
                .await
        );

        let result = f
            .service
            .update(&match_ref, &MatchUpdate::status(MatchStatus::Finished), &[])
            .await;
        assert!(matches!(result, Err(GatewayError::InvalidRequest(_))));
        assert_eq!(f.store.active_matches_on(&ServerId::new("A")).await, 1);

        // The regular end path still runs in full afterwards.
        assert_ok!(f.service.end(&match_ref).await);
        f.tasks.shutdown().await;
        assert_eq!(f.control.calls.count("stop").await, 1);
        assert!(
            f.control
                .console
                .lock()
                .await
                .contains(&"tv_stoprecord".to_string())
        );
        let Ok(Some(record)) = f.store.get_match(&match_ref).await else {
            panic!("match should exist");
        };
        assert_eq!(record.demo_status, DemoStatus::Ready);
        assert!(f.drain_events().contains(&WebhookEvent::MatchEnd));
    }

    #[tokio::test]
    async fn unrated_league_still_counts_statistics() {
        let f = fixture().await;
        f.store
            .insert_league(LeagueConfig {
                league_id: f.league_id.clone(),
                league_name: "Casual League".to_string(),
                region: "sydney".to_string(),
                tickrate: 128,
                demo_tickrate: 64,
                use_rating: false,
                weights: weights(),
                integrations: vec![],
            })
            .await;
        f.server("A", 10.0, Duration::days(1)).await;
        let match_ref = f.create().await;

        let update = MatchUpdate {
            team_1_score: Some(3),
            team_2_score: Some(1),
            ..MatchUpdate::default()
        };
        let players = [player(f.user(0), Team::One, 4, 1, 2)];
        assert_ok!(f.service.update(&match_ref, &update, &players).await);

        let Some(row) = f.store.statistic(f.user(0), &f.league_id).await else {
            panic!("statistics should be recorded");
        };
        assert_eq!(row.counters.kills, 4);
        assert_eq!(row.counters.headshots, 2);
        assert!(row.rating.abs() < 1e-9);
    }

    #[tokio::test]
    async fn concurrent_creates_never_share_a_server() {
        let f = fixture().await;
        for id in ["A", "B", "C"] {
            f.server(id, 10.0, Duration::days(1)).await;
        }

        let attempts = (0..8).map(|_| {
            let service = f.service.clone();
            let league_id = f.league_id.clone();
            let settings = f.settings();
            tokio::spawn(async move { service.create(&league_id, &settings).await })
        });
        let results = futures_util::future::join_all(attempts).await;

        let mut servers = Vec::new();
        let mut unavailable = 0;
        for result in results {
            match result {
                Ok(Ok(view)) => servers.extend(view.server_id),
                Ok(Err(GatewayError::ServerUnavailable(_))) => unavailable += 1,
                Ok(Err(e)) => panic!("unexpected error: {e}"),
                Err(e) => panic!("task failed: {e}"),
            }
        }
        servers.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        servers.dedup();
        assert_eq!(servers.len(), 3);
        assert_eq!(unavailable, 5);
    }
}
