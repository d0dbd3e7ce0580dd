//! Application context shared by all Axum handlers.
//!
//! [`AppState::build`] is the only place collaborators are constructed;
//! everything downstream receives its dependencies explicitly.

use std::sync::Arc;

use crate::config::GatewayConfig;
use crate::control::{DathostClient, SteamTokenIssuer};
use crate::domain::{EventBus, ServerId};
use crate::error::GatewayError;
use crate::persistence::{
    LeagueDirectory, MatchRepository, MemoryStore, PostgresStore, ServerDirectory,
};
use crate::service::{
    DemoPipeline, EventDispatcher, LeaseManager, MatchService, ReplayAnalyzer, TaskQueue,
};
use crate::storage::B2Client;

/// Storage backends the engine runs against.
#[derive(Debug, Clone)]
pub struct Stores {
    /// Server directory.
    pub servers: Arc<dyn ServerDirectory>,
    /// Matches, scoreboards and statistics.
    pub matches: Arc<dyn MatchRepository>,
    /// Leagues, bans and webhook subscriptions.
    pub leagues: Arc<dyn LeagueDirectory>,
}

impl Stores {
    /// Every table served from one in-memory store.
    #[must_use]
    pub fn memory(store: &Arc<MemoryStore>) -> Self {
        Self {
            servers: Arc::clone(store) as Arc<dyn ServerDirectory>,
            matches: Arc::clone(store) as Arc<dyn MatchRepository>,
            leagues: Arc::clone(store) as Arc<dyn LeagueDirectory>,
        }
    }

    /// Every table served from PostgreSQL.
    #[must_use]
    pub fn postgres(store: &Arc<PostgresStore>) -> Self {
        Self {
            servers: Arc::clone(store) as Arc<dyn ServerDirectory>,
            matches: Arc::clone(store) as Arc<dyn MatchRepository>,
            leagues: Arc::clone(store) as Arc<dyn LeagueDirectory>,
        }
    }
}

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Match lifecycle operations.
    pub matches: Arc<MatchService>,
    /// Background queue, exposed for health reporting.
    pub tasks: Arc<TaskQueue>,
    /// In-process lifecycle events.
    pub event_bus: EventBus,
}

impl AppState {
    /// Builds every collaborator from configuration.
    ///
    /// No network calls are made here; the HTTP clients connect lazily.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] if an HTTP client cannot be built.
    pub fn build(
        config: &GatewayConfig,
        stores: Stores,
        tasks: Arc<TaskQueue>,
    ) -> Result<Self, GatewayError> {
        let control = Arc::new(DathostClient::new(&config.control)?);
        let tokens = Arc::new(SteamTokenIssuer::new(&config.steam)?);
        let storage = Arc::new(B2Client::new(&config.storage)?);
        let event_bus = EventBus::new(config.event_bus_capacity);

        let leases = LeaseManager::new(
            Arc::clone(&stores.servers),
            Arc::clone(&stores.matches),
            control,
            tokens,
            config
                .control
                .template_server_id
                .as_deref()
                .map(ServerId::new),
            config.steam.token_lifetime_days,
        );
        let demos = DemoPipeline::new(
            storage,
            Arc::clone(&stores.matches),
            config.demo.clone(),
            config.storage.cdn_url.clone(),
        );
        let dispatcher = EventDispatcher::new(
            &config.webhooks,
            Arc::clone(&stores.leagues),
            event_bus.clone(),
        )?;
        let analyzer = ReplayAnalyzer::new(&config.analyzer)?;

        let matches = Arc::new(MatchService::new(
            stores.leagues,
            stores.matches,
            leases,
            demos,
            dispatcher,
            analyzer,
            Arc::clone(&tasks),
        ));
        Ok(Self {
            matches,
            tasks,
            event_bus,
        })
    }
}
