//! Domain layer: match, server and league types, the statistics
//! aggregator, views and the in-process event bus.

pub mod ban;
pub mod event;
pub mod event_bus;
pub mod ids;
pub mod league;
pub mod match_record;
pub mod rating;
pub mod scoreboard;
pub mod server;
pub mod settings;
pub mod view;

pub use ban::BanRecord;
pub use event::{LifecycleEvent, WebhookEvent, WebhookSubscription};
pub use event_bus::EventBus;
pub use ids::{LeagueId, MatchId, ServerId, UserId};
pub use league::{ANALYZER_INTEGRATION, LeagueConfig, RatingWeights};
pub use match_record::{
    DemoStatus, MatchRecord, MatchRef, MatchReservation, MatchStatus, MatchUpdate, Team, TeamSide,
};
pub use scoreboard::{Counters, PlayerDelta, Scoreboard, ScoreboardRow, StatisticDelta, StatisticRow};
pub use server::{ServerRecord, ServerSettings, ServerState};
pub use settings::{
    CaptainSelection, MapSelection, MatchSettings, PlayerSelection, ResolvedMatch, RosterOptions,
};
pub use view::{MatchView, Visibility};
