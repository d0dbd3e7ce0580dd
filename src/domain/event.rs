//! Lifecycle events emitted by the match engine.
//!
//! Every event is delivered to webhook subscribers by the dispatcher and
//! published in-process on the [`super::EventBus`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{LeagueId, MatchId};

/// Kind of lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WebhookEvent {
    /// A match finished.
    #[serde(rename = "match.end")]
    MatchEnd,
    /// A match was created and its server started.
    #[serde(rename = "match.start")]
    MatchStart,
    /// A match's scoreboard changed.
    #[serde(rename = "match.update")]
    MatchUpdate,
    /// A match demo was archived.
    #[serde(rename = "demo.uploaded")]
    DemoUploaded,
}

impl WebhookEvent {
    /// Every event kind.
    pub const ALL: [Self; 4] = [
        Self::MatchEnd,
        Self::MatchStart,
        Self::MatchUpdate,
        Self::DemoUploaded,
    ];

    /// Numeric id sent to the caching endpoint as `__event_id`.
    #[must_use]
    pub const fn id(self) -> u32 {
        match self {
            Self::MatchEnd => 141_201,
            Self::MatchStart => 141_202,
            Self::MatchUpdate => 141_203,
            Self::DemoUploaded => 141_204,
        }
    }

    /// Dotted event name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::MatchEnd => "match.end",
            Self::MatchStart => "match.start",
            Self::MatchUpdate => "match.update",
            Self::DemoUploaded => "demo.uploaded",
        }
    }

    /// Looks up an event by its numeric id.
    #[must_use]
    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.id() == id)
    }
}

impl fmt::Display for WebhookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A league's subscription to one event kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookSubscription {
    /// Subscribed event.
    pub event: WebhookEvent,
    /// Subscribing league.
    pub league_id: LeagueId,
    /// Delivery URL.
    pub url: String,
    /// Basic-auth password sent with every delivery.
    pub secret: String,
}

/// Event published on the in-process bus after a delivery was scheduled.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleEvent {
    /// Event kind.
    pub event: WebhookEvent,
    /// League the match belongs to.
    pub league_id: LeagueId,
    /// Affected match.
    pub match_id: MatchId,
    /// Public view of the match at the time of the event.
    pub payload: serde_json::Value,
    /// When the event was fired.
    pub timestamp: DateTime<Utc>,
}
