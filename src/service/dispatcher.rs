//! Webhook delivery for lifecycle events.
//!
//! Every fired event goes to:
//!
//! 1. the global caching endpoint, when configured, with the shared key as
//!    basic-auth password, a `CachingWebhook: true` header and the body
//!    extended by `__event_id` and `league_id`;
//! 2. every subscription the league holds for that event, with the
//!    subscription secret as basic-auth password;
//! 3. the in-process [`EventBus`].
//!
//! Deliveries are independent; a failing endpoint is logged and skipped.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;

use crate::config::WebhookConfig;
use crate::domain::{EventBus, LeagueId, LifecycleEvent, MatchId, WebhookEvent};
use crate::error::GatewayError;
use crate::persistence::LeagueDirectory;

/// Delivers lifecycle events to webhook subscribers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    http: reqwest::Client,
    caching_url: Option<String>,
    caching_key: String,
    leagues: Arc<dyn LeagueDirectory>,
    event_bus: EventBus,
}

/// Adds the fields only the caching endpoint receives.
fn caching_body(event: WebhookEvent, league_id: &LeagueId, payload: &Value) -> Value {
    let mut body = match payload {
        Value::Object(map) => map.clone(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("data".to_string(), other.clone());
            map
        }
    };
    body.insert("__event_id".to_string(), Value::from(event.id()));
    body.insert(
        "league_id".to_string(),
        Value::from(league_id.as_str().to_string()),
    );
    Value::Object(body)
}

impl EventDispatcher {
    /// Builds a dispatcher.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Internal`] if the HTTP client cannot be built.
    pub fn new(
        config: &WebhookConfig,
        leagues: Arc<dyn LeagueDirectory>,
        event_bus: EventBus,
    ) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        Ok(Self {
            http,
            caching_url: config.caching_url.clone(),
            caching_key: config.caching_key.clone(),
            leagues,
            event_bus,
        })
    }

    /// The bus events are published on.
    #[must_use]
    pub const fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Delivers `event` and returns how many endpoints accepted it.
    pub async fn fire(
        &self,
        event: WebhookEvent,
        league_id: &LeagueId,
        match_id: MatchId,
        payload: Value,
    ) -> usize {
        let mut delivered = 0;

        if let Some(url) = &self.caching_url {
            let body = caching_body(event, league_id, &payload);
            let request = self
                .http
                .post(url)
                .basic_auth("", Some(&self.caching_key))
                .header("CachingWebhook", "true")
                .json(&body);
            if self.deliver(event, url, request).await {
                delivered += 1;
            }
        }

        match self.leagues.webhooks(league_id, event).await {
            Ok(subscriptions) => {
                for sub in subscriptions {
                    let request = self
                        .http
                        .post(&sub.url)
                        .basic_auth("", Some(&sub.secret))
                        .json(&payload);
                    if self.deliver(event, &sub.url, request).await {
                        delivered += 1;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(%event, %league_id, error = %e, "could not load webhook subscriptions");
            }
        }

        let receivers = self.event_bus.publish(LifecycleEvent {
            event,
            league_id: league_id.clone(),
            match_id,
            payload,
            timestamp: Utc::now(),
        });
        tracing::debug!(%event, %match_id, delivered, receivers, "event fired");
        delivered
    }

    async fn deliver(&self, event: WebhookEvent, url: &str, request: reqwest::RequestBuilder) -> bool {
        match request.send().await.and_then(reqwest::Response::error_for_status) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(%event, url, error = %e, "webhook delivery failed");
                false
            }
        }
    }
}
