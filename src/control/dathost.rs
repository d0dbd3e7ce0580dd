//! HTTP client for the Dathost game-server API.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use serde::Deserialize;

use super::{ByteStream, ControlError, GameServerControl, MatchRoster};
use crate::config::ControlApiConfig;
use crate::domain::{ServerId, ServerSettings, ServerState};

/// Server model as returned by the provider.
#[derive(Debug, Deserialize)]
struct ServerPayload {
    id: String,
    #[serde(default)]
    raw_ip: String,
    ports: PortsPayload,
    #[serde(default)]
    month_credits: f64,
    #[serde(default)]
    month_reset_at: i64,
}

#[derive(Debug, Deserialize)]
struct PortsPayload {
    #[serde(default)]
    game: u16,
}

impl From<ServerPayload> for ServerState {
    fn from(p: ServerPayload) -> Self {
        Self {
            server_id: ServerId::new(p.id),
            raw_ip: p.raw_ip,
            game_port: p.ports.game,
            month_credits: p.month_credits,
            month_reset_at: DateTime::<Utc>::from_timestamp(p.month_reset_at, 0)
                .unwrap_or_default(),
        }
    }
}

/// Dathost REST client authenticated with account email and password.
#[derive(Debug, Clone)]
pub struct DathostClient {
    http: reqwest::Client,
    base_url: String,
    email: String,
    password: String,
}

impl DathostClient {
    /// Builds a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Http`] if the HTTP client cannot be built.
    pub fn new(config: &ControlApiConfig) -> Result<Self, ControlError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            email: config.email.clone(),
            password: config.password.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn server_url(&self, server_id: &ServerId, suffix: &str) -> String {
        self.url(&format!("/game-servers/{server_id}{suffix}"))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, ControlError> {
        let resp = request
            .basic_auth(&self.email, Some(&self.password))
            .send()
            .await?;
        check_status(resp).await
    }
}

/// Maps non-success statuses to [`ControlError`].
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ControlError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let url = resp.url().path().to_string();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ControlError::NotFound(url));
    }
    let message = resp
        .text()
        .await
        .unwrap_or_else(|_| status.canonical_reason().unwrap_or("unknown").to_string());
    Err(ControlError::Api {
        status: status.as_u16(),
        message,
    })
}

/// Form fields for a settings update.
fn settings_form(settings: &ServerSettings) -> Vec<(&'static str, String)> {
    let mut form = vec![
        ("name", settings.name.clone()),
        ("location", settings.region.clone()),
        ("csgo_settings.tickrate", settings.tickrate.to_string()),
    ];
    if let Some(token) = &settings.game_token {
        form.push(("csgo_settings.steam_game_server_login_token", token.clone()));
    }
    form
}

/// Form fields for a match setup.
fn roster_form(server_id: &ServerId, roster: &MatchRoster) -> Vec<(&'static str, String)> {
    vec![
        ("game_server_id", server_id.to_string()),
        ("team1_steam_ids", roster.team_1.join(",")),
        ("team2_steam_ids", roster.team_2.join(",")),
        (
            "connection_time",
            roster.options.connection_time.to_string(),
        ),
        ("enable_knife_round", roster.options.knife_round.to_string()),
        (
            "wait_for_spectators",
            roster.options.wait_for_spectators.to_string(),
        ),
        ("warmup_time", roster.options.warmup_time.to_string()),
    ]
}

#[async_trait]
impl GameServerControl for DathostClient {
    async fn get(&self, server_id: &ServerId) -> Result<ServerState, ControlError> {
        let resp = self.send(self.http.get(self.server_url(server_id, ""))).await?;
        let payload: ServerPayload = resp.json().await?;
        Ok(payload.into())
    }

    async fn update_settings(
        &self,
        server_id: &ServerId,
        settings: &ServerSettings,
    ) -> Result<(), ControlError> {
        let request = self
            .http
            .put(self.server_url(server_id, ""))
            .form(&settings_form(settings));
        self.send(request).await?;
        Ok(())
    }

    async fn duplicate(&self, template: &ServerId) -> Result<ServerState, ControlError> {
        let request = self.http.post(self.server_url(template, "/duplicate"));
        let payload: ServerPayload = self.send(request).await?.json().await?;
        tracing::info!(template = %template, server_id = %payload.id, "duplicated template server");
        Ok(payload.into())
    }

    async fn start(&self, server_id: &ServerId) -> Result<(), ControlError> {
        self.send(self.http.post(self.server_url(server_id, "/start")))
            .await?;
        Ok(())
    }

    async fn stop(&self, server_id: &ServerId) -> Result<(), ControlError> {
        self.send(self.http.post(self.server_url(server_id, "/stop")))
            .await?;
        Ok(())
    }

    async fn console(&self, server_id: &ServerId, line: &str) -> Result<(), ControlError> {
        let request = self
            .http
            .post(self.server_url(server_id, "/console"))
            .form(&[("line", line)]);
        self.send(request).await?;
        Ok(())
    }

    async fn create_match(
        &self,
        server_id: &ServerId,
        roster: &MatchRoster,
    ) -> Result<(), ControlError> {
        let request = self
            .http
            .post(self.url("/matches"))
            .form(&roster_form(server_id, roster));
        self.send(request).await?;
        Ok(())
    }

    async fn download(&self, server_id: &ServerId, path: &str) -> Result<ByteStream, ControlError> {
        let url = self.server_url(server_id, &format!("/files/{}", path.trim_start_matches('/')));
        let resp = self.send(self.http.get(url)).await?;
        Ok(Box::pin(resp.bytes_stream().map_err(ControlError::from)))
    }
}
