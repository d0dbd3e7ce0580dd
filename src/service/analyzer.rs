//! Replay analysis requests.

use std::time::Duration;

use crate::config::AnalyzerConfig;
use crate::domain::{ANALYZER_INTEGRATION, LeagueConfig, MatchId};
use crate::error::GatewayError;

/// Client for the replay analysis service.
///
/// Disabled when no API key is configured.
#[derive(Debug, Clone)]
pub struct ReplayAnalyzer {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
    webhook_url: String,
    required: bool,
}

impl ReplayAnalyzer {
    /// Builds a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Internal`] if the HTTP client cannot be built.
    pub fn new(config: &AnalyzerConfig) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        Ok(Self {
            http,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            webhook_url: config.webhook_url.clone(),
            required: config.required,
        })
    }

    /// Whether demos of `league` should be analyzed.
    #[must_use]
    pub fn enabled_for(&self, league: &LeagueConfig) -> bool {
        self.api_key.is_some() && (self.required || league.has_integration(ANALYZER_INTEGRATION))
    }

    /// Submits a demo for analysis.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::NoDemoToAnalyze`] when `demo_url` is `None`.
    /// - [`GatewayError::Internal`] if the request fails.
    pub async fn submit(
        &self,
        match_id: MatchId,
        demo_url: Option<&str>,
    ) -> Result<(), GatewayError> {
        let Some(api_key) = &self.api_key else {
            return Ok(());
        };
        let demo_url = demo_url.ok_or(GatewayError::NoDemoToAnalyze)?;
        let match_id = match_id.to_string();

        self.http
            .post(&self.url)
            .bearer_auth(api_key)
            .form(&[
                ("matchId", match_id.as_str()),
                ("demoUrl", demo_url),
                ("webhookUrl", self.webhook_url.as_str()),
            ])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| GatewayError::Internal(format!("replay analysis request failed: {e}")))?;
        tracing::info!(%match_id, "demo submitted for analysis");
        Ok(())
    }
}
