//! Game login tokens issued through the Steam Web API.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::ControlError;
use crate::config::SteamConfig;

/// A freshly issued game login token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    /// Token the game server logs in with.
    pub token: String,
    /// Provider id of the token, needed to revoke it.
    pub token_id: String,
}

/// Issues and revokes game login tokens.
#[async_trait]
pub trait TokenIssuer: Send + Sync + fmt::Debug {
    /// Issues a new token labelled with `memo`.
    async fn issue(&self, memo: &str) -> Result<IssuedToken, ControlError>;

    /// Revokes the token with the given id.
    async fn revoke(&self, token_id: &str) -> Result<(), ControlError>;
}

#[derive(Debug, Deserialize)]
struct CreateAccountEnvelope {
    response: CreateAccountResponse,
}

#[derive(Debug, Deserialize)]
struct CreateAccountResponse {
    login_token: String,
    steamid: String,
}

/// [`TokenIssuer`] backed by `IGameServersService`.
#[derive(Debug, Clone)]
pub struct SteamTokenIssuer {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    app_id: u32,
}

impl SteamTokenIssuer {
    /// Builds an issuer from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Http`] if the HTTP client cannot be built.
    pub fn new(config: &SteamConfig) -> Result<Self, ControlError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            app_id: config.app_id,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/IGameServersService/{method}/v1/", self.api_url)
    }
}

#[async_trait]
impl TokenIssuer for SteamTokenIssuer {
    async fn issue(&self, memo: &str) -> Result<IssuedToken, ControlError> {
        let app_id = self.app_id.to_string();
        let resp = self
            .http
            .post(self.method_url("CreateAccount"))
            .query(&[("key", self.api_key.as_str()), ("appid", &app_id), ("memo", memo)])
            .send()
            .await?
            .error_for_status()?;
        let envelope: CreateAccountEnvelope = resp.json().await?;
        Ok(IssuedToken {
            token: envelope.response.login_token,
            token_id: envelope.response.steamid,
        })
    }

    async fn revoke(&self, token_id: &str) -> Result<(), ControlError> {
        self.http
            .post(self.method_url("DeleteAccount"))
            .query(&[("key", self.api_key.as_str()), ("steamid", token_id)])
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
