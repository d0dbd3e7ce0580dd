//! Game-server control API.
//!
//! [`GameServerControl`] is the seam between the engine and the hosting
//! provider. [`dathost::DathostClient`] talks to the provider over HTTP;
//! tests substitute in-memory fakes. [`ServerHandle`] binds one server id
//! to a control implementation for the duration of a match.

pub mod dathost;
pub mod token;

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;

use crate::domain::{RosterOptions, ServerId, ServerSettings, ServerState};

pub use dathost::DathostClient;
pub use token::{SteamTokenIssuer, TokenIssuer};

/// Errors returned by the control and token APIs.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// The server or file does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Transport failure or timeout.
    #[error("request failed: {0}")]
    Http(String),

    /// The provider answered with a non-success status.
    #[error("provider returned {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// The response body could not be decoded.
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ControlError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Http(e.to_string())
        }
    }
}

/// Byte stream of a file downloaded from a server.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ControlError>> + Send>>;

/// Player lists and options for the provider's match setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRoster {
    /// Steam ids of team one.
    pub team_1: Vec<String>,
    /// Steam ids of team two.
    pub team_2: Vec<String>,
    /// Match options.
    pub options: RosterOptions,
}

/// Operations the engine needs from the hosting provider.
#[async_trait]
pub trait GameServerControl: Send + Sync + fmt::Debug {
    /// Reads a server's live state.
    async fn get(&self, server_id: &ServerId) -> Result<ServerState, ControlError>;

    /// Pushes name, region, token and tickrate.
    async fn update_settings(
        &self,
        server_id: &ServerId,
        settings: &ServerSettings,
    ) -> Result<(), ControlError>;

    /// Clones `template` and waits until the copy exists.
    async fn duplicate(&self, template: &ServerId) -> Result<ServerState, ControlError>;

    /// Boots the server.
    async fn start(&self, server_id: &ServerId) -> Result<(), ControlError>;

    /// Shuts the server down.
    async fn stop(&self, server_id: &ServerId) -> Result<(), ControlError>;

    /// Sends one console command.
    async fn console(&self, server_id: &ServerId, line: &str) -> Result<(), ControlError>;

    /// Configures rosters for the next match.
    async fn create_match(
        &self,
        server_id: &ServerId,
        roster: &MatchRoster,
    ) -> Result<(), ControlError>;

    /// Streams a file from the server's file system.
    ///
    /// Fails with [`ControlError::NotFound`] if the file does not exist.
    async fn download(&self, server_id: &ServerId, path: &str) -> Result<ByteStream, ControlError>;
}

/// One leased server bound to its control implementation.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    server_id: ServerId,
    control: Arc<dyn GameServerControl>,
}

impl ServerHandle {
    /// Binds `server_id` to `control`.
    #[must_use]
    pub const fn new(server_id: ServerId, control: Arc<dyn GameServerControl>) -> Self {
        Self { server_id, control }
    }

    /// The bound server id.
    #[must_use]
    pub const fn server_id(&self) -> &ServerId {
        &self.server_id
    }

    /// See [`GameServerControl::get`].
    ///
    /// # Errors
    ///
    /// Propagates the control API error.
    pub async fn state(&self) -> Result<ServerState, ControlError> {
        self.control.get(&self.server_id).await
    }

    /// See [`GameServerControl::update_settings`].
    ///
    /// # Errors
    ///
    /// Propagates the control API error.
    pub async fn update_settings(&self, settings: &ServerSettings) -> Result<(), ControlError> {
        self.control.update_settings(&self.server_id, settings).await
    }

    /// See [`GameServerControl::start`].
    ///
    /// # Errors
    ///
    /// Propagates the control API error.
    pub async fn start(&self) -> Result<(), ControlError> {
        self.control.start(&self.server_id).await
    }

    /// See [`GameServerControl::stop`].
    ///
    /// # Errors
    ///
    /// Propagates the control API error.
    pub async fn stop(&self) -> Result<(), ControlError> {
        self.control.stop(&self.server_id).await
    }

    /// See [`GameServerControl::console`].
    ///
    /// # Errors
    ///
    /// Propagates the control API error.
    pub async fn console(&self, line: &str) -> Result<(), ControlError> {
        self.control.console(&self.server_id, line).await
    }

    /// See [`GameServerControl::create_match`].
    ///
    /// # Errors
    ///
    /// Propagates the control API error.
    pub async fn create_match(&self, roster: &MatchRoster) -> Result<(), ControlError> {
        self.control.create_match(&self.server_id, roster).await
    }

    /// See [`GameServerControl::download`].
    ///
    /// # Errors
    ///
    /// Propagates the control API error.
    pub async fn download(&self, path: &str) -> Result<ByteStream, ControlError> {
        self.control.download(&self.server_id, path).await
    }
}
