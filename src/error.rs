//! Gateway error types with HTTP status code mapping.
//!
//! [`GatewayError`] is the central error type for the engine. Each variant
//! maps to a numeric error code, an HTTP status and a structured JSON error
//! response. Collaborator errors ([`ControlError`], [`StorageError`])
//! convert into it.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::control::ControlError;
use crate::domain::BanRecord;
use crate::storage::StorageError;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 2002,
///     "message": "match already ended",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
}

/// Engine error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category            | HTTP Status                  |
/// |-----------|---------------------|------------------------------|
/// | 1000–1999 | Validation          | 400 Bad Request              |
/// | 2000–2999 | Not found/Conflict  | 404 Not Found / 409 Conflict |
/// | 3000–3999 | Server              | 500 Internal Server Error    |
/// | 4000–4999 | Policy              | 403 Forbidden                |
/// | 5000–5999 | External dependency | 502 / 503                    |
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// League region is not supported.
    #[error("invalid region: {0}")]
    InvalidRegion(String),

    /// Game or demo tickrate is not supported.
    #[error("invalid tickrate: {0}")]
    InvalidTickRate(u16),

    /// Demo tickrate exceeds the game tickrate.
    #[error("demo tickrate {demo} is above game tickrate {game}")]
    DemoTickRateAboveGame {
        /// Requested demo tickrate.
        demo: u16,
        /// League game tickrate.
        game: u16,
    },

    /// A given captain is not a member of their team.
    #[error("captains must be members of their team")]
    CaptainsNotInTeam,

    /// A team has no players.
    #[error("both teams need at least one player")]
    PlayersNotGiven,

    /// League does not exist.
    #[error("league not found: {0}")]
    LeagueInvalid(String),

    /// Match does not exist in the league.
    #[error("match not found: {0}")]
    InvalidMatchId(uuid::Uuid),

    /// Match is already finished.
    #[error("match already ended")]
    MatchAlreadyEnded,

    /// No idle server is available and none can be provisioned.
    #[error("no server available: {0}")]
    ServerUnavailable(String),

    /// No demo exists to analyze.
    #[error("no demo to analyze")]
    NoDemoToAnalyze,

    /// One or more participants are banned.
    #[error("{} participant(s) banned", .0.len())]
    UsersBanned(Vec<BanRecord>),

    /// Game-server control API failure.
    #[error("control api error: {0}")]
    ControlApi(#[from] ControlError),

    /// Object storage failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Persistence layer failure.
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::InvalidRegion(_) => 1002,
            Self::InvalidTickRate(_) => 1003,
            Self::DemoTickRateAboveGame { .. } => 1004,
            Self::CaptainsNotInTeam => 1005,
            Self::PlayersNotGiven => 1006,
            Self::LeagueInvalid(_) => 2001,
            Self::InvalidMatchId(_) => 2002,
            Self::MatchAlreadyEnded => 2003,
            Self::ServerUnavailable(_) => 2004,
            Self::NoDemoToAnalyze => 2005,
            Self::Internal(_) => 3000,
            Self::PersistenceError(_) => 3001,
            Self::UsersBanned(_) => 4001,
            Self::ControlApi(_) => 5001,
            Self::Storage(_) => 5002,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_)
            | Self::InvalidRegion(_)
            | Self::InvalidTickRate(_)
            | Self::DemoTickRateAboveGame { .. }
            | Self::CaptainsNotInTeam
            | Self::PlayersNotGiven => StatusCode::BAD_REQUEST,
            Self::LeagueInvalid(_) | Self::InvalidMatchId(_) | Self::NoDemoToAnalyze => {
                StatusCode::NOT_FOUND
            }
            Self::MatchAlreadyEnded => StatusCode::CONFLICT,
            Self::ServerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::UsersBanned(_) => StatusCode::FORBIDDEN,
            Self::ControlApi(_) | Self::Storage(_) => StatusCode::BAD_GATEWAY,
            Self::PersistenceError(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Structured details attached to the response body, if any.
    fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::UsersBanned(bans) => serde_json::to_value(bans).ok(),
            _ => None,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: self.details(),
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
