//! Match handlers: create, get, update, end, analyze.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::dto::{AnalyzeResponse, MatchQuery, UpdateMatchRequest};
use crate::app_state::AppState;
use crate::domain::{LeagueId, MatchId, MatchRef, MatchSettings, MatchView, Visibility};
use crate::error::{ErrorResponse, GatewayError};

fn match_ref(league_id: String, match_id: uuid::Uuid) -> MatchRef {
    MatchRef::new(LeagueId::new(league_id), MatchId::from_uuid(match_id))
}

/// `POST /leagues/{league_id}/matches` — Create a match on a leased server.
///
/// # Errors
///
/// Returns [`GatewayError`] for invalid settings, banned participants or
/// when no server can be leased.
#[utoipa::path(
    post,
    path = "/api/v1/leagues/{league_id}/matches",
    tag = "Matches",
    summary = "Create a match",
    description = "Resolves teams, captains and map, leases a server, boots it and returns the private match view.",
    params(("league_id" = String, Path, description = "League code")),
    request_body = MatchSettings,
    responses(
        (status = 201, description = "Match created", body = MatchView),
        (status = 400, description = "Invalid settings", body = ErrorResponse),
        (status = 403, description = "Participants banned", body = ErrorResponse),
        (status = 404, description = "League not found", body = ErrorResponse),
        (status = 503, description = "No server available", body = ErrorResponse),
    )
)]
pub async fn create_match(
    State(state): State<AppState>,
    Path(league_id): Path<String>,
    Json(settings): Json<MatchSettings>,
) -> Result<impl IntoResponse, GatewayError> {
    let view = state
        .matches
        .create(&LeagueId::new(league_id), &settings)
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// `GET /leagues/{league_id}/matches/{match_id}` — Match with scoreboard.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidMatchId`] for an unknown match.
#[utoipa::path(
    get,
    path = "/api/v1/leagues/{league_id}/matches/{match_id}",
    tag = "Matches",
    summary = "Get a match",
    params(
        ("league_id" = String, Path, description = "League code"),
        ("match_id" = uuid::Uuid, Path, description = "Match UUID"),
        MatchQuery,
    ),
    responses(
        (status = 200, description = "Match view", body = MatchView),
        (status = 404, description = "Match not found", body = ErrorResponse),
    )
)]
pub async fn get_match(
    State(state): State<AppState>,
    Path((league_id, match_id)): Path<(String, uuid::Uuid)>,
    Query(query): Query<MatchQuery>,
) -> Result<impl IntoResponse, GatewayError> {
    let visibility = if query.private {
        Visibility::Private
    } else {
        Visibility::Public
    };
    let view = state
        .matches
        .get(&match_ref(league_id, match_id), visibility)
        .await?;
    Ok(Json(view))
}

/// `PATCH /leagues/{league_id}/matches/{match_id}` — Apply a live update.
///
/// # Errors
///
/// Returns [`GatewayError`] for unknown matches and invalid status moves.
#[utoipa::path(
    patch,
    path = "/api/v1/leagues/{league_id}/matches/{match_id}",
    tag = "Matches",
    summary = "Update a match",
    description = "Applies a partial update. Player counters are added to the stored totals.",
    params(
        ("league_id" = String, Path, description = "League code"),
        ("match_id" = uuid::Uuid, Path, description = "Match UUID"),
    ),
    request_body = UpdateMatchRequest,
    responses(
        (status = 200, description = "Updated match", body = MatchView),
        (status = 400, description = "Invalid status transition", body = ErrorResponse),
        (status = 404, description = "Match not found", body = ErrorResponse),
        (status = 409, description = "Match already ended", body = ErrorResponse),
    )
)]
pub async fn update_match(
    State(state): State<AppState>,
    Path((league_id, match_id)): Path<(String, uuid::Uuid)>,
    Json(req): Json<UpdateMatchRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let (update, players) = req.into_parts();
    let view = state
        .matches
        .update(&match_ref(league_id, match_id), &update, &players)
        .await?;
    Ok(Json(view))
}

/// `POST /leagues/{league_id}/matches/{match_id}/end` — Finish a match.
///
/// # Errors
///
/// Returns [`GatewayError::MatchAlreadyEnded`] for finished matches.
#[utoipa::path(
    post,
    path = "/api/v1/leagues/{league_id}/matches/{match_id}/end",
    tag = "Matches",
    summary = "End a match",
    description = "Stops recording, finishes the match and schedules server shutdown and demo capture.",
    params(
        ("league_id" = String, Path, description = "League code"),
        ("match_id" = uuid::Uuid, Path, description = "Match UUID"),
    ),
    responses(
        (status = 200, description = "Finished match", body = MatchView),
        (status = 404, description = "Match not found", body = ErrorResponse),
        (status = 409, description = "Match already ended", body = ErrorResponse),
    )
)]
pub async fn end_match(
    State(state): State<AppState>,
    Path((league_id, match_id)): Path<(String, uuid::Uuid)>,
) -> Result<impl IntoResponse, GatewayError> {
    let view = state.matches.end(&match_ref(league_id, match_id)).await?;
    Ok(Json(view))
}

/// `POST /leagues/{league_id}/matches/{match_id}/analyze` — Request replay
/// analysis.
///
/// # Errors
///
/// Returns [`GatewayError::NoDemoToAnalyze`] unless the demo is archived.
/// Leagues without replay analysis get `"skipped"`.
#[utoipa::path(
    post,
    path = "/api/v1/leagues/{league_id}/matches/{match_id}/analyze",
    tag = "Matches",
    summary = "Analyze a demo",
    params(
        ("league_id" = String, Path, description = "League code"),
        ("match_id" = uuid::Uuid, Path, description = "Match UUID"),
    ),
    responses(
        (status = 202, description = "Demo submitted, or skipped when analysis is off", body = AnalyzeResponse),
        (status = 404, description = "Match or demo not found", body = ErrorResponse),
    )
)]
pub async fn analyze_match(
    State(state): State<AppState>,
    Path((league_id, match_id)): Path<(String, uuid::Uuid)>,
) -> Result<impl IntoResponse, GatewayError> {
    let submitted = state
        .matches
        .analyze_demo(&match_ref(league_id, match_id))
        .await?;
    let status = if submitted { "submitted" } else { "skipped" };
    Ok((
        StatusCode::ACCEPTED,
        Json(AnalyzeResponse {
            status: status.to_string(),
        }),
    ))
}

/// Match routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/leagues/{league_id}/matches", post(create_match))
        .route(
            "/leagues/{league_id}/matches/{match_id}",
            get(get_match).patch(update_match),
        )
        .route("/leagues/{league_id}/matches/{match_id}/end", post(end_match))
        .route(
            "/leagues/{league_id}/matches/{match_id}/analyze",
            post(analyze_match),
        )
}
