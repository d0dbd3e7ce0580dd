//! League event stream over server-sent events.

use std::convert::Infallible;

use axum::Router;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use futures_util::{Stream, StreamExt};

use crate::app_state::AppState;
use crate::domain::{LeagueId, LifecycleEvent};

/// Renders a lifecycle event as an SSE frame named after the event kind.
fn to_sse(event: &LifecycleEvent) -> Option<Event> {
    match Event::default()
        .event(event.event.name())
        .id(event.match_id.to_string())
        .json_data(event)
    {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::warn!(error = %e, event = %event.event, "failed to encode event");
            None
        }
    }
}

/// `GET /leagues/{league_id}/events` — Stream a league's lifecycle events.
///
/// Each frame carries the event name (`match.start`, `match.update`,
/// `match.end`, `demo.uploaded`), the match id and the JSON event body.
#[utoipa::path(
    get,
    path = "/api/v1/leagues/{league_id}/events",
    tag = "Events",
    summary = "Stream league events",
    description = "Server-sent events for every lifecycle event of the league, as fired to its webhooks.",
    params(("league_id" = String, Path, description = "League code")),
    responses(
        (status = 200, description = "Event stream", body = String, content_type = "text/event-stream"),
    )
)]
pub async fn league_events(
    State(state): State<AppState>,
    Path(league_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let league_id = LeagueId::new(league_id);
    tracing::debug!(league_id = %league_id, "event stream opened");
    let frames = state
        .event_bus
        .league_events(league_id)
        .filter_map(|event| async move { to_sse(&event).map(Ok::<_, Infallible>) });
    Sse::new(frames).keep_alive(KeepAlive::default())
}

/// Event routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/leagues/{league_id}/events", get(league_events))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MatchId, WebhookEvent};

    #[test]
    fn every_event_kind_encodes() {
        for kind in WebhookEvent::ALL {
            let event = LifecycleEvent {
                event: kind,
                league_id: LeagueId::new("lg1"),
                match_id: MatchId::new(),
                payload: serde_json::json!({ "team_1_score": 3 }),
                timestamp: chrono::Utc::now(),
            };
            assert!(to_sse(&event).is_some(), "{kind}");
        }
    }
}
