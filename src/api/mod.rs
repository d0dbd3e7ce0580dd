//! REST API layer: route handlers, DTOs, and router composition.
//!
//! Match endpoints are mounted under `/api/v1`; `/health` sits at the
//! root. With the `swagger-ui` feature the OpenAPI document is served at
//! `/api-docs/openapi.json` and browsable at `/swagger-ui`.

pub mod dto;
pub mod handlers;

use axum::Router;
use utoipa::OpenApi;

use crate::app_state::AppState;

/// OpenAPI document for the operator API.
#[derive(Debug, OpenApi)]
#[openapi(
    info(title = "scrim-gateway", description = "Match orchestration for pick-up game servers"),
    paths(
        handlers::system::health_handler,
        handlers::matches::create_match,
        handlers::matches::get_match,
        handlers::matches::update_match,
        handlers::matches::end_match,
        handlers::matches::analyze_match,
        handlers::events::league_events,
    ),
    components(schemas(
        handlers::system::HealthResponse,
        crate::service::TaskStats,
        dto::UpdateMatchRequest,
        dto::AnalyzeResponse,
        crate::domain::MatchSettings,
        crate::domain::PlayerSelection,
        crate::domain::CaptainSelection,
        crate::domain::MapSelection,
        crate::domain::RosterOptions,
        crate::domain::MatchView,
        crate::domain::view::ConnectView,
        crate::domain::view::DemoView,
        crate::domain::view::PlayerView,
        crate::domain::view::TeamView,
        crate::domain::PlayerDelta,
        crate::domain::Counters,
        crate::domain::BanRecord,
        crate::domain::MatchStatus,
        crate::domain::DemoStatus,
        crate::domain::TeamSide,
        crate::domain::Team,
        crate::error::ErrorResponse,
        crate::error::ErrorBody,
    )),
    tags(
        (name = "Matches", description = "Match lifecycle"),
        (name = "Events", description = "Live lifecycle event streams"),
        (name = "System", description = "Service health"),
    )
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    let router = Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes());

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    );

    router
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_match_routes() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        assert!(paths.iter().any(|p| p.as_str() == "/health"));
        assert!(
            paths
                .iter()
                .any(|p| p.as_str() == "/api/v1/leagues/{league_id}/matches/{match_id}/end")
        );
        assert!(
            paths
                .iter()
                .any(|p| p.as_str() == "/api/v1/leagues/{league_id}/events")
        );
    }
}
