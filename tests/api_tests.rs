//! Router-level tests against the in-memory store.
//!
//! Only paths that stop before any hosting, storage or webhook call are
//! exercised here; the HTTP clients are built but never connect.

#![allow(clippy::panic, clippy::indexing_slicing)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use chrono::Utc;
use serde_json::{Value, json};
use tower::ServiceExt;

use scrim_gateway::api;
use scrim_gateway::app_state::{AppState, Stores};
use scrim_gateway::config::{GatewayConfig, TaskConfig};
use scrim_gateway::domain::{BanRecord, LeagueConfig, LeagueId, RatingWeights, UserId};
use scrim_gateway::persistence::MemoryStore;
use scrim_gateway::service::TaskQueue;

fn league(id: &str, region: &str) -> LeagueConfig {
    LeagueConfig {
        league_id: LeagueId::new(id),
        league_name: format!("League {id}"),
        region: region.to_string(),
        tickrate: 128,
        demo_tickrate: 64,
        use_rating: false,
        weights: RatingWeights::default(),
        integrations: vec![],
    }
}

async fn app(store: &Arc<MemoryStore>) -> Router {
    let Ok(mut config) = GatewayConfig::from_env() else {
        panic!("default configuration should load");
    };
    config.tasks = TaskConfig {
        workers: 1,
        queue_capacity: 8,
    };
    let tasks = Arc::new(TaskQueue::start(&config.tasks));
    let Ok(state) = AppState::build(&config, Stores::memory(store), tasks) else {
        panic!("state should build");
    };
    api::build_router().with_state(state)
}

async fn call(app: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    };
    let Ok(request) = request else {
        panic!("request should build");
    };
    let Ok(response) = app.oneshot(request).await else {
        panic!("router is infallible");
    };
    let status = response.status();
    let Ok(bytes) = axum::body::to_bytes(response.into_body(), usize::MAX).await else {
        panic!("body should read");
    };
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn create_body(team_1: UserId, team_2: UserId) -> Value {
    json!({
        "players": { "mode": "given", "team_1": [team_1], "team_2": [team_2] },
        "map": { "mode": "given", "maps": ["de_inferno"] }
    })
}

#[tokio::test]
async fn health_reports_queue_counters() {
    let store = Arc::new(MemoryStore::new());
    let (status, body) = call(app(&store).await, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["tasks"]["pending"], 0);
}

#[tokio::test]
async fn create_in_unknown_league_is_not_found() {
    let store = Arc::new(MemoryStore::new());
    let (status, body) = call(
        app(&store).await,
        Method::POST,
        "/api/v1/leagues/nope/matches",
        Some(create_body(UserId::new(), UserId::new())),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], 2001);
}

#[tokio::test]
async fn create_rejects_unsupported_region() {
    let store = Arc::new(MemoryStore::new());
    store.insert_league(league("moon", "the_moon")).await;
    let (status, body) = call(
        app(&store).await,
        Method::POST,
        "/api/v1/leagues/moon/matches",
        Some(create_body(UserId::new(), UserId::new())),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], 1002);
}

#[tokio::test]
async fn banned_player_is_forbidden_with_ban_details() {
    let store = Arc::new(MemoryStore::new());
    store.insert_league(league("lg1", "sydney")).await;
    let banned = UserId::new();
    store
        .insert_ban(BanRecord {
            ban_id: uuid::Uuid::new_v4(),
            user_id: banned,
            league_id: LeagueId::new("elsewhere"),
            global: true,
            reason: "smurfing".to_string(),
            timestamp: Utc::now(),
            expires: None,
            revoked: false,
            exceptions: vec![],
        })
        .await;

    let (status, body) = call(
        app(&store).await,
        Method::POST,
        "/api/v1/leagues/lg1/matches",
        Some(create_body(banned, UserId::new())),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], 4001);
    assert_eq!(body["error"]["details"][0]["reason"], "smurfing");
}

#[tokio::test]
async fn unknown_match_is_not_found_on_every_route() {
    let store = Arc::new(MemoryStore::new());
    store.insert_league(league("lg1", "sydney")).await;
    let app = app(&store).await;
    let base = format!("/api/v1/leagues/lg1/matches/{}", uuid::Uuid::new_v4());

    let requests = [
        (Method::GET, base.clone(), None),
        (Method::GET, format!("{base}?private=true"), None),
        (Method::PATCH, base.clone(), Some(json!({ "team_1_score": 1 }))),
        (Method::POST, format!("{base}/end"), None),
        (Method::POST, format!("{base}/analyze"), None),
    ];
    for (method, uri, body) in requests {
        let (status, json) = call(app.clone(), method.clone(), &uri, body).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{method} {uri}");
        assert_eq!(json["error"]["code"], 2002, "{method} {uri}");
    }
}

#[tokio::test]
async fn malformed_settings_are_rejected() {
    let store = Arc::new(MemoryStore::new());
    store.insert_league(league("lg1", "sydney")).await;
    let (status, _) = call(
        app(&store).await,
        Method::POST,
        "/api/v1/leagues/lg1/matches",
        Some(json!({ "players": { "mode": "telepathy" } })),
    )
    .await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn status_update_cannot_finish_a_match() {
    let store = Arc::new(MemoryStore::new());
    store.insert_league(league("lg1", "sydney")).await;
    let uri = format!("/api/v1/leagues/lg1/matches/{}", uuid::Uuid::new_v4());
    let (status, body) = call(
        app(&store).await,
        Method::PATCH,
        &uri,
        Some(json!({ "status": "finished" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], 1001);
}

#[tokio::test]
async fn event_stream_holds_a_bus_subscription() {
    let store = Arc::new(MemoryStore::new());
    let app = app(&store).await;

    let Ok(request) = Request::builder()
        .uri("/api/v1/leagues/lg1/events")
        .body(Body::empty())
    else {
        panic!("request should build");
    };
    let Ok(stream) = app.clone().oneshot(request).await else {
        panic!("router is infallible");
    };
    assert_eq!(stream.status(), StatusCode::OK);
    assert_eq!(
        stream.headers()["content-type"].to_str().unwrap_or_default(),
        "text/event-stream"
    );

    let (_, health) = call(app.clone(), Method::GET, "/health", None).await;
    assert_eq!(health["event_subscribers"], 1);

    drop(stream);
    let (_, health) = call(app, Method::GET, "/health", None).await;
    assert_eq!(health["event_subscribers"], 0);
}
