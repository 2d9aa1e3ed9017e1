//! HTTP route definitions

use axum::{
    extract::State,
    http::{header, HeaderValue, Method},
    response::Json,
    routing::get,
    Router,
};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::app::AppState;
use crate::config::ServerMode;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;
use crate::ws::protocol::RunStatus;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(allowed_origins(&state.config.client_origin))
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/maps", get(maps_handler))
        .route("/ws", get(ws_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(cors),
        )
        .with_state(state)
}

/// `*` allows any origin, otherwise a comma-separated list
fn allowed_origins(client_origin: &str) -> AllowOrigin {
    if client_origin.trim() == "*" {
        return AllowOrigin::from(Any);
    }
    let origins: Vec<HeaderValue> = client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
        .collect();
    AllowOrigin::list(origins)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    run_id: String,
    map_name: String,
    run_status: RunStatus,
    tick: u64,
    players: usize,
    spectators: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let summary = state.run.summary();

    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        run_id: state.config.run_id.clone(),
        map_name: summary.map_name,
        run_status: summary.status,
        tick: summary.tick,
        players: summary.players,
        spectators: summary.spectators,
    })
}

// ============================================================================
// Map catalog endpoint
// ============================================================================

#[derive(Debug, Serialize)]
struct MapsResponse {
    maps: Vec<String>,
    current: String,
    mode: ServerMode,
}

async fn maps_handler(State(state): State<AppState>) -> Json<MapsResponse> {
    Json(MapsResponse {
        maps: state.catalog.names().to_vec(),
        current: state.run.summary().map_name,
        mode: state.config.mode,
    })
}
