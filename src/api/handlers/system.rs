//! System endpoints: health check, link status, manager diagnostics.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::app_state::AppState;
use crate::status::StatusSnapshot;

/// Health check response.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    timestamp: String,
    version: String,
}

/// `GET /health` — Daemon liveness.
pub async fn health_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// `GET /status` — Same document as the status file, built on demand.
pub async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = StatusSnapshot::capture(&state.bus.current(), state.metadata.last_ping().await);
    (StatusCode::OK, Json(snapshot))
}

/// `GET /diagnostics` — Connection manager internals.
pub async fn diagnostics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.relay.diagnostics().await {
        Ok(diagnostics) => (StatusCode::OK, Json(diagnostics)).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// System routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/diagnostics", get(diagnostics_handler))
}
