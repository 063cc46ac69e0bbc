//! Read-only access to relay-pushed data.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::Value;

use crate::app_state::AppState;

/// `GET /servers` — Latest `servers` list pushed by the relay.
pub async fn servers_handler(State(state): State<AppState>) -> Json<Vec<Value>> {
    Json(state.mirror.servers().await)
}

/// Mirror routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/servers", get(servers_handler))
}
