//! Loopback status API: health, link status, and mirrored relay data.
//!
//! Bound to a local address only; it exposes what the status file exposes
//! plus the mirror cache, and never proxies anything to the relay.

pub mod handlers;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

/// Builds the status router with request tracing.
pub fn build_router(state: AppState) -> Router {
    handlers::routes()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
