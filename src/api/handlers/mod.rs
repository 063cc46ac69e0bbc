//! Status endpoint handlers organized by concern.

pub mod mirror;
pub mod system;

use axum::Router;

use crate::app_state::AppState;

/// Composes all status routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(system::routes())
        .merge(mirror::routes())
}
