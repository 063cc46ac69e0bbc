//! Shared state injected into the status API handlers.

use crate::domain::{LinkMetadata, MirrorCache, TransitionBus};
use crate::relay::RelayHandle;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Handle to the running connection manager.
    pub relay: RelayHandle,
    /// Connection state and transitions.
    pub bus: TransitionBus,
    /// Link metadata (last ping).
    pub metadata: LinkMetadata,
    /// Relay-pushed data.
    pub mirror: MirrorCache,
}
