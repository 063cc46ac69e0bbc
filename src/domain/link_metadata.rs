//! Link metadata shared with the status reporter.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

/// Out-of-band facts about the relay link that are not part of the state
/// machine, currently the time of the last relay ping.
///
/// The status reporter reads the ping time from here rather than from the
/// subscription registry.
#[derive(Debug, Clone, Default)]
pub struct LinkMetadata {
    last_ping: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl LinkMetadata {
    /// Creates empty metadata.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a ping received at `at`.
    pub async fn record_ping(&self, at: DateTime<Utc>) {
        *self.last_ping.write().await = Some(at);
    }

    /// Returns the time of the last ping, if any.
    pub async fn last_ping(&self) -> Option<DateTime<Utc>> {
        *self.last_ping.read().await
    }
}
