//! Status snapshot persisted for other on-host processes.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ConnectionState, ConnectionStatus};
use crate::error::RelayError;

/// On-disk view of relay link health.
///
/// Always derived from the current [`ConnectionState`]; never read back
/// by this process as a source of truth.
///
/// ```json
/// {
///   "connectionStatus": "CONNECTED",
///   "error": null,
///   "lastPing": "2026-10-16T08:00:00Z",
///   "timestamp": "2026-10-16T08:00:05Z"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    /// Lifecycle phase.
    pub connection_status: ConnectionStatus,
    /// Last error message, if any.
    pub error: Option<String>,
    /// Time of the last relay ping.
    pub last_ping: Option<DateTime<Utc>>,
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
}

impl StatusSnapshot {
    /// Builds a snapshot of `state` with the ping time reported by the
    /// link metadata.
    #[must_use]
    pub fn capture(state: &ConnectionState, last_ping: Option<DateTime<Utc>>) -> Self {
        Self {
            connection_status: state.status,
            error: state.error.clone(),
            last_ping,
            timestamp: Utc::now(),
        }
    }

    /// Reads a snapshot written by a reporter.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Io`] if the file is missing or unreadable
    /// (a missing file means the daemon shut down cleanly) and
    /// [`RelayError::Json`] if it is not a snapshot.
    pub async fn load(path: &Path) -> Result<Self, RelayError> {
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
