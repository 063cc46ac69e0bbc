//! Relay client error types.
//!
//! [`RelayError`] is the central error type for the relay client. Errors
//! never cross the connection manager boundary as panics or propagated
//! failures: the manager turns them into state transitions and log events.

/// Relay client error enum.
///
/// # Categories
///
/// | Kind        | Variants                                   | Manager reaction            |
/// |-------------|--------------------------------------------|-----------------------------|
/// | `transport` | `Transport`, `Handshake`, `LocalApi`       | DISCONNECTED, then retry    |
/// | `rejection` | `Rejected`                                 | ERROR, then retry           |
/// | `protocol`  | `Protocol`, `Json`                         | frame dropped, link kept    |
/// | `usage`     | `NotConnected`, `ManagerClosed`            | returned to the caller      |
/// | `local`     | `InvalidConfig`, `Io`                      | returned to the caller      |
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The relay socket failed after it was established.
    #[error("transport error: {0}")]
    Transport(String),

    /// Opening the relay socket failed before the upgrade completed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The relay refused this device (HTTP 4xx on upgrade or a policy close).
    #[error("relay rejected connection ({status}): {reason}")]
    Rejected {
        /// HTTP status or WebSocket close code reported by the relay.
        status: u16,
        /// Human-readable reason supplied by the relay, if any.
        reason: String,
    },

    /// A frame could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The local API could not be reached or answered with garbage.
    #[error("local api error: {0}")]
    LocalApi(String),

    /// The operation needs a live relay connection.
    #[error("relay is not connected")]
    NotConnected,

    /// The connection manager task has exited.
    #[error("connection manager is no longer running")]
    ManagerClosed,

    /// A configuration value could not be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Filesystem failure (status file, key file).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RelayError {
    /// Returns `true` when the relay explicitly refused this device.
    ///
    /// Rejections move the connection into `ERROR` instead of
    /// `DISCONNECTED`; both still lead to a scheduled retry.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    /// Returns a short static label for structured logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) | Self::Handshake(_) | Self::LocalApi(_) => "transport",
            Self::Rejected { .. } => "rejection",
            Self::Protocol(_) | Self::Json(_) => "protocol",
            Self::NotConnected | Self::ManagerClosed => "usage",
            Self::InvalidConfig(_) | Self::Io(_) => "local",
        }
    }
}
