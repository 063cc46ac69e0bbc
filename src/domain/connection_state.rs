//! Connection state machine types.
//!
//! [`ConnectionState`] is the single source of truth for relay link health.
//! It is mutated only by the connection manager; everyone else observes it
//! through the [`super::TransitionBus`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle phase of the relay link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    /// No connection attempt has been made yet.
    PreInit,
    /// A socket is being opened.
    Connecting,
    /// The relay accepted the handshake.
    Connected,
    /// The link is down and no retry is scheduled yet.
    Disconnected,
    /// A retry timer is pending.
    Reconnecting,
    /// The relay rejected this device. A retry is still scheduled.
    Error,
}

impl ConnectionStatus {
    /// Returns `true` if moving from `self` to `next` is part of the
    /// designed state table.
    ///
    /// ```text
    /// PRE_INIT ──► CONNECTING ──► CONNECTED ──► DISCONNECTED ──► RECONNECTING
    ///                 ▲   │                           ▲               │
    ///                 │   └───────── failed ──────────┘               │
    ///                 └───────────────── delay elapsed ───────────────┘
    /// any ──► ERROR ──► RECONNECTING
    /// any ──► CONNECTING (explicit connect), any ──► DISCONNECTED (explicit disconnect)
    /// ```
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (_, Self::Error | Self::Connecting | Self::Disconnected) => true,
            (Self::Connecting, Self::Connected) => true,
            (Self::Disconnected | Self::Error, Self::Reconnecting) => true,
            _ => false,
        }
    }

    /// Returns the wire name (`"CONNECTED"`, ...).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PreInit => "PRE_INIT",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Disconnected => "DISCONNECTED",
            Self::Reconnecting => "RECONNECTING",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current relay link state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    /// Lifecycle phase.
    pub status: ConnectionStatus,
    /// Last error message, cleared on a successful open.
    pub error: Option<String>,
    /// Time of the last ping received from the relay.
    pub last_ping: Option<DateTime<Utc>>,
}

impl ConnectionState {
    /// The state every process starts in.
    #[must_use]
    pub const fn initial() -> Self {
        Self {
            status: ConnectionStatus::PreInit,
            error: None,
            last_ping: None,
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::initial()
    }
}

/// One applied state change.
#[derive(Debug, Clone, Serialize)]
pub struct Transition {
    /// Phase before the change.
    pub from: ConnectionStatus,
    /// Full state after the change.
    pub to: ConnectionState,
    /// When the change was applied.
    pub at: DateTime<Utc>,
}
