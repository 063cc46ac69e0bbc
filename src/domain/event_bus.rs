//! Broadcast channel for connection state transitions.
//!
//! [`TransitionBus`] pairs a [`tokio::sync::broadcast`] channel, which
//! delivers every individual [`Transition`], with a [`tokio::sync::watch`]
//! channel holding the latest [`ConnectionState`] for readers that only
//! care about "now".

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, watch};

use super::{ConnectionState, Transition};

/// Broadcast bus for [`Transition`]s plus the current [`ConnectionState`].
///
/// Cloning is cheap; all clones share the same channels. Only the
/// connection manager writes to the bus.
#[derive(Debug, Clone)]
pub struct TransitionBus {
    sender: broadcast::Sender<Transition>,
    current: Arc<watch::Sender<ConnectionState>>,
}

impl TransitionBus {
    /// Creates a new bus with the given broadcast capacity, starting in
    /// `PRE_INIT`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        let (current, _) = watch::channel(ConnectionState::initial());
        Self {
            sender,
            current: Arc::new(current),
        }
    }

    /// Replaces the current state and broadcasts the transition.
    ///
    /// Returns the number of broadcast receivers that got the transition.
    pub(crate) fn apply(&self, next: ConnectionState) -> usize {
        let from = self.current.borrow().status;
        if !from.can_transition_to(next.status) {
            tracing::warn!(%from, to = %next.status, "off-table connection transition");
        }
        self.current.send_replace(next.clone());
        self.sender
            .send(Transition {
                from,
                to: next,
                at: Utc::now(),
            })
            .unwrap_or(0)
    }

    /// Records a ping time on the current state without broadcasting a
    /// transition.
    pub(crate) fn touch_ping(&self, at: chrono::DateTime<Utc>) {
        self.current.send_modify(|state| state.last_ping = Some(at));
    }

    /// Creates a receiver for every future transition.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
        self.sender.subscribe()
    }

    /// Creates a receiver tracking the latest state.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.current.subscribe()
    }

    /// Returns a copy of the current state.
    #[must_use]
    pub fn current(&self) -> ConnectionState {
        self.current.borrow().clone()
    }

}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::ConnectionStatus;

    fn state(status: ConnectionStatus) -> ConnectionState {
        ConnectionState {
            status,
            error: None,
            last_ping: None,
        }
    }

    #[test]
    fn apply_without_receivers_returns_zero() {
        let bus = TransitionBus::new(8);
        assert_eq!(bus.apply(state(ConnectionStatus::Connecting)), 0);
        assert_eq!(bus.current().status, ConnectionStatus::Connecting);
    }

    #[tokio::test]
    async fn subscriber_receives_from_and_to() {
        let bus = TransitionBus::new(8);
        let mut rx = bus.subscribe();

        bus.apply(state(ConnectionStatus::Connecting));

        let Ok(transition) = rx.recv().await else {
            panic!("expected a transition");
        };
        assert_eq!(transition.from, ConnectionStatus::PreInit);
        assert_eq!(transition.to.status, ConnectionStatus::Connecting);
    }

    #[tokio::test]
    async fn touch_ping_updates_watch_only() {
        let bus = TransitionBus::new(8);
        let mut rx = bus.subscribe();
        let now = Utc::now();

        bus.touch_ping(now);

        assert_eq!(bus.current().last_ping, Some(now));
        assert!(rx.try_recv().is_err());
    }
}
