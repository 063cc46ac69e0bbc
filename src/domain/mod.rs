//! Domain layer: connection state, transition bus, and shared caches.
//!
//! This module holds the types every other layer agrees on: the connection
//! state machine, the bus that publishes its transitions, the identity of
//! relay subscriptions, the local mirror of relay-pushed data, and link
//! metadata read by the status reporter.

pub mod connection_state;
pub mod event_bus;
pub mod link_metadata;
pub mod mirror;
pub mod operation;
pub mod subscription_id;

pub use connection_state::{ConnectionState, ConnectionStatus, Transition};
pub use event_bus::TransitionBus;
pub use link_metadata::LinkMetadata;
pub use mirror::{MirrorCache, ProxyEvent};
pub use operation::GraphqlOperation;
pub use subscription_id::SubscriptionId;
