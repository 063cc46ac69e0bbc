//! Relay client: the device's single supervised link to the mothership.
//!
//! Leaves first: [`backoff`] computes reconnect delays, [`heartbeat`]
//! watches for a silent relay, [`subscription`] tracks relay-side
//! subscriptions, [`proxy`] forwards relay-issued operations to the local
//! API, and [`connection`] owns the socket and wires the rest together.

pub mod backoff;
pub mod connection;
pub mod frame;
pub mod heartbeat;
pub mod proxy;
pub mod subscription;

pub use backoff::{Backoff, BackoffPolicy};
pub use connection::{ConnectionManager, LinkDiagnostics, RelayHandle};
pub use frame::{InboundFrame, OutboundFrame};
pub use heartbeat::HeartbeatMonitor;
pub use proxy::LocalApiProxy;
pub use subscription::{Subscription, SubscriptionHandle, SubscriptionRegistry};
