//! # mothership-relay
//!
//! Supervised outbound link from a NAS control-plane daemon to its cloud
//! relay ("the mothership").
//!
//! The crate keeps exactly one relay socket alive, reconnects with jittered
//! exponential backoff, answers relay keepalives, forwards relay-issued
//! GraphQL operations to the local API with the device's own credentials,
//! mirrors relay-pushed data locally, tracks relay-side subscriptions, and
//! publishes link health to a status file for other on-host processes.
//!
//! ## Architecture
//!
//! ```text
//! Relay (WebSocket)
//!     │
//!     ├── ConnectionManager (relay/)
//!     │       ├── Backoff, HeartbeatMonitor
//!     │       ├── SubscriptionRegistry
//!     │       └── LocalApiProxy ──► Local API (HTTP)
//!     │
//!     ├── TransitionBus, MirrorCache, LinkMetadata (domain/)
//!     │
//!     ├── StatusReporter (status/) ──► status file
//!     └── Status API (api/) ──► loopback HTTP
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod relay;
pub mod status;
