//! Relay client configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Every field has a design default, so
//! [`RelayConfig::default`] is a complete, usable configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::error::RelayError;

/// Identity the device presents to the relay during the handshake.
///
/// Supplied by the configuration store and forwarded opaquely; the relay
/// client never interprets these values.
#[derive(Debug, Clone, Default)]
pub struct DeviceIdentity {
    /// The device's own API key. Also used to authenticate proxied calls
    /// against the local API.
    pub api_key: String,
    /// Flash / device GUID.
    pub flash_guid: String,
    /// SHA-256 hex digest of the registration key file, if any.
    pub key_file_digest: Option<String>,
    /// Display name of the server.
    pub server_name: String,
    /// LAN address of the server.
    pub lan_ip: String,
    /// Stable machine identifier.
    pub machine_id: String,
}

impl DeviceIdentity {
    /// Returns the handshake headers as `(name, value)` pairs, skipping
    /// empty values.
    #[must_use]
    pub fn handshake_headers(&self) -> Vec<(&'static str, String)> {
        let key_file = self.key_file_digest.clone().unwrap_or_default();
        [
            ("x-api-key", self.api_key.clone()),
            ("x-flash-guid", self.flash_guid.clone()),
            ("x-key-file", key_file),
            ("x-server-name", self.server_name.clone()),
            ("x-lan-ip", self.lan_ip.clone()),
            ("x-machine-id", self.machine_id.clone()),
            ("x-api-version", env!("CARGO_PKG_VERSION").to_string()),
        ]
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
        .collect()
    }
}

/// Top-level relay client configuration.
///
/// Loaded once at startup via [`RelayConfig::from_env`].
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// WebSocket URL of the relay.
    pub relay_url: String,

    /// GraphQL endpoint of the local API.
    pub local_api_url: String,

    /// Timeout for a single proxied local API call.
    pub local_api_timeout: Duration,

    /// Timeout for a single connection attempt, upgrade included.
    pub connect_timeout: Duration,

    /// Interval at which the relay is expected to ping.
    pub ping_interval: Duration,

    /// Grace period added to `ping_interval` before the link is declared dead.
    pub ping_margin: Duration,

    /// Upper bound on the reconnect delay.
    pub backoff_max_delay: Duration,

    /// Multiplier applied to the exponential reconnect curve.
    pub backoff_multiplier: f64,

    /// Subscriptions not refreshed within this age are evicted.
    pub subscription_max_age: Duration,

    /// Period of the stale-subscription sweep.
    pub subscription_evict_interval: Duration,

    /// Where the status snapshot is written.
    pub status_file: PathBuf,

    /// Period of unconditional status rewrites.
    pub status_tick: Duration,

    /// Window over which bursts of transitions are coalesced into one write.
    pub status_debounce: Duration,

    /// Bind address of the loopback status API (`None` disables it).
    pub status_listen_addr: Option<SocketAddr>,

    /// Capacity of the transition broadcast channel.
    pub event_bus_capacity: usize,

    /// Whether the daemon connects immediately at startup.
    pub auto_connect: bool,

    /// Handshake identity.
    pub device: DeviceIdentity,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            relay_url: "wss://mothership.local/ws".to_string(),
            local_api_url: "http://127.0.0.1:3001/graphql".to_string(),
            local_api_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(15),
            ping_interval: Duration::from_secs(30),
            ping_margin: Duration::from_secs(1),
            backoff_max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            subscription_max_age: Duration::from_secs(300),
            subscription_evict_interval: Duration::from_secs(60),
            status_file: PathBuf::from("/var/run/mothership-relay/status.json"),
            status_tick: Duration::from_secs(30),
            status_debounce: Duration::from_millis(250),
            status_listen_addr: Some(SocketAddr::from(([127, 0, 0, 1], 3002))),
            event_bus_capacity: 64,
            auto_connect: true,
            device: DeviceIdentity::default(),
        }
    }
}

impl RelayConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to the [`Default`] values when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidConfig`] if `STATUS_LISTEN_ADDR` is set
    /// but unparsable, and [`RelayError::Io`] if `DEVICE_KEY_FILE` names a
    /// file that cannot be read.
    pub fn from_env() -> Result<Self, RelayError> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let status_listen_addr = match std::env::var("STATUS_LISTEN_ADDR").ok().as_deref() {
            None => defaults.status_listen_addr,
            Some("" | "off" | "OFF") => None,
            Some(raw) => Some(raw.parse().map_err(|_| {
                RelayError::InvalidConfig(format!("STATUS_LISTEN_ADDR: {raw}"))
            })?),
        };

        let key_file_digest = match std::env::var("DEVICE_KEY_FILE") {
            Ok(path) if !path.is_empty() => Some(digest_file(&path)?),
            _ => None,
        };

        let device = DeviceIdentity {
            api_key: parse_env("DEVICE_API_KEY", String::new()),
            flash_guid: parse_env("DEVICE_FLASH_GUID", String::new()),
            key_file_digest,
            server_name: parse_env("DEVICE_SERVER_NAME", String::new()),
            lan_ip: parse_env("DEVICE_LAN_IP", String::new()),
            machine_id: parse_env("DEVICE_MACHINE_ID", String::new()),
        };

        Ok(Self {
            relay_url: parse_env("MOTHERSHIP_URL", defaults.relay_url),
            local_api_url: parse_env("LOCAL_API_URL", defaults.local_api_url),
            local_api_timeout: Duration::from_secs(parse_env("LOCAL_API_TIMEOUT_SECS", 30)),
            connect_timeout: Duration::from_secs(parse_env("RELAY_CONNECT_TIMEOUT_SECS", 15)),
            ping_interval: Duration::from_secs(parse_env("RELAY_PING_INTERVAL_SECS", 30)),
            ping_margin: Duration::from_millis(parse_env("RELAY_PING_MARGIN_MS", 1000)),
            backoff_max_delay: Duration::from_secs(parse_env("RELAY_BACKOFF_MAX_SECS", 60)),
            backoff_multiplier: parse_env("RELAY_BACKOFF_MULTIPLIER", defaults.backoff_multiplier),
            subscription_max_age: Duration::from_secs(parse_env("SUBSCRIPTION_MAX_AGE_SECS", 300)),
            subscription_evict_interval: Duration::from_secs(parse_env(
                "SUBSCRIPTION_EVICT_INTERVAL_SECS",
                60,
            )),
            status_file: parse_env("STATUS_FILE", defaults.status_file),
            status_tick: Duration::from_secs(parse_env("STATUS_TICK_SECS", 30)),
            status_debounce: Duration::from_millis(parse_env("STATUS_DEBOUNCE_MS", 250)),
            status_listen_addr,
            event_bus_capacity: parse_env("EVENT_BUS_CAPACITY", defaults.event_bus_capacity),
            auto_connect: parse_env_bool("AUTO_CONNECT", defaults.auto_connect),
            device,
        })
    }

    /// Deadline after which a silent relay link is considered dead.
    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        self.ping_interval + self.ping_margin
    }
}

/// Returns the SHA-256 hex digest of the file at `path`.
fn digest_file(path: &str) -> Result<String, RelayError> {
    let bytes = std::fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).ok().as_deref() {
        Some("true" | "TRUE" | "1") => true,
        Some("false" | "FALSE" | "0") => false,
        _ => default,
    }
}
