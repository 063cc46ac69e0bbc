//! Content-derived subscription identifier.
//!
//! [`SubscriptionId`] is the SHA-256 of a canonical encoding of the
//! subscribed operation. Two identical subscribe requests therefore map to
//! the same registry entry no matter when they arrive.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::GraphqlOperation;

/// Stable identity of a relay-side subscription.
///
/// Hex-encoded SHA-256 over `{"query":…,"variables":…}` serialized with
/// sorted object keys (the default `serde_json::Map` ordering), so
/// variable key order does not affect the id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Derives the id of `operation`.
    #[must_use]
    pub fn of(operation: &GraphqlOperation) -> Self {
        let canonical = serde_json::json!({
            "query": operation.query,
            "variables": operation.variables,
        });
        let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
        Self(hex::encode(Sha256::digest(&bytes)))
    }

    /// Wraps an id received on the wire.
    #[must_use]
    pub fn from_wire(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
