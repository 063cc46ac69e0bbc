//! Local mirror of relay-pushed data.
//!
//! `proxy-data` frames carry a topic and a JSON document. [`MirrorCache`]
//! keeps the latest document per topic so on-host readers can use it
//! without calling the relay or the local API.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;

/// Topic name carrying the list of servers linked to this account.
pub const SERVERS_TOPIC: &str = "servers";

/// A relay-pushed update for one topic.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProxyEvent {
    /// Topic being replaced.
    pub topic: String,
    /// New document for the topic.
    pub data: Value,
}

/// Latest document per `proxy-data` topic.
///
/// Cloning is cheap; clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MirrorCache {
    topics: Arc<RwLock<HashMap<String, Value>>>,
}

impl MirrorCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the document stored for `event.topic`.
    pub async fn apply(&self, event: ProxyEvent) {
        tracing::debug!(topic = %event.topic, "mirror cache updated");
        self.topics.write().await.insert(event.topic, event.data);
    }

    /// Returns the document stored for `topic`.
    pub async fn topic(&self, topic: &str) -> Option<Value> {
        self.topics.read().await.get(topic).cloned()
    }

    /// Returns the mirrored `servers` array, or an empty list.
    pub async fn servers(&self) -> Vec<Value> {
        match self.topic(SERVERS_TOPIC).await {
            Some(Value::Array(servers)) => servers,
            _ => Vec::new(),
        }
    }
}
