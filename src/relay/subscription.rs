//! Registry of relay-side subscriptions.
//!
//! Tracks every subscription this device has open on the relay, keyed by
//! its content-derived [`SubscriptionId`]. The connection manager owns the
//! registry outright; nothing else reaches into the map.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::domain::SubscriptionId;

/// Producer side of a subscription's update stream.
///
/// Holds the latest pushed payload. Dropping the handle closes every
/// [`Subscription`] receiver, which tells consumers to renegotiate.
#[derive(Debug)]
pub struct SubscriptionHandle {
    updates: watch::Sender<Option<Value>>,
}

impl SubscriptionHandle {
    /// Creates a handle and the first consumer receiver.
    #[must_use]
    pub fn new() -> (Self, watch::Receiver<Option<Value>>) {
        let (updates, rx) = watch::channel(None);
        (Self { updates }, rx)
    }

    /// Returns another receiver on the same update stream.
    #[must_use]
    pub fn receiver(&self) -> watch::Receiver<Option<Value>> {
        self.updates.subscribe()
    }

    fn publish(&self, payload: Value) {
        self.updates.send_replace(Some(payload));
    }

    fn cancel(self) {
        drop(self.updates);
    }
}

/// Consumer side of a subscription.
#[derive(Debug, Clone)]
pub struct Subscription {
    id: SubscriptionId,
    updates: watch::Receiver<Option<Value>>,
}

impl Subscription {
    /// Wraps a receiver obtained from the registry.
    #[must_use]
    pub const fn new(id: SubscriptionId, updates: watch::Receiver<Option<Value>>) -> Self {
        Self { id, updates }
    }

    /// Content id of the subscribed operation.
    #[must_use]
    pub const fn id(&self) -> &SubscriptionId {
        &self.id
    }

    /// Latest payload pushed by the relay, if any.
    #[must_use]
    pub fn latest(&self) -> Option<Value> {
        self.updates.borrow().clone()
    }

    /// Waits for the next payload.
    ///
    /// Returns `None` once the subscription has been removed, evicted, or
    /// dropped with the connection.
    pub async fn next(&mut self) -> Option<Value> {
        loop {
            self.updates.changed().await.ok()?;
            if let Some(payload) = self.updates.borrow_and_update().clone() {
                return Some(payload);
            }
        }
    }
}

/// One registered subscription.
#[derive(Debug)]
pub struct SubscriptionRecord {
    /// Content id.
    pub id: SubscriptionId,
    /// When the subscription was registered.
    pub created_at: Instant,
    /// Last time the relay showed the subscription is alive.
    pub last_ping_at: Instant,
    handle: SubscriptionHandle,
}

/// Active subscriptions keyed by content id.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    records: HashMap<SubscriptionId, SubscriptionRecord>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handle` under `id`. An existing entry with the same id is
    /// replaced, so the registry size does not change.
    pub fn add_subscription(&mut self, id: SubscriptionId, handle: SubscriptionHandle) {
        let now = Instant::now();
        let record = SubscriptionRecord {
            id: id.clone(),
            created_at: now,
            last_ping_at: now,
            handle,
        };
        if let Some(previous) = self.records.insert(id, record) {
            tracing::debug!(id = %previous.id, "subscription re-registered");
        }
    }

    /// Marks `id` as alive. Returns `false` (and logs) if it is unknown.
    pub fn ping_subscription(&mut self, id: &SubscriptionId) -> bool {
        match self.records.get_mut(id) {
            Some(record) => {
                record.last_ping_at = Instant::now();
                true
            }
            None => {
                tracing::debug!(%id, "ping for unknown subscription ignored");
                false
            }
        }
    }

    /// Refreshes `id` and publishes `payload` to its consumers.
    /// Returns `false` if `id` is unknown.
    pub fn apply_data(&mut self, id: &SubscriptionId, payload: Value) -> bool {
        if !self.ping_subscription(id) {
            return false;
        }
        if let Some(record) = self.records.get(id) {
            record.handle.publish(payload);
        }
        true
    }

    /// Cancels and removes `id`. Returns `true` if it was registered.
    pub fn remove_subscription(&mut self, id: &SubscriptionId) -> bool {
        match self.records.remove(id) {
            Some(record) => {
                record.handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels and removes every subscription. Returns how many were dropped.
    pub fn clear_all(&mut self) -> usize {
        let count = self.records.len();
        for (_, record) in self.records.drain() {
            record.handle.cancel();
        }
        if count > 0 {
            tracing::info!(count, "cleared relay subscriptions");
        }
        count
    }

    /// Removes every subscription whose last ping is older than `max_age`
    /// and returns their ids.
    pub fn evict_stale(&mut self, max_age: Duration) -> Vec<SubscriptionId> {
        let now = Instant::now();
        let stale: Vec<SubscriptionId> = self
            .records
            .values()
            .filter(|record| now.saturating_duration_since(record.last_ping_at) > max_age)
            .map(|record| record.id.clone())
            .collect();
        for id in &stale {
            tracing::info!(%id, "evicting stale subscription");
            self.remove_subscription(id);
        }
        stale
    }

    /// Returns a new consumer for `id`, if registered.
    #[must_use]
    pub fn receiver(&self, id: &SubscriptionId) -> Option<watch::Receiver<Option<Value>>> {
        self.records.get(id).map(|record| record.handle.receiver())
    }

    #[cfg(test)]
    fn get(&self, id: &SubscriptionId) -> Option<&SubscriptionRecord> {
        self.records.get(id)
    }

    #[cfg(test)]
    fn contains(&self, id: &SubscriptionId) -> bool {
        self.records.contains_key(id)
    }

    /// Returns the number of registered subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::GraphqlOperation;
    use serde_json::json;

    const MAX_AGE: Duration = Duration::from_secs(300);

    fn id(query: &str) -> SubscriptionId {
        GraphqlOperation::new(query).content_id()
    }

    #[test]
    fn empty_registry() {
        let registry = SubscriptionRegistry::new();
        assert!(registry.is_empty());
        assert!(!registry.contains(&id("subscription { a }")));
    }

    #[test]
    fn re_adding_same_id_keeps_size() {
        let mut registry = SubscriptionRegistry::new();
        let sub = id("subscription { servers }");

        let (first, _rx1) = SubscriptionHandle::new();
        registry.add_subscription(sub.clone(), first);
        let (second, _rx2) = SubscriptionHandle::new();
        registry.add_subscription(sub.clone(), second);

        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&sub));
    }

    #[test]
    fn ping_unknown_is_noop() {
        let mut registry = SubscriptionRegistry::new();
        assert!(!registry.ping_subscription(&id("subscription { nope }")));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn remove_closes_consumers() {
        let mut registry = SubscriptionRegistry::new();
        let sub = id("subscription { a }");
        let (handle, rx) = SubscriptionHandle::new();
        registry.add_subscription(sub.clone(), handle);

        let mut consumer = Subscription::new(sub.clone(), rx);
        assert!(registry.remove_subscription(&sub));
        assert!(!registry.remove_subscription(&sub));
        assert!(consumer.next().await.is_none());
    }

    #[tokio::test]
    async fn apply_data_reaches_every_consumer() {
        let mut registry = SubscriptionRegistry::new();
        let sub = id("subscription { a }");
        let (handle, rx) = SubscriptionHandle::new();
        registry.add_subscription(sub.clone(), handle);
        let Some(second_rx) = registry.receiver(&sub) else {
            panic!("registered id has a receiver");
        };

        let mut first = Subscription::new(sub.clone(), rx);
        let mut second = Subscription::new(sub.clone(), second_rx);
        assert!(registry.apply_data(&sub, json!({"n": 1})));

        assert_eq!(first.next().await, Some(json!({"n": 1})));
        assert_eq!(second.next().await, Some(json!({"n": 1})));
        assert_eq!(first.latest(), Some(json!({"n": 1})));
    }

    #[test]
    fn clear_all_empties_registry() {
        let mut registry = SubscriptionRegistry::new();
        for q in ["subscription { a }", "subscription { b }", "subscription { c }"] {
            let (handle, _rx) = SubscriptionHandle::new();
            registry.add_subscription(id(q), handle);
        }
        assert_eq!(registry.clear_all(), 3);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_only_after_max_age() {
        let mut registry = SubscriptionRegistry::new();
        let sub = id("subscription { a }");
        let (handle, _rx) = SubscriptionHandle::new();
        registry.add_subscription(sub.clone(), handle);

        tokio::time::advance(MAX_AGE).await;
        assert!(registry.evict_stale(MAX_AGE).is_empty());
        assert!(registry.contains(&sub));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(registry.evict_stale(MAX_AGE), vec![sub.clone()]);
        assert!(!registry.contains(&sub));
    }

    #[tokio::test(start_paused = true)]
    async fn ping_defers_eviction() {
        let mut registry = SubscriptionRegistry::new();
        let fresh = id("subscription { fresh }");
        let stale = id("subscription { stale }");
        for sub in [&fresh, &stale] {
            let (handle, _rx) = SubscriptionHandle::new();
            registry.add_subscription(sub.clone(), handle);
        }

        tokio::time::advance(Duration::from_secs(200)).await;
        assert!(registry.ping_subscription(&fresh));
        tokio::time::advance(Duration::from_secs(200)).await;

        assert_eq!(registry.evict_stale(MAX_AGE), vec![stale]);
        assert!(registry.contains(&fresh));
        let Some(record) = registry.get(&fresh) else {
            panic!("fresh subscription kept");
        };
        assert!(record.last_ping_at > record.created_at);
    }
}
