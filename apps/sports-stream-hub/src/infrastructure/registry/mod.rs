//! Subscription Registry
//!
//! Tracks live upstream subscriptions: each entry owns the accumulated
//! document assembled from deltas and the update channel of the group that
//! holds the subscription. Delta application is the only writer of the
//! accumulated state, and updates for one group always flow through one
//! channel, which is what gives groups their per-group ordering guarantee.
//!
//! On upstream disconnect the registry is cleared wholesale: a new session
//! issues new subscription ids, so stale entries are never worth keeping.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::domain::payload::deep_merge;

/// One delta delivered to a group, along with the post-merge state.
#[derive(Debug, Clone)]
pub struct SubscriptionUpdate {
    /// Subscription id the delta arrived for.
    pub sub_id: String,
    /// The raw delta document.
    pub delta: Value,
    /// Accumulated state after merging the delta.
    pub state: Value,
}

struct SubscriptionEntry {
    state: Value,
    updates: mpsc::UnboundedSender<SubscriptionUpdate>,
}

/// Registry of active upstream subscriptions.
#[derive(Default)]
pub struct SubscriptionRegistry {
    inner: RwLock<HashMap<String, SubscriptionEntry>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription with its initial document and the owning
    /// group's update channel.
    pub fn register(
        &self,
        sub_id: impl Into<String>,
        initial: Value,
        updates: mpsc::UnboundedSender<SubscriptionUpdate>,
    ) {
        let sub_id = sub_id.into();
        let mut inner = self.inner.write();
        if inner
            .insert(sub_id.clone(), SubscriptionEntry { state: initial, updates })
            .is_some()
        {
            tracing::warn!(sub_id, "replaced existing subscription entry");
        }
    }

    /// Merge a delta into a subscription's accumulated state and notify the
    /// owning group.
    ///
    /// Returns `false` when the subscription id is unknown (a late delta for
    /// an unsubscribed or not-yet-registered id); such deltas are dropped.
    pub fn apply(&self, sub_id: &str, delta: &Value) -> bool {
        let mut inner = self.inner.write();
        let Some(entry) = inner.get_mut(sub_id) else {
            return false;
        };

        deep_merge(&mut entry.state, delta);

        let update = SubscriptionUpdate {
            sub_id: sub_id.to_string(),
            delta: delta.clone(),
            state: entry.state.clone(),
        };
        if entry.updates.send(update).is_err() {
            // Owning group is gone; drop the entry so further deltas short-circuit.
            inner.remove(sub_id);
        }
        true
    }

    /// Remove one subscription.
    pub fn remove(&self, sub_id: &str) -> bool {
        self.inner.write().remove(sub_id).is_some()
    }

    /// Whether a subscription id is registered.
    #[must_use]
    pub fn contains(&self, sub_id: &str) -> bool {
        self.inner.read().contains_key(sub_id)
    }

    /// Current accumulated state of a subscription.
    #[must_use]
    pub fn state(&self, sub_id: &str) -> Option<Value> {
        self.inner.read().get(sub_id).map(|e| e.state.clone())
    }

    /// Drop every subscription. Called when the upstream session dies; ids
    /// from the old session are meaningless to the new one.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        let dropped = inner.len();
        inner.clear();
        if dropped > 0 {
            tracing::info!(dropped, "subscription registry cleared");
        }
    }

    /// Number of active subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn apply_merges_and_notifies() {
        let registry = SubscriptionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register("s1", json!({"game": {"1": {"price": 1.5}}}), tx);

        assert!(registry.apply("s1", &json!({"game": {"1": {"price": 1.6}}})));

        let update = rx.try_recv().unwrap();
        assert_eq!(update.sub_id, "s1");
        assert_eq!(update.delta["game"]["1"]["price"], json!(1.6));
        assert_eq!(update.state["game"]["1"]["price"], json!(1.6));
        assert_eq!(registry.state("s1").unwrap()["game"]["1"]["price"], json!(1.6));
    }

    #[test]
    fn apply_unknown_subscription_is_dropped() {
        let registry = SubscriptionRegistry::new();
        assert!(!registry.apply("missing", &json!({})));
    }

    #[test]
    fn null_delta_deletes_from_state() {
        let registry = SubscriptionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register("s1", json!({"game": {"1": {}, "2": {}}}), tx);

        registry.apply("s1", &json!({"game": {"1": null}}));

        let update = rx.try_recv().unwrap();
        assert_eq!(update.state, json!({"game": {"2": {}}}));
    }

    #[test]
    fn apply_after_group_dropped_removes_entry() {
        let registry = SubscriptionRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register("s1", json!({}), tx);
        drop(rx);

        assert!(registry.apply("s1", &json!({"x": 1})));
        assert!(!registry.contains("s1"));
    }

    #[test]
    fn clear_empties_registry() {
        let registry = SubscriptionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register("s1", json!({}), tx.clone());
        registry.register("s2", json!({}), tx);
        assert_eq!(registry.len(), 2);

        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register("s1", json!({}), tx);
        assert!(registry.remove("s1"));
        assert!(!registry.remove("s1"));
    }
}
