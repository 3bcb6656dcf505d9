//! Fan-out registry for passive metrics subscribers.
//!
//! Grounded in `sessions::buffer::OutputBuffer`'s journal hookup, which
//! already uses `mpsc::Sender::try_send` so a slow consumer (the journal
//! writer) can never block the hot path that pushes output entries. Here
//! the same non-blocking-send-and-drop-on-failure shape is generalized from
//! a single optional journal channel to an arbitrary set of subscribers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Handle returned by [`SubscriberRegistry::add`]. Dropping it does not
/// remove the subscription — call [`SubscriberRegistry::remove`] explicitly.
pub type SubscriberId = Uuid;

/// A set of passive session handles that receive a copy of every broadcast
/// frame.
///
/// `broadcast` never suspends on an individual subscriber: each send is a
/// `try_send` against a bounded channel, and a subscriber whose channel is
/// full or closed is dropped from the set rather than awaited.
#[derive(Clone)]
pub struct SubscriberRegistry {
    inner: Arc<Mutex<HashMap<SubscriberId, mpsc::Sender<Value>>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a new passive subscriber and return its id plus the receiving
    /// half of its channel.
    pub fn add(&self, buffer: usize) -> (SubscriberId, mpsc::Receiver<Value>) {
        let (tx, rx) = mpsc::channel(buffer);
        let id = Uuid::new_v4();
        self.inner.lock().expect("subscriber registry poisoned").insert(id, tx);
        (id, rx)
    }

    /// Remove a subscriber. Idempotent — removing an id twice, or one that
    /// was never registered, is a no-op.
    pub fn remove(&self, id: SubscriberId) {
        self.inner.lock().expect("subscriber registry poisoned").remove(&id);
    }

    /// Deliver `frame` to every then-live subscriber. Full or closed channels
    /// are dropped from the set; this function never awaits, so it cannot
    /// stall the session that triggered the broadcast.
    pub fn broadcast(&self, frame: Value) {
        let mut registry = self.inner.lock().expect("subscriber registry poisoned");
        registry.retain(|_, tx| match tx.try_send(frame.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => false,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Current subscriber count, for diagnostics.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("subscriber registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn broadcast_delivers_to_live_subscribers() {
        let registry = SubscriberRegistry::new();
        let (_id, mut rx) = registry.add(4);
        registry.broadcast(json!({"type": "metrics:update"}));
        let got = rx.recv().await.unwrap();
        assert_eq!(got, json!({"type": "metrics:update"}));
    }

    #[tokio::test]
    async fn remove_is_idempotent_and_stops_delivery() {
        let registry = SubscriberRegistry::new();
        let (id, mut rx) = registry.add(4);
        registry.remove(id);
        registry.remove(id);
        registry.broadcast(json!({"x": 1}));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_receiver_is_dropped_from_registry_on_next_broadcast() {
        let registry = SubscriberRegistry::new();
        let (_id, rx) = registry.add(4);
        drop(rx);
        assert_eq!(registry.len(), 1);
        registry.broadcast(json!({"x": 1}));
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn broadcast_does_not_block_when_one_subscriber_is_full() {
        let registry = SubscriberRegistry::new();
        let (_full_id, _rx_never_read) = registry.add(1);
        let (_ok_id, mut ok_rx) = registry.add(4);

        registry.broadcast(json!({"n": 1}));
        registry.broadcast(json!({"n": 2}));

        assert_eq!(registry.len(), 1);
        let first = ok_rx.recv().await.unwrap();
        assert_eq!(first, json!({"n": 1}));
    }
}
