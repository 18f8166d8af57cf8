//! # Payment Notification Broker
//!
//! Process-local publish/subscribe keyed by DID. A client waiting on a
//! payment subscribes to its DID; the webhook handler publishes `paid`
//! once the registration is finalized.
//!
//! ## Design
//!
//! ```text
//!   publish(id, payload) ──► mpsc ──► dispatcher task ──try_send──► subscriber 1
//!                                          │ (read lock)  ──try_send──► subscriber 2
//!   subscribe / unsubscribe ──(write lock)─┘
//! ```
//!
//! - One dispatcher task per broker performs all delivery. It only ever
//!   takes the read lock.
//! - Membership changes take the write lock, directly from the caller.
//! - Every subscriber has its own bounded channel. Delivery uses
//!   `try_send`: a full channel drops the payload for that subscriber
//!   only, so a stalled reader never holds up the others.
//! - Dropping a [`Subscription`] removes it; an identifier with no
//!   subscribers left is removed from the map.
//!
//! The dispatcher exits once every [`PaymentBroker`] handle is dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::config::{PAID_EVENT, SUBSCRIBER_BUFFER};

type Subscribers = RwLock<HashMap<String, HashMap<u64, mpsc::Sender<String>>>>;

/// A payload addressed to every subscriber of `id`.
#[derive(Debug)]
struct Message {
    id: String,
    payload: String,
}

/// Handle to the broker. Cheap to clone; all clones share one dispatcher.
#[derive(Debug, Clone)]
pub struct PaymentBroker {
    messages: mpsc::UnboundedSender<Message>,
    subscribers: Arc<Subscribers>,
    next_key: Arc<AtomicU64>,
}

impl PaymentBroker {
    /// Create a broker and spawn its dispatcher on the current runtime.
    pub fn start() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscribers = Arc::new(Subscribers::default());
        tokio::spawn(dispatch(rx, Arc::clone(&subscribers)));
        Self {
            messages: tx,
            subscribers,
            next_key: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register a new listener for `id`.
    pub fn subscribe(&self, id: &str) -> Subscription {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.subscribers
            .write()
            .entry(id.to_string())
            .or_default()
            .insert(key, tx);
        debug!(did = %id, subscriber = key, "subscribed");

        Subscription {
            id: id.to_string(),
            key,
            receiver: rx,
            subscribers: Arc::clone(&self.subscribers),
            active: true,
        }
    }

    /// Send `payload` to every current subscriber of `id`. Never blocks.
    pub fn publish(&self, id: &str, payload: impl Into<String>) {
        let message = Message {
            id: id.to_string(),
            payload: payload.into(),
        };
        if self.messages.send(message).is_err() {
            warn!(did = %id, "broker dispatcher is gone, dropping message");
        }
    }

    /// Tell everyone waiting on `id` that it has been paid for.
    pub fn broadcast_payment(&self, id: &str) {
        debug!(did = %id, "broadcasting payment");
        self.publish(id, PAID_EVENT);
    }

    /// Number of live subscriptions for `id`.
    pub fn subscriber_count(&self, id: &str) -> usize {
        self.subscribers.read().get(id).map_or(0, HashMap::len)
    }

    /// Number of identifiers with at least one subscriber.
    pub fn topic_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

async fn dispatch(mut messages: mpsc::UnboundedReceiver<Message>, subscribers: Arc<Subscribers>) {
    while let Some(Message { id, payload }) = messages.recv().await {
        let targets: Vec<(u64, mpsc::Sender<String>)> = match subscribers.read().get(&id) {
            Some(channels) => channels.iter().map(|(k, tx)| (*k, tx.clone())).collect(),
            None => Vec::new(),
        };
        trace!(did = %id, subscribers = targets.len(), "dispatching");

        for (key, tx) in targets {
            match tx.try_send(payload.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(did = %id, subscriber = key, "subscriber is full, dropping message");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    trace!(did = %id, subscriber = key, "subscriber already gone");
                }
            }
        }
    }
    debug!("broker dispatcher stopped");
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// One listener on one identifier. Unsubscribes on drop.
#[derive(Debug)]
pub struct Subscription {
    id: String,
    key: u64,
    receiver: mpsc::Receiver<String>,
    subscribers: Arc<Subscribers>,
    active: bool,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the next payload. `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    /// Remove this listener. Calling it again is a no-op.
    pub fn unsubscribe(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;

        let mut map = self.subscribers.write();
        if let Some(channels) = map.get_mut(&self.id) {
            channels.remove(&self.key);
            if channels.is_empty() {
                map.remove(&self.id);
            }
        }
        drop(map);

        self.receiver.close();
        debug!(did = %self.id, subscriber = self.key, "unsubscribed");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    const DID: &str = "did:web:example.com:alice";

    async fn next(sub: &mut Subscription) -> Option<String> {
        timeout(Duration::from_secs(2), sub.recv()).await.ok().flatten()
    }

    #[tokio::test]
    async fn fans_out_to_every_subscriber() {
        let broker = PaymentBroker::start();
        let mut subs: Vec<_> = (0..5).map(|_| broker.subscribe(DID)).collect();
        assert_eq!(broker.subscriber_count(DID), 5);

        broker.broadcast_payment(DID);

        for sub in &mut subs {
            assert_eq!(next(sub).await.as_deref(), Some(PAID_EVENT));
        }
    }

    #[tokio::test]
    async fn other_identifiers_are_not_notified() {
        let broker = PaymentBroker::start();
        let mut alice = broker.subscribe(DID);
        let mut bob = broker.subscribe("did:web:example.com:bob");

        broker.broadcast_payment(DID);

        assert_eq!(next(&mut alice).await.as_deref(), Some(PAID_EVENT));
        assert!(timeout(Duration::from_millis(100), bob.recv()).await.is_err());
    }

    #[tokio::test]
    async fn dropped_subscriber_is_removed() {
        let broker = PaymentBroker::start();
        let gone = broker.subscribe(DID);
        let mut stays = broker.subscribe(DID);
        drop(gone);

        assert_eq!(broker.subscriber_count(DID), 1);
        broker.publish(DID, "hello");
        assert_eq!(next(&mut stays).await.as_deref(), Some("hello"));

        drop(stays);
        assert_eq!(broker.subscriber_count(DID), 0);
        assert_eq!(broker.topic_count(), 0);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let broker = PaymentBroker::start();
        let mut sub = broker.subscribe(DID);
        let _other = broker.subscribe(DID);

        sub.unsubscribe();
        sub.unsubscribe();
        assert_eq!(broker.subscriber_count(DID), 1);
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn stalled_subscriber_does_not_block_others() {
        let broker = PaymentBroker::start();
        let mut stalled = broker.subscribe(DID);
        let mut reader = broker.subscribe(DID);

        let total = SUBSCRIBER_BUFFER + 4;
        for i in 0..total {
            broker.publish(DID, i.to_string());
            assert_eq!(next(&mut reader).await, Some(i.to_string()));
        }

        // The stalled channel kept the first SUBSCRIBER_BUFFER payloads.
        for i in 0..SUBSCRIBER_BUFFER {
            assert_eq!(next(&mut stalled).await, Some(i.to_string()));
        }
        assert!(timeout(Duration::from_millis(100), stalled.recv()).await.is_err());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_harmless() {
        let broker = PaymentBroker::start();
        broker.broadcast_payment(DID);
        // Let the dispatcher run the first message against an empty map.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut late = broker.subscribe(DID);
        broker.publish(DID, "after");
        assert_eq!(next(&mut late).await.as_deref(), Some("after"));
    }
}
