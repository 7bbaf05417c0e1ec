// Inbound frame dispatch.
// Decodes raw frames into envelopes and fans them out to subscribers.
// A malformed frame is logged and dropped; it never tears down the
// connection or affects later frames.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use log::warn;
use tokio::sync::watch;

use super::protocol::Envelope;

pub type Handler = Arc<dyn Fn(&Envelope) + Send + Sync + 'static>;

type SubscriberList = Mutex<Vec<(u64, Handler)>>;

/// Fan-out point for decoded envelopes.
///
/// Subscribers are invoked synchronously in subscription order. The most
/// recent envelope is additionally published into a `watch` slot for
/// consumers that only care about "what just happened".
pub struct EventDispatcher {
    subscribers: Arc<SubscriberList>,
    next_id: AtomicU64,
    latest: watch::Sender<Option<Envelope>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        let (latest, _) = watch::channel(None);
        EventDispatcher {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
            latest,
        }
    }

    /// Register a handler; it is called for every envelope until the
    /// returned subscription is cancelled.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push((id, Arc::new(handler)));
        }
        Subscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    /// Last-value view of the envelope stream. Receivers see `None` until
    /// the first envelope arrives.
    pub fn latest(&self) -> watch::Receiver<Option<Envelope>> {
        self.latest.subscribe()
    }

    /// Decode a raw frame and dispatch it. Returns the decoded envelope so
    /// the caller can apply it to its own state in delivery order.
    pub fn ingest(&self, raw: &str) -> Option<Envelope> {
        match serde_json::from_str::<Envelope>(raw) {
            Ok(envelope) => {
                self.dispatch(envelope.clone());
                Some(envelope)
            }
            Err(e) => {
                warn!("Dropping malformed inbound frame: {}", e);
                None
            }
        }
    }

    /// Deliver an envelope to every current subscriber, then update the
    /// last-value slot. The subscriber list is snapshotted first, so a
    /// cancellation from inside a handler does not affect delivery to the
    /// rest of the current pass.
    pub fn dispatch(&self, envelope: Envelope) {
        let snapshot: Vec<Handler> = match self.subscribers.lock() {
            Ok(subs) => subs.iter().map(|(_, h)| h.clone()).collect(),
            Err(_) => Vec::new(),
        };
        for handler in snapshot {
            handler(&envelope);
        }
        let _ = self.latest.send(Some(envelope));
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`EventDispatcher::subscribe`]. Cancelling removes
/// the handler; dropping the handle without cancelling leaves it active
/// for the lifetime of the dispatcher.
pub struct Subscription {
    id: u64,
    subscribers: Weak<SubscriberList>,
}

impl Subscription {
    pub fn cancel(self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            if let Ok(mut subs) = subscribers.lock() {
                subs.retain(|(id, _)| *id != self.id);
            }
        }
    }
}
