//! Session-scoped metadata publisher.
//!
//! Holds the latest [`MetadataTick`] for late joiners and fans every server
//! message out to the session's subscribers.
//!
//! # Backpressure
//!
//! Each subscriber owns a bounded queue. Broadcasting never waits: a message
//! is serialized once and offered to each queue with `try_send`. A subscriber
//! whose queue is full has fallen behind the live stream and is disconnected
//! (its sender is dropped, so its connection task sees the stream end). One
//! slow client therefore never delays the control loop or other clients.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use ptz_core::{MetadataTick, SessionId};
use ptz_protocol::ServerMessage;

/// Identifier for one subscription.
pub type SubscriberId = u64;

/// Serialized message as delivered to subscribers.
pub type Payload = Arc<str>;

pub struct MetadataPublisher {
    session_id: SessionId,
    latest: Mutex<Option<MetadataTick>>,
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<Payload>>>,
    next_id: AtomicU64,
    queue_capacity: usize,
    closed: AtomicBool,
}

impl MetadataPublisher {
    /// `queue_capacity` is clamped to at least 1.
    pub fn new(session_id: SessionId, queue_capacity: usize) -> Self {
        Self {
            session_id,
            latest: Mutex::new(None),
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Replaces the latest snapshot and broadcasts it.
    pub fn update(&self, tick: MetadataTick) {
        *lock(&self.latest) = Some(tick.clone());
        self.broadcast(&ServerMessage::metadata_tick(tick));
    }

    /// Full copy of the latest snapshot.
    pub fn latest(&self) -> Option<MetadataTick> {
        lock(&self.latest).clone()
    }

    /// Sends `msg` to every subscriber. Returns the number it was queued for.
    pub fn broadcast(&self, msg: &ServerMessage) -> usize {
        let payload: Payload = match serde_json::to_string(msg) {
            Ok(json) => json.into(),
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "Failed to serialize message");
                return 0;
            }
        };

        let mut subscribers = lock(&self.subscribers);
        let mut delivered = 0;
        subscribers.retain(|id, tx| match tx.try_send(Arc::clone(&payload)) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    session_id = %self.session_id,
                    subscriber = id,
                    queue = self.queue_capacity,
                    "Subscriber queue full, disconnecting slow client"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(session_id = %self.session_id, subscriber = id, "Subscriber gone");
                false
            }
        });
        delivered
    }

    /// Registers a new subscriber.
    ///
    /// After [`close_all`](Self::close_all) the returned receiver is already
    /// closed.
    pub fn subscribe(&self) -> (SubscriberId, mpsc::Receiver<Payload>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.queue_capacity);

        let mut subscribers = lock(&self.subscribers);
        if !self.closed.load(Ordering::Acquire) {
            subscribers.insert(id, tx);
        }
        (id, rx)
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        lock(&self.subscribers).remove(&id);
    }

    /// Disconnects every subscriber and refuses new ones.
    pub fn close_all(&self) {
        let mut subscribers = lock(&self.subscribers);
        self.closed.store(true, Ordering::Release);
        let count = subscribers.len();
        subscribers.clear();
        debug!(session_id = %self.session_id, subscribers = count, "Publisher closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
