// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! In-memory publish/subscribe hub for real-time clients.
//!
//! Built on a bounded [`tokio::sync::broadcast`] ring. Publishing never blocks and never fails;
//! a subscriber that falls behind loses the oldest events and is told how many it skipped.
//! Each subscribe and unsubscribe publishes a `userCount` event with the new count.

use callrelay_api::ServerEvent;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::metrics::CallMetrics;

pub const DEFAULT_CAPACITY: usize = 256;

struct Hub {
    tx: broadcast::Sender<Arc<ServerEvent>>,
    subscribers: Mutex<HashSet<u64>>,
    next_id: AtomicU64,
}

impl Hub {
    fn send(&self, event: ServerEvent) -> usize {
        // An error only means nobody is listening right now.
        self.tx.send(Arc::new(event)).unwrap_or(0)
    }

    fn remove(&self, id: u64) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        if subscribers.remove(&id) {
            let count = subscribers.len();
            self.send(ServerEvent::UserCount(count));
            drop(subscribers);
            CallMetrics::shared().record_subscribers(count);
            tracing::debug!(subscribers = count, "Subscriber removed");
        }
    }
}

/// Fan-out of [`ServerEvent`]s to every connected subscriber.
///
/// Cheap to clone; all clones share one subscription set.
#[derive(Clone)]
pub struct Broadcaster {
    hub: Arc<Hub>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            hub: Arc::new(Hub {
                tx,
                subscribers: Mutex::new(HashSet::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Registers a new subscriber. It receives every event published from now on, starting
    /// with the `userCount` update its own arrival causes.
    pub fn subscribe(&self) -> Subscription {
        let id = self.hub.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self.hub.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        let rx = self.hub.tx.subscribe();
        subscribers.insert(id);
        let count = subscribers.len();
        self.hub.send(ServerEvent::UserCount(count));
        drop(subscribers);

        CallMetrics::shared().record_subscribers(count);
        tracing::debug!(subscribers = count, "Subscriber added");
        Subscription { id, rx, hub: Arc::clone(&self.hub) }
    }

    /// Removes a subscriber. Equivalent to dropping the [`Subscription`].
    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    /// Delivers `event` to every subscription active right now. Returns how many receivers
    /// the event was queued for.
    pub fn publish(&self, event: ServerEvent) -> usize {
        self.hub.send(event)
    }

    pub fn connected_users(&self) -> usize {
        self.hub.subscribers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    rx: broadcast::Receiver<Arc<ServerEvent>>,
    hub: Arc<Hub>,
}

impl Subscription {
    /// Waits for the next event.
    ///
    /// # Errors
    ///
    /// - [`RecvError::Lagged`] when events were dropped because this subscriber fell behind;
    ///   the next call resumes with the oldest retained event.
    /// - [`RecvError::Closed`] when the broadcaster is gone.
    pub async fn recv(&mut self) -> Result<Arc<ServerEvent>, RecvError> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.remove(self.id);
    }
}
