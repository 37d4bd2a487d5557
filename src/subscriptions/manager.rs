//! Subscription manager for broadcasting live updates.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::types::{Registry, SubscriptionConfig, SubscriptionHandle, SubscriptionId};

/// Internal subscription state.
pub(crate) struct Subscription<T> {
    sender: Sender<T>,
    /// Second receiver on the same channel, used to throw away the oldest
    /// pending item when the subscriber falls behind.
    drain: Receiver<T>,
}

impl<T> Subscription<T> {
    /// Deliver an item, discarding the oldest pending one if the buffer is
    /// full. Returns false if the item could not be queued.
    fn deliver(&self, item: T) -> bool {
        match self.sender.try_send(item) {
            Ok(()) => true,
            Err(TrySendError::Full(item)) => {
                let _ = self.drain.try_recv();
                self.sender.try_send(item).is_ok()
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Manages subscriptions and broadcasts items to them.
///
/// Subscribers only see items broadcast while they are attached; nothing is
/// replayed to a late subscriber.
pub struct SubscriptionManager<T> {
    /// Active subscriptions by ID.
    registry: Arc<Registry<T>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
    config: SubscriptionConfig,
}

impl<T: Clone> SubscriptionManager<T> {
    /// Create a new subscription manager.
    pub fn new() -> Self {
        Self::with_config(SubscriptionConfig::default())
    }

    pub fn with_config(config: SubscriptionConfig) -> Self {
        Self {
            registry: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            config,
        }
    }

    /// Create a new subscription.
    pub fn subscribe(&self) -> SubscriptionHandle<T> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(self.config.buffer_size.max(1));

        let subscription = Subscription {
            sender,
            drain: receiver.clone(),
        };

        self.registry.write().insert(id, subscription);

        SubscriptionHandle {
            id,
            receiver,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Detach a subscriber. Dropping its handle does the same.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.registry.write().remove(&id);
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.registry.read().len()
    }

    /// Send an item to every attached subscriber.
    /// Returns the subscribers it was queued for.
    pub fn broadcast(&self, item: T) -> Vec<SubscriptionId> {
        let subs = self.registry.read();
        subs.iter()
            .filter(|(_, sub)| sub.deliver(item.clone()))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Send an item to one subscriber.
    /// Returns false if the subscription is gone.
    pub fn send_to(&self, id: SubscriptionId, item: T) -> bool {
        let subs = self.registry.read();
        match subs.get(&id) {
            Some(sub) => sub.deliver(item),
            None => false,
        }
    }
}

impl<T: Clone> Default for SubscriptionManager<T> {
    fn default() -> Self {
        Self::new()
    }
}
