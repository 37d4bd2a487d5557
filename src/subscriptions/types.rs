//! Subscription types for live updates.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Weak;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvError, RecvTimeoutError, TryRecvError};

use super::manager::Subscription;

pub(crate) type Registry<T> = RwLock<HashMap<SubscriptionId, Subscription<T>>>;

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered items. When full, the oldest pending item is discarded
    /// in favour of the newest.
    /// Default: 64
    pub buffer_size: usize,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self { buffer_size: 64 }
    }
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle to a live subscription. Dropping it detaches the subscriber.
pub struct SubscriptionHandle<T> {
    pub(crate) id: SubscriptionId,
    pub(crate) receiver: Receiver<T>,
    pub(crate) registry: Weak<Registry<T>>,
}

impl<T> SubscriptionHandle<T> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The underlying channel, for use in `select!`.
    pub fn receiver(&self) -> &Receiver<T> {
        &self.receiver
    }

    /// Receive the next item (blocking).
    pub fn recv(&self) -> Result<T, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an item (non-blocking).
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything pending and return only the newest item.
    pub fn latest(&self) -> Option<T> {
        self.receiver.try_iter().last()
    }
}

impl<T> Drop for SubscriptionHandle<T> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.write().remove(&self.id);
        }
    }
}

impl<T> std::fmt::Debug for SubscriptionHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("pending", &self.receiver.len())
            .finish()
    }
}
