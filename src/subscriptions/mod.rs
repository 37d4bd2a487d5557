//! Subscription system for live updates.
//!
//! Each subscriber gets a bounded channel. Items are whole snapshots, so a
//! subscriber that falls behind only ever needs the newest one: when its
//! buffer is full the oldest pending item is discarded instead of dropping
//! the subscriber.
//!
//! # Example
//!
//! ```ignore
//! let manager = SubscriptionManager::new();
//! let handle = manager.subscribe();
//!
//! manager.broadcast(snapshot);
//!
//! while let Ok(snapshot) = handle.recv() {
//!     render(&snapshot);
//! }
//! ```

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{SubscriptionConfig, SubscriptionHandle, SubscriptionId};
