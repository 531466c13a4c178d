//! Expiry listener — a callback invoked with each tick's evicted batch.
//!
//! # Example
//! ```
//! use std::sync::{Arc, Mutex};
//! use std::time::Duration;
//! use lapse::{ExpiryFolder, ExpiryStrategy};
//!
//! let expired: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
//! let log = Arc::clone(&expired);
//!
//! let strategy = ExpiryStrategy::new(
//!     Duration::from_millis(100),
//!     Duration::from_millis(20),
//! ).unwrap();
//! let folder: ExpiryFolder<String, u64> = ExpiryFolder::builder("sessions")
//!     .on_expired(move |entries| {
//!         log.lock().unwrap().extend(entries.keys().cloned());
//!     })
//!     .build(&strategy);
//!
//! folder.put("s-1".to_string(), 7).unwrap();
//! ```

use std::sync::Arc;

use ahash::AHashMap;

/// The batch of entries evicted by a single tick, as handed to listeners.
pub type ExpiredEntries<K, V> = AHashMap<K, Arc<V>>;

// ---------------------------------------------------------------------------
// ExpiryListener trait
// ---------------------------------------------------------------------------

/// A callback invoked each time a tick evicts entries from a folder.
///
/// Listeners run synchronously on the expiry driver thread, after the
/// folder's internal locks have been released, and **only for non-empty
/// batches** — a tick that evicts nothing notifies nobody.
///
/// Registration is by reference: registering the same listener twice means
/// it is notified twice per tick, and it must be removed twice to fully
/// unregister.
///
/// Reading from or writing to the notifying folder inside the callback is
/// fine (its locks are free by then), but constructing or registering
/// folders on the same strategy from inside a listener deadlocks the
/// driver.
pub trait ExpiryListener<K, V>: Send + Sync + 'static {
    fn expired(&self, entries: &ExpiredEntries<K, V>);
}

/// An [`ExpiryListener`] backed by a closure.
///
/// Created via [`FolderBuilder::on_expired`](crate::FolderBuilder::on_expired),
/// or wrapped in an `Arc` and registered with
/// [`ExpiryFolder::add_listener`](crate::ExpiryFolder::add_listener).
pub struct FnListener<F>(pub F);

impl<K, V, F> ExpiryListener<K, V> for FnListener<F>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    F: Fn(&ExpiredEntries<K, V>) + Send + Sync + 'static,
{
    fn expired(&self, entries: &ExpiredEntries<K, V>) {
        (self.0)(entries)
    }
}
