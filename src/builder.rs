use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use crate::folder::ExpiryFolder;
use crate::listener::{ExpiredEntries, ExpiryListener, FnListener};
use crate::strategy::ExpiryStrategy;

/// Default bound on admission-queue waits for a folder's internal locks.
const DEFAULT_MAX_QUEUE_WAIT: Duration = Duration::from_secs(30);

/// Builder for configuring and constructing an [`ExpiryFolder`].
///
/// # Example
/// ```
/// use std::time::Duration;
/// use lapse::{ExpiryFolder, ExpiryStrategy};
///
/// let strategy = ExpiryStrategy::new(
///     Duration::from_secs(60),
///     Duration::from_secs(10),
/// ).unwrap();
/// let folder: ExpiryFolder<String, String> = ExpiryFolder::builder("dns")
///     .max_queue_wait(Duration::from_secs(5))
///     .build(&strategy);
/// ```
pub struct FolderBuilder<K, V> {
    name: String,
    strict: bool,
    max_queue_wait: Duration,
    listeners: Vec<Arc<dyn ExpiryListener<K, V>>>,
}

impl<K, V> FolderBuilder<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub(crate) fn new(name: impl Into<String>) -> Self {
        FolderBuilder {
            name: name.into(),
            strict: false,
            max_queue_wait: DEFAULT_MAX_QUEUE_WAIT,
            listeners: Vec::new(),
        }
    }

    /// Fail fast (panic) on lock-protocol violations instead of logging and
    /// recovering.  Intended for development and test configurations.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Bounds the time any single operation may wait for one of the
    /// folder's internal locks before failing with
    /// [`QueueTimeout`](crate::QueueTimeout).  Must be non-zero
    /// (default: 30 s).
    pub fn max_queue_wait(mut self, max_queue_wait: Duration) -> Self {
        assert!(!max_queue_wait.is_zero(), "max_queue_wait must be non-zero");
        self.max_queue_wait = max_queue_wait;
        self
    }

    /// Registers an expiry listener closure.
    ///
    /// The closure is called synchronously on the expiry driver thread,
    /// once per tick that evicts at least one entry.
    ///
    /// # Example
    /// ```
    /// use std::time::Duration;
    /// use lapse::{ExpiryFolder, ExpiryStrategy};
    ///
    /// let strategy = ExpiryStrategy::new(
    ///     Duration::from_secs(60),
    ///     Duration::from_secs(10),
    /// ).unwrap();
    /// let folder: ExpiryFolder<u64, u64> = ExpiryFolder::builder("quotas")
    ///     .on_expired(|entries| {
    ///         println!("{} quota entries lapsed", entries.len());
    ///     })
    ///     .build(&strategy);
    /// ```
    pub fn on_expired<F>(mut self, f: F) -> Self
    where
        F: Fn(&ExpiredEntries<K, V>) + Send + Sync + 'static,
    {
        self.listeners.push(Arc::new(FnListener(f)));
        self
    }

    /// Registers a listener via the [`ExpiryListener`] trait.
    pub fn listener(mut self, listener: Arc<dyn ExpiryListener<K, V>>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Builds the folder and registers it with `strategy`.
    pub fn build(self, strategy: &ExpiryStrategy) -> ExpiryFolder<K, V> {
        ExpiryFolder::from_parts(
            self.name,
            strategy,
            self.strict,
            self.max_queue_wait,
            self.listeners,
        )
    }
}
