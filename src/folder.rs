//! The generational expiring store.
//!
//! ## Aging model
//!
//! A folder holds one `recently_accessed` map plus `slot_count` aging
//! generations.  Each tick (driven by the owning [`ExpiryStrategy`])
//! demotes the recently-accessed map to the youngest slot, shifts every
//! slot one step older, and evicts the oldest outright.  A `get` relocates
//! its entry back to `recently_accessed`, so an entry's remaining lifetime
//! after a put or a get is always within `[time_out, time_out + precision)`
//! — never less than the time-out, at most one extra precision window.
//!
//! ## Locking
//!
//! `recently_accessed` and the slot ring are independent resources, each
//! behind its own [`Doorman`].  Whenever both are held, the
//! recently-accessed guard is acquired first and released as early as
//! possible — it is the high-traffic resource.  The entry count lives in a
//! separate atomic so `size()` touches neither doorman.  Listener
//! notification works from a snapshot of the evicted batch and runs after
//! both guards are released, so arbitrary listener code can never block
//! the folder's own locks.

use std::collections::VecDeque;
use std::hash::Hash;
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::builder::FolderBuilder;
use crate::doorman::{Doorman, Guarded};
use crate::error::{CopyError, QueueTimeout};
use crate::listener::{ExpiredEntries, ExpiryListener};
use crate::stats::{FolderStats, StatsCounter};
use crate::strategy::{ExpiryStrategy, Tick};

/// One aging generation.
type Generation<K, V> = AHashMap<K, Arc<V>>;

// ---------------------------------------------------------------------------
// Folder interior
// ---------------------------------------------------------------------------

pub(crate) struct FolderInner<K, V> {
    name: String,
    strategy: ExpiryStrategy,
    /// The freshest generation: entries touched within the last tick window.
    recently_accessed: Guarded<Generation<K, V>>,
    /// Aging generations: front is the youngest, back is the oldest (next
    /// to be evicted).
    slots: Guarded<VecDeque<Generation<K, V>>>,
    /// Total entry count across all generations.
    size: AtomicUsize,
    listeners: Mutex<Vec<Arc<dyn ExpiryListener<K, V>>>>,
    stats: StatsCounter,
}

// ---------------------------------------------------------------------------
// Folder handle
// ---------------------------------------------------------------------------

/// A generational expiring key-value cache bound to an [`ExpiryStrategy`].
///
/// Entries expire between `time_out` and `time_out + precision` after they
/// were last put or retrieved via [`get`]; [`find`] peeks without extending
/// the lifetime.  Cloning the folder is cheap and shares the store.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use lapse::{ExpiryFolder, ExpiryStrategy};
///
/// let strategy = ExpiryStrategy::new(
///     Duration::from_secs(60),
///     Duration::from_secs(5),
/// ).unwrap();
/// let folder: ExpiryFolder<String, String> = ExpiryFolder::new("dns", &strategy);
/// folder.put("example.org".to_string(), "93.184.216.34".to_string()).unwrap();
/// assert!(folder.get(&"example.org".to_string()).unwrap().is_some());
/// ```
///
/// [`get`]: ExpiryFolder::get
/// [`find`]: ExpiryFolder::find
pub struct ExpiryFolder<K, V> {
    inner: Arc<FolderInner<K, V>>,
}

impl<K, V> Clone for ExpiryFolder<K, V> {
    fn clone(&self) -> Self {
        ExpiryFolder {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> ExpiryFolder<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates a folder with default settings and registers it with
    /// `strategy`.
    pub fn new(name: impl Into<String>, strategy: &ExpiryStrategy) -> Self {
        FolderBuilder::new(name).build(strategy)
    }

    /// Returns a [`FolderBuilder`] for configuring a new folder.
    pub fn builder(name: impl Into<String>) -> FolderBuilder<K, V> {
        FolderBuilder::new(name)
    }

    pub(crate) fn from_parts(
        name: String,
        strategy: &ExpiryStrategy,
        strict: bool,
        max_queue_wait: Duration,
        listeners: Vec<Arc<dyn ExpiryListener<K, V>>>,
    ) -> Self {
        let slot_count = strategy.slot_count();
        let slots: VecDeque<Generation<K, V>> =
            (0..slot_count).map(|_| Generation::new()).collect();

        let recently_accessed = Guarded::new(
            Doorman::new(format!("{name}/recently-accessed"), strict, max_queue_wait),
            Generation::new(),
        );
        let slots = Guarded::new(
            Doorman::new(format!("{name}/slots"), strict, max_queue_wait),
            slots,
        );

        let inner = Arc::new(FolderInner {
            name,
            strategy: strategy.clone(),
            recently_accessed,
            slots,
            size: AtomicUsize::new(0),
            listeners: Mutex::new(listeners),
            stats: StatsCounter::new(),
        });

        debug!(folder = %inner.name, slot_count, "folder attached to expiry strategy");
        let dyn_inner: Arc<dyn Tick> = Arc::clone(&inner) as Arc<dyn Tick>;
        let registration: std::sync::Weak<dyn Tick> = Arc::downgrade(&dyn_inner);
        strategy.folder_added(registration);

        ExpiryFolder { inner }
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    /// Looks up `key` and extends the matching entry's lifetime.
    ///
    /// On a hit in an aging slot the entry is relocated to the freshest
    /// generation, resetting its remaining lifetime to the full time-out
    /// window.  The more recently an entry was accessed, the faster the
    /// lookup.
    pub fn get(&self, key: &K) -> Result<Option<Arc<V>>, QueueTimeout> {
        // Fast path: the freshest generation, under shared access.
        {
            let recent = self.inner.recently_accessed.read()?;
            if let Some(value) = recent.get(key) {
                self.inner.stats.record_hit();
                return Ok(Some(Arc::clone(value)));
            }
        }

        // Slow path: relocate from a slot.  Holding the recently-accessed
        // write guard across the slot scan keeps the move atomic against a
        // concurrent tick or put — both take the guards in the same order.
        let mut recent = self.inner.recently_accessed.write()?;
        if let Some(value) = recent.get(key) {
            // A concurrent put or get landed the key while we re-entered.
            self.inner.stats.record_hit();
            return Ok(Some(Arc::clone(value)));
        }

        let relocated = {
            let mut slots = self.inner.slots.write()?;
            slots.iter_mut().find_map(|slot| slot.remove_entry(key))
        };

        match relocated {
            Some((key, value)) => {
                recent.insert(key, Arc::clone(&value));
                self.inner.stats.record_hit();
                Ok(Some(value))
            }
            None => {
                self.inner.stats.record_miss();
                Ok(None)
            }
        }
    }

    /// Looks up `key` without extending the entry's lifetime.
    pub fn find(&self, key: &K) -> Result<Option<Arc<V>>, QueueTimeout> {
        {
            let recent = self.inner.recently_accessed.read()?;
            if let Some(value) = recent.get(key) {
                self.inner.stats.record_hit();
                return Ok(Some(Arc::clone(value)));
            }
        }

        let slots = self.inner.slots.read()?;
        for slot in slots.iter() {
            if let Some(value) = slot.get(key) {
                self.inner.stats.record_hit();
                return Ok(Some(Arc::clone(value)));
            }
        }
        self.inner.stats.record_miss();
        Ok(None)
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Inserts `value` for `key`, overwriting any existing entry.
    ///
    /// The entry lands in the freshest generation; unless retrieved again
    /// it is evicted after between `time_out` and `time_out + precision`.
    pub fn put(&self, key: K, value: V) -> Result<(), QueueTimeout> {
        let value = Arc::new(value);

        let mut recent = self.inner.recently_accessed.write()?;
        let previous = recent.insert(key.clone(), value);

        // A key ages in at most one generation: when it was not already
        // fresh, purge any copy still sitting in a slot.
        let mut stale = None;
        if previous.is_none() {
            match self.inner.slots.write() {
                Ok(mut slots) => {
                    stale = slots.iter_mut().find_map(|slot| slot.remove(&key));
                }
                Err(timeout) => {
                    // Leave the folder as it was: a half-applied put could
                    // leave the key aging in two generations at once.
                    recent.remove(&key);
                    return Err(timeout);
                }
            }
        }
        drop(recent);

        if previous.is_none() && stale.is_none() {
            self.inner.size.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Removes the entry for `key` from whichever generation holds it.
    ///
    /// Returns the removed value, or `None` if the key was absent.  The
    /// second of two removals for the same key returns `None` and leaves
    /// the size untouched.
    pub fn remove(&self, key: &K) -> Result<Option<Arc<V>>, QueueTimeout> {
        let removed = {
            let mut recent = self.inner.recently_accessed.write()?;
            match recent.remove(key) {
                Some(value) => Some(value),
                None => {
                    let mut slots = self.inner.slots.write()?;
                    slots.iter_mut().find_map(|slot| slot.remove(key))
                }
            }
        };

        if removed.is_some() {
            self.inner.size.fetch_sub(1, Ordering::Relaxed);
        }
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Listeners
    // -----------------------------------------------------------------------

    /// Registers `listener` for expiry notification.
    ///
    /// Registration is by reference: the same listener registered twice is
    /// notified twice per tick, and must be removed twice.
    pub fn add_listener(&self, listener: Arc<dyn ExpiryListener<K, V>>) {
        self.inner.listeners.lock().push(listener);
    }

    /// Removes one registration of `listener`.
    ///
    /// Returns `false` when the listener was not registered.
    pub fn remove_listener(&self, listener: &Arc<dyn ExpiryListener<K, V>>) -> bool {
        let mut listeners = self.inner.listeners.lock();
        match listeners.iter().position(|l| Arc::ptr_eq(l, listener)) {
            Some(index) => {
                listeners.remove(index);
                true
            }
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Bulk-duplicates every generation of this folder into `target`.
    ///
    /// The copy is shallow: values stay shared behind their `Arc`s.  The
    /// target's previous contents are discarded and its size recomputed
    /// from what was copied.  Fails when `target` is this very folder, or
    /// when the two strategies disagree on precision — their generations
    /// would age at different rates.
    pub fn copy_into(&self, target: &ExpiryFolder<K, V>) -> Result<(), CopyError> {
        if Arc::ptr_eq(&self.inner, &target.inner) {
            return Err(CopyError::SameFolder);
        }
        let source_precision = self.inner.strategy.precision();
        let target_precision = target.inner.strategy.precision();
        if source_precision != target_precision {
            return Err(CopyError::PrecisionMismatch {
                source_precision,
                target_precision,
            });
        }

        // Same nesting order as every dual-resource path: each folder's
        // recently-accessed guard strictly before its slot guard.
        let src_recent = self.inner.recently_accessed.read()?;
        let mut dst_recent = target.inner.recently_accessed.write()?;
        let src_slots = self.inner.slots.read()?;
        let mut dst_slots = target.inner.slots.write()?;

        *dst_recent = src_recent.clone();
        let mut copied = dst_recent.len();
        let shared = dst_slots.len().min(src_slots.len());
        for (dst, src) in dst_slots.iter_mut().zip(src_slots.iter()) {
            *dst = src.clone();
            copied += dst.len();
        }
        // When the target holds more slots than the source (same precision,
        // longer time-out), its extra generations must not keep stale
        // entries that the recomputed size knows nothing about.
        for dst in dst_slots.iter_mut().skip(shared) {
            dst.clear();
        }

        drop(dst_slots);
        drop(src_slots);
        drop(dst_recent);
        drop(src_recent);

        target.inner.size.store(copied, Ordering::Relaxed);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Number of entries currently held, across all generations.
    pub fn size(&self) -> usize {
        self.inner.size.load(Ordering::Relaxed)
    }

    /// Name given to this folder at construction.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The strategy this folder is bound to.
    pub fn strategy(&self) -> &ExpiryStrategy {
        &self.inner.strategy
    }

    /// Returns a point-in-time snapshot of hit/miss/expiry statistics.
    pub fn stats(&self) -> FolderStats {
        self.inner.stats.snapshot()
    }
}

// ---------------------------------------------------------------------------
// Tick
// ---------------------------------------------------------------------------

impl<K, V> Tick for FolderInner<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Ages every generation by one precision window.
    ///
    /// Runs only on the strategy's driver thread.  Never propagates
    /// failure: a tick that cannot acquire a guard is logged and skipped,
    /// because unwinding out of the driver would silently halt eviction
    /// for every folder on the strategy.
    fn tick(&self) {
        let mut recent = match self.recently_accessed.write() {
            Ok(guard) => guard,
            Err(timeout) => {
                error!(folder = %self.name, error = %timeout, "tick skipped");
                return;
            }
        };
        let mut slots = match self.slots.write() {
            Ok(guard) => guard,
            Err(timeout) => {
                error!(folder = %self.name, error = %timeout, "tick skipped");
                return;
            }
        };

        // Demote the freshest generation and release its guard before the
        // slot shuffle — it is the high-traffic resource.
        let aged = mem::take(&mut *recent);
        drop(recent);

        let evicted = slots
            .pop_back()
            .expect("a strategy always derives at least one slot");
        slots.push_front(aged);
        drop(slots);

        let evicted_count = evicted.len();
        if evicted_count > 0 {
            self.stats.record_expired(evicted_count as u64);
            let prior = self
                .size
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |size| {
                    Some(size.saturating_sub(evicted_count))
                })
                .unwrap_or(0);
            if prior < evicted_count {
                warn!(folder = %self.name, "size dropped below zero, clamped");
            }
        }
        trace!(
            folder = %self.name,
            expired = evicted_count,
            size = self.size.load(Ordering::Relaxed),
            "tick"
        );

        if evicted_count == 0 {
            return;
        }

        // Snapshot the registrations so listener code runs without any
        // folder lock held.
        let listeners: Vec<_> = self.listeners.lock().clone();
        for listener in &listeners {
            listener.expired(&evicted);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SLOT_COUNT: usize = 5;

    /// A strategy whose driver will not fire during a test, so ticks can
    /// be driven by hand.
    fn idle_strategy() -> ExpiryStrategy {
        ExpiryStrategy::new(Duration::from_secs(50), Duration::from_secs(10)).unwrap()
    }

    fn folder(strategy: &ExpiryStrategy) -> ExpiryFolder<u8, u64> {
        ExpiryFolder::builder("test").strict(true).build(strategy)
    }

    #[test]
    fn put_get_roundtrip() {
        let strategy = idle_strategy();
        let f = folder(&strategy);
        f.put(1, 10).unwrap();
        assert_eq!(f.get(&1).unwrap(), Some(Arc::new(10)));
        assert_eq!(f.get(&2).unwrap(), None);
        assert_eq!(f.size(), 1);
        strategy.stop();
    }

    #[test]
    fn overwrite_keeps_a_single_entry() {
        let strategy = idle_strategy();
        let f = folder(&strategy);
        f.put(1, 10).unwrap();
        f.put(1, 20).unwrap();
        assert_eq!(f.get(&1).unwrap(), Some(Arc::new(20)));
        assert_eq!(f.size(), 1, "overwrite must not create a second entry");
        strategy.stop();
    }

    #[test]
    fn reput_of_aged_key_keeps_a_single_entry() {
        let strategy = idle_strategy();
        let f = folder(&strategy);
        f.put(1, 10).unwrap();
        f.inner.tick(); // key now ages in the youngest slot
        f.put(1, 20).unwrap();
        assert_eq!(f.size(), 1, "re-put must purge the aging copy");

        // The stale copy must not resurface after the fresh one is removed.
        assert_eq!(f.remove(&1).unwrap(), Some(Arc::new(20)));
        assert_eq!(f.find(&1).unwrap(), None);
        assert_eq!(f.size(), 0);
        strategy.stop();
    }

    #[test]
    fn entries_survive_exactly_slot_count_ticks() {
        let strategy = idle_strategy();
        let f = folder(&strategy);
        f.put(1, 10).unwrap();

        // fresh → slots[0] → … → slots[last]: still present.
        for _ in 0..SLOT_COUNT {
            f.inner.tick();
            assert_eq!(f.find(&1).unwrap(), Some(Arc::new(10)));
        }
        // One more tick evicts it.
        f.inner.tick();
        assert_eq!(f.find(&1).unwrap(), None);
        assert_eq!(f.size(), 0);
        strategy.stop();
    }

    #[test]
    fn get_resets_the_age() {
        let strategy = idle_strategy();
        let f = folder(&strategy);
        f.put(1, 10).unwrap();

        f.inner.tick();
        f.inner.tick();
        assert_eq!(f.get(&1).unwrap(), Some(Arc::new(10))); // relocates

        // A freshly touched entry gets the full window again.
        for _ in 0..SLOT_COUNT {
            f.inner.tick();
            assert_eq!(f.find(&1).unwrap(), Some(Arc::new(10)));
        }
        f.inner.tick();
        assert_eq!(f.find(&1).unwrap(), None);
        strategy.stop();
    }

    #[test]
    fn find_does_not_reset_the_age() {
        let strategy = idle_strategy();
        let f = folder(&strategy);
        f.put(1, 10).unwrap();

        for _ in 0..SLOT_COUNT {
            f.inner.tick();
            assert!(f.find(&1).unwrap().is_some());
        }
        // The finds above must not have extended the lifetime.
        f.inner.tick();
        assert_eq!(f.find(&1).unwrap(), None);
        strategy.stop();
    }

    #[test]
    fn remove_is_idempotent() {
        let strategy = idle_strategy();
        let f = folder(&strategy);
        f.put(1, 10).unwrap();
        assert_eq!(f.remove(&1).unwrap(), Some(Arc::new(10)));
        assert_eq!(f.size(), 0);
        assert_eq!(f.remove(&1).unwrap(), None);
        assert_eq!(f.size(), 0, "second removal must not touch the size");
        strategy.stop();
    }

    #[test]
    fn remove_reaches_into_slots() {
        let strategy = idle_strategy();
        let f = folder(&strategy);
        f.put(1, 10).unwrap();
        f.inner.tick();
        f.inner.tick();
        assert_eq!(f.remove(&1).unwrap(), Some(Arc::new(10)));
        assert_eq!(f.size(), 0);
        strategy.stop();
    }

    #[test]
    fn listener_sees_each_evicted_key_once() {
        use std::sync::Mutex as StdMutex;

        let strategy = idle_strategy();
        let log: Arc<StdMutex<Vec<u8>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let f: ExpiryFolder<u8, u64> = ExpiryFolder::builder("test")
            .strict(true)
            .on_expired(move |entries| {
                sink.lock().unwrap().extend(entries.keys().copied());
            })
            .build(&strategy);

        f.put(1, 10).unwrap();
        f.put(2, 20).unwrap();
        for _ in 0..=SLOT_COUNT {
            f.inner.tick();
        }

        let mut seen = log.lock().unwrap().clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2], "every evicted key exactly once");
        assert_eq!(f.find(&1).unwrap(), None);
        strategy.stop();
    }

    #[test]
    fn empty_ticks_notify_nobody() {
        use std::sync::atomic::AtomicUsize;

        let strategy = idle_strategy();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let f: ExpiryFolder<u8, u64> = ExpiryFolder::builder("test")
            .on_expired(move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
            })
            .build(&strategy);

        for _ in 0..3 {
            f.inner.tick();
        }
        assert_eq!(calls.load(Ordering::Relaxed), 0);
        strategy.stop();
    }

    #[test]
    fn double_registration_notifies_twice() {
        use std::sync::atomic::AtomicUsize;

        let strategy = idle_strategy();
        let f = folder(&strategy);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let listener: Arc<dyn ExpiryListener<u8, u64>> =
            Arc::new(crate::listener::FnListener(move |_: &ExpiredEntries<u8, u64>| {
                counter.fetch_add(1, Ordering::Relaxed);
            }));
        f.add_listener(Arc::clone(&listener));
        f.add_listener(Arc::clone(&listener));

        f.put(1, 10).unwrap();
        for _ in 0..=SLOT_COUNT {
            f.inner.tick();
        }
        assert_eq!(calls.load(Ordering::Relaxed), 2);

        // One removal leaves one registration live.
        assert!(f.remove_listener(&listener));
        f.put(2, 20).unwrap();
        for _ in 0..=SLOT_COUNT {
            f.inner.tick();
        }
        assert_eq!(calls.load(Ordering::Relaxed), 3);

        assert!(f.remove_listener(&listener));
        assert!(!f.remove_listener(&listener));
        strategy.stop();
    }

    #[test]
    fn copy_into_itself_is_rejected() {
        let strategy = idle_strategy();
        let f = folder(&strategy);
        assert!(matches!(
            f.copy_into(&f.clone()),
            Err(CopyError::SameFolder)
        ));
        strategy.stop();
    }

    #[test]
    fn copy_between_precisions_is_rejected() {
        let strategy = idle_strategy();
        let other = ExpiryStrategy::new(Duration::from_secs(50), Duration::from_secs(5)).unwrap();
        let f = folder(&strategy);
        let g = folder(&other);
        assert!(matches!(
            f.copy_into(&g),
            Err(CopyError::PrecisionMismatch { .. })
        ));
        strategy.stop();
        other.stop();
    }

    #[test]
    fn copy_carries_generations_and_size() {
        let strategy = idle_strategy();
        let f = folder(&strategy);
        let g = folder(&strategy);

        f.put(1, 10).unwrap();
        f.inner.tick();
        f.put(2, 20).unwrap(); // 1 ages in a slot, 2 is fresh
        g.put(9, 90).unwrap(); // will be discarded by the copy

        f.copy_into(&g).unwrap();
        assert_eq!(g.size(), 2);
        assert_eq!(g.find(&1).unwrap(), Some(Arc::new(10)));
        assert_eq!(g.find(&2).unwrap(), Some(Arc::new(20)));
        assert_eq!(g.find(&9).unwrap(), None);

        // Shallow copy: both folders hand out the same allocation.
        let from_f = f.find(&2).unwrap().unwrap();
        let from_g = g.find(&2).unwrap().unwrap();
        assert!(Arc::ptr_eq(&from_f, &from_g));
        strategy.stop();
    }

    #[test]
    fn stats_track_hits_misses_and_expiry() {
        let strategy = idle_strategy();
        let f = folder(&strategy);
        f.put(1, 10).unwrap();
        f.get(&1).unwrap();
        f.find(&1).unwrap();
        f.get(&2).unwrap();
        for _ in 0..=SLOT_COUNT {
            f.inner.tick();
        }

        let stats = f.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expired, 1);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.lookup_count(), 3);
        strategy.stop();
    }

    // -----------------------------------------------------------------------
    // Size invariant, property-tested against a model
    // -----------------------------------------------------------------------

    #[derive(Clone, Debug)]
    enum Op {
        Put(u8),
        Get(u8),
        Remove(u8),
        Tick,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..8).prop_map(Op::Put),
            (0u8..8).prop_map(Op::Get),
            (0u8..8).prop_map(Op::Remove),
            Just(Op::Tick),
        ]
    }

    proptest! {
        /// After any sequence of operations, `size()` equals the number of
        /// distinct keys still retrievable.
        #[test]
        fn size_matches_distinct_live_keys(ops in proptest::collection::vec(op(), 0..120)) {
            let strategy = idle_strategy();
            let f = folder(&strategy);
            // Model: key → ticks survived since it was last put or got.
            let mut model: AHashMap<u8, usize> = AHashMap::new();

            for op in ops {
                match op {
                    Op::Put(k) => {
                        f.put(k, u64::from(k)).unwrap();
                        model.insert(k, 0);
                    }
                    Op::Get(k) => {
                        let got = f.get(&k).unwrap();
                        prop_assert_eq!(got.is_some(), model.contains_key(&k));
                        if got.is_some() {
                            model.insert(k, 0);
                        }
                    }
                    Op::Remove(k) => {
                        let removed = f.remove(&k).unwrap();
                        prop_assert_eq!(removed.is_some(), model.remove(&k).is_some());
                    }
                    Op::Tick => {
                        for age in model.values_mut() {
                            *age += 1;
                        }
                        model.retain(|_, age| *age <= SLOT_COUNT);
                        f.inner.tick();
                    }
                }
                prop_assert_eq!(f.size(), model.len());
            }
            strategy.stop();
        }
    }
}
