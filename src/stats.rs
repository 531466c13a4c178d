use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters updated on every folder operation.
pub(crate) struct StatsCounter {
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
}

impl StatsCounter {
    pub(crate) fn new() -> Self {
        StatsCounter {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_expired(&self, count: u64) {
        self.expired.fetch_add(count, Ordering::Relaxed);
    }

    /// Returns a point-in-time snapshot of the statistics.
    pub(crate) fn snapshot(&self) -> FolderStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let expired = self.expired.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total == 0 {
            0.0_f64
        } else {
            hits as f64 / total as f64
        };
        FolderStats {
            hits,
            misses,
            expired,
            hit_rate,
        }
    }
}

/// A point-in-time snapshot of folder statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct FolderStats {
    /// Number of lookups (`get` or `find`) that found an entry.
    pub hits: u64,
    /// Number of lookups that found nothing.
    pub misses: u64,
    /// Total number of entries evicted by ticks.
    pub expired: u64,
    /// `hits / (hits + misses)`, or `0.0` if no lookups have been made.
    pub hit_rate: f64,
}

impl FolderStats {
    pub fn lookup_count(&self) -> u64 {
        self.hits + self.misses
    }
}
