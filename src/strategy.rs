//! The shared expiry clock and its background driver.
//!
//! One strategy exists per distinct (time-out, precision) pair.  Its driver
//! thread wakes every `precision` and ticks every registered folder in
//! registration order; a folder's oldest generation is therefore evicted
//! within one tick of crossing the time-out.

use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, trace};

use crate::error::ConfigError;
use crate::folder::ExpiryFolder;

// ---------------------------------------------------------------------------
// Tick
// ---------------------------------------------------------------------------

/// Ticked once per precision window by the strategy's driver.
///
/// Implemented by the folder interior; object-safe so one strategy can
/// drive folders with different key/value types.
pub(crate) trait Tick: Send + Sync {
    fn tick(&self);
}

// ---------------------------------------------------------------------------
// ExpiryStrategy
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct StrategyInner {
    time_out: Duration,
    precision: Duration,
    slot_count: usize,
    /// Registered folders, in registration order.  The lock is held across
    /// a whole tick pass, so registration and iteration are mutually
    /// exclusive.
    folders: Mutex<Vec<Weak<dyn Tick>>>,
    stopped: Mutex<bool>,
    stop_signal: Condvar,
}

/// A shared expiry clock: a time-out, a tick precision, and the background
/// driver that ticks every folder registered against it.
///
/// Cloning is cheap and shares the clock.  Create one strategy per distinct
/// (time-out, precision) pair and attach any number of folders to it.
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
/// let sessions: ExpiryFolder<String, u64> = strategy.new_folder("sessions");
/// sessions.put("s-1".to_string(), 42).unwrap();
/// ```
#[derive(Debug)]
pub struct ExpiryStrategy {
    inner: Arc<StrategyInner>,
}

impl Clone for ExpiryStrategy {
    fn clone(&self) -> Self {
        ExpiryStrategy {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl ExpiryStrategy {
    /// Creates a strategy and starts its background driver.
    ///
    /// `time_out` is the total lifetime of an unrefreshed entry and
    /// `precision` the tick interval.  Both must be non-zero, and
    /// `precision` must not exceed `time_out`.
    pub fn new(time_out: Duration, precision: Duration) -> Result<ExpiryStrategy, ConfigError> {
        if time_out.is_zero() {
            return Err(ConfigError::ZeroTimeOut);
        }
        if precision.is_zero() {
            return Err(ConfigError::ZeroPrecision);
        }
        if precision > time_out {
            return Err(ConfigError::PrecisionExceedsTimeOut {
                time_out,
                precision,
            });
        }

        let slot_count = time_out.as_nanos().div_ceil(precision.as_nanos()) as usize;

        let inner = Arc::new(StrategyInner {
            time_out,
            precision,
            slot_count,
            folders: Mutex::new(Vec::new()),
            stopped: Mutex::new(false),
            stop_signal: Condvar::new(),
        });

        debug!(?time_out, ?precision, slot_count, "starting expiry strategy");

        let weak = Arc::downgrade(&inner);
        thread::Builder::new()
            .name("expiry-driver".into())
            .spawn(move || drive(weak))
            .expect("failed to spawn the expiry driver thread");

        Ok(ExpiryStrategy { inner })
    }

    /// The total lifetime of an unrefreshed entry.
    pub fn time_out(&self) -> Duration {
        self.inner.time_out
    }

    /// The tick interval.
    pub fn precision(&self) -> Duration {
        self.inner.precision
    }

    /// Number of aging generations folders on this strategy hold:
    /// `ceil(time_out / precision)`.
    pub fn slot_count(&self) -> usize {
        self.inner.slot_count
    }

    /// Creates a folder with default settings, bound to this strategy.
    pub fn new_folder<K, V>(&self, name: impl Into<String>) -> ExpiryFolder<K, V>
    where
        K: Hash + Eq + Clone + Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        ExpiryFolder::new(name, self)
    }

    /// Stops the background driver.
    ///
    /// Folders attached to this strategy stop expiring entries.  Panics if
    /// the strategy was already stopped.
    pub fn stop(&self) {
        let mut stopped = self.inner.stopped.lock();
        assert!(!*stopped, "expiry strategy already stopped");
        *stopped = true;
        self.inner.stop_signal.notify_all();
        debug!("expiry strategy stopped");
    }

    /// Registers a folder interior for ticking.  Invoked once per folder,
    /// from the folder's constructor.
    pub(crate) fn folder_added(&self, folder: Weak<dyn Tick>) {
        self.inner.folders.lock().push(folder);
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Driver loop: wakes every precision window and runs a tick pass.
///
/// Holds only a weak reference between passes, so an abandoned strategy
/// (every handle and folder dropped) lets the driver wind down on its next
/// wake instead of leaking the thread.
fn drive(strategy: Weak<StrategyInner>) {
    loop {
        let Some(inner) = strategy.upgrade() else { break };

        let timed_out = {
            let mut stopped = inner.stopped.lock();
            if *stopped {
                break;
            }
            let timed_out = inner
                .stop_signal
                .wait_for(&mut stopped, inner.precision)
                .timed_out();
            if *stopped {
                break;
            }
            timed_out
        };

        if timed_out {
            tick_all(&inner);
        }
    }
    trace!("expiry driver exiting");
}

/// Ticks every live folder in registration order, pruning dead ones.
///
/// A panicking folder (typically a panicking listener) must not end the
/// pass: the remaining folders still need their generations aged, so the
/// panic is caught and logged instead.
fn tick_all(inner: &StrategyInner) {
    let mut folders = inner.folders.lock();
    folders.retain(|registration| {
        let Some(folder) = registration.upgrade() else {
            return false;
        };
        if panic::catch_unwind(AssertUnwindSafe(|| folder.tick())).is_err() {
            error!("a folder tick panicked; continuing with the remaining folders");
        }
        true
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn zero_time_out_is_rejected() {
        let err = ExpiryStrategy::new(Duration::ZERO, Duration::from_millis(10));
        assert_eq!(err.unwrap_err(), ConfigError::ZeroTimeOut);
    }

    #[test]
    fn zero_precision_is_rejected() {
        let err = ExpiryStrategy::new(Duration::from_millis(10), Duration::ZERO);
        assert_eq!(err.unwrap_err(), ConfigError::ZeroPrecision);
    }

    #[test]
    fn precision_coarser_than_time_out_is_rejected() {
        let time_out = Duration::from_millis(10);
        let precision = Duration::from_millis(20);
        let err = ExpiryStrategy::new(time_out, precision);
        assert_eq!(
            err.unwrap_err(),
            ConfigError::PrecisionExceedsTimeOut {
                time_out,
                precision
            }
        );
    }

    #[test]
    fn slot_count_is_the_rounded_up_quotient() {
        let exact = ExpiryStrategy::new(Duration::from_millis(500), Duration::from_millis(100));
        assert_eq!(exact.as_ref().unwrap().slot_count(), 5);
        exact.unwrap().stop();

        let ragged = ExpiryStrategy::new(Duration::from_millis(100), Duration::from_millis(30));
        assert_eq!(ragged.as_ref().unwrap().slot_count(), 4);
        ragged.unwrap().stop();

        let single = ExpiryStrategy::new(Duration::from_secs(60), Duration::from_secs(60));
        assert_eq!(single.as_ref().unwrap().slot_count(), 1);
        single.unwrap().stop();
    }

    #[test]
    #[should_panic(expected = "already stopped")]
    fn stopping_twice_panics() {
        let strategy =
            ExpiryStrategy::new(Duration::from_secs(10), Duration::from_secs(1)).unwrap();
        strategy.stop();
        strategy.stop();
    }

    struct CountingTick(AtomicUsize);

    impl Tick for CountingTick {
        fn tick(&self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn driver_ticks_registered_folders() {
        let strategy =
            ExpiryStrategy::new(Duration::from_millis(100), Duration::from_millis(20)).unwrap();
        let counter = Arc::new(CountingTick(AtomicUsize::new(0)));
        let counter_dyn: Arc<dyn Tick> = Arc::clone(&counter) as Arc<dyn Tick>;
        let registration: Weak<dyn Tick> = Arc::downgrade(&counter_dyn);
        strategy.folder_added(registration);

        std::thread::sleep(Duration::from_millis(150));
        let ticks = counter.0.load(Ordering::Relaxed);
        assert!(ticks >= 2, "expected at least 2 ticks, saw {ticks}");
        strategy.stop();
    }

    #[test]
    fn panicking_folder_does_not_stop_the_pass() {
        struct PanickingTick;
        impl Tick for PanickingTick {
            fn tick(&self) {
                panic!("listener blew up");
            }
        }

        let strategy =
            ExpiryStrategy::new(Duration::from_millis(100), Duration::from_millis(20)).unwrap();
        let bad = Arc::new(PanickingTick);
        let good = Arc::new(CountingTick(AtomicUsize::new(0)));
        let bad_dyn: Arc<dyn Tick> = Arc::clone(&bad) as Arc<dyn Tick>;
        let good_dyn: Arc<dyn Tick> = Arc::clone(&good) as Arc<dyn Tick>;
        let bad_reg: Weak<dyn Tick> = Arc::downgrade(&bad_dyn);
        let good_reg: Weak<dyn Tick> = Arc::downgrade(&good_dyn);
        // The panicking folder registers first, so a propagating panic
        // would starve the one behind it.
        strategy.folder_added(bad_reg);
        strategy.folder_added(good_reg);

        std::thread::sleep(Duration::from_millis(150));
        assert!(
            good.0.load(Ordering::Relaxed) >= 2,
            "folders after a panicking one must still be ticked"
        );
        strategy.stop();
    }
}
