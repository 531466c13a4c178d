//! A fairness monitor implementing an alternating reader/writer admission
//! protocol.
//!
//! ## Protocol
//!
//! A [`Doorman`] guards a named "protected area" with two roles: any number
//! of concurrent readers, or exactly one writer.  Admission is FIFO — a
//! caller that cannot enter immediately parks in a wait queue and is woken
//! in arrival order, with one deliberate exception: when a writer departs
//! and the head of the queue is a contiguous run of readers, the whole run
//! is admitted together as a batch.
//!
//! Grants happen entirely under the doorman's internal state lock: the
//! granting thread registers the waiter in its role, pops it from the
//! queue, and sets its admitted flag before signalling.  A waiter whose
//! bounded wait expires therefore settles the race under the same lock —
//! either its grant already happened (the wait succeeds), or it is still
//! queued and removes itself before reporting [`QueueTimeout`].  A waiter
//! is never admitted after it has reported a timeout.
//!
//! ## Strict and loose checking
//!
//! Re-entering a role the calling thread already holds, switching roles
//! without leaving, or leaving a role it never held are protocol
//! violations.  In strict mode they panic; in loose mode they are logged
//! and recovered from: a same-role re-enter and a leave-without-hold are
//! no-ops, and a cross-role enter first releases the role currently held.

mod queue;

use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use ahash::AHashSet;
use parking_lot::Mutex;
use tracing::warn;

use crate::error::QueueTimeout;
use queue::{WaitQueue, Waiter};

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// The two admission roles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Shared access: concurrent with other readers, exclusive against a
    /// writer.
    Reader,
    /// Exclusive access.
    Writer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Reader => f.write_str("reader"),
            Role::Writer => f.write_str("writer"),
        }
    }
}

// ---------------------------------------------------------------------------
// Doorman
// ---------------------------------------------------------------------------

struct State {
    /// The currently active writer, if any.  Never set while `current_readers`
    /// is non-empty.
    current_writer: Option<ThreadId>,
    /// The set of currently active readers.
    current_readers: AHashSet<ThreadId>,
    /// Waiting readers and writers, in arrival order.
    queue: WaitQueue,
}

/// Monitor guarding a protected area with FIFO reader/writer admission.
pub struct Doorman {
    name: String,
    strict: bool,
    max_queue_wait: Duration,
    state: Mutex<State>,
}

impl Doorman {
    /// Creates a doorman for the protected area called `name`.
    ///
    /// `strict` selects fail-fast (panicking) handling of protocol
    /// violations; loose mode logs and recovers instead.  `max_queue_wait`
    /// bounds the time a caller may sit in the admission queue and must be
    /// non-zero.
    pub fn new(name: impl Into<String>, strict: bool, max_queue_wait: Duration) -> Self {
        assert!(!max_queue_wait.is_zero(), "max_queue_wait must be non-zero");
        Doorman {
            name: name.into(),
            strict,
            max_queue_wait,
            state: Mutex::new(State {
                current_writer: None,
                current_readers: AHashSet::new(),
                queue: WaitQueue::new(),
            }),
        }
    }

    /// Name of the protected area this doorman guards.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum time a caller may wait in the admission queue.
    pub fn max_queue_wait(&self) -> Duration {
        self.max_queue_wait
    }

    // -----------------------------------------------------------------------
    // Entering
    // -----------------------------------------------------------------------

    /// Enters the protected area as a reader, waiting for admission if
    /// necessary.
    pub fn enter_as_reader(&self) -> Result<(), QueueTimeout> {
        let me = thread::current().id();

        let waiter = {
            let mut state = self.state.lock();

            if state.current_writer == Some(me) {
                self.violation(format_args!(
                    "thread {me:?} attempts to enter as a reader while it is already the active writer"
                ));
                // Loose mode: implicit role transition — give up the writer
                // role (admitting whoever is next) and enter as usual.
                self.release_writer(&mut state);
            } else if state.current_readers.contains(&me) {
                self.violation(format_args!(
                    "thread {me:?} attempts to enter as a reader while it is already an active reader"
                ));
                return Ok(());
            }

            // Readers join the current batch unless a writer is active or
            // someone is already queued ahead of them.
            if state.current_writer.is_none() && state.queue.is_empty() {
                state.current_readers.insert(me);
                return Ok(());
            }

            let waiter = Waiter::new(Role::Reader);
            state.queue.push(Arc::clone(&waiter));
            waiter
        };

        self.await_admission(waiter)
    }

    /// Enters the protected area as a writer, waiting for admission if
    /// necessary.
    pub fn enter_as_writer(&self) -> Result<(), QueueTimeout> {
        let me = thread::current().id();

        let waiter = {
            let mut state = self.state.lock();

            if state.current_writer == Some(me) {
                self.violation(format_args!(
                    "thread {me:?} attempts to enter as a writer but it is already the active writer"
                ));
                return Ok(());
            } else if state.current_readers.contains(&me) {
                self.violation(format_args!(
                    "thread {me:?} attempts to enter as a writer while it is an active reader"
                ));
                self.release_reader(&mut state, me);
            }

            if state.current_writer.is_none()
                && state.current_readers.is_empty()
                && state.queue.is_empty()
            {
                state.current_writer = Some(me);
                return Ok(());
            }

            let waiter = Waiter::new(Role::Writer);
            state.queue.push(Arc::clone(&waiter));
            waiter
        };

        self.await_admission(waiter)
    }

    /// Parks on `waiter` until granted, settling the timeout/grant race
    /// under the state lock.
    fn await_admission(&self, waiter: Arc<Waiter>) -> Result<(), QueueTimeout> {
        let deadline = Instant::now() + self.max_queue_wait;
        if waiter.park_until(deadline) {
            return Ok(());
        }

        // The wait expired, but a grant may have raced the wakeup.  Grants
        // happen entirely under the state lock, so under that lock the
        // waiter is either admitted or still queued — never neither.
        let mut state = self.state.lock();
        if waiter.is_admitted() {
            return Ok(());
        }
        let removed = state.queue.remove(&waiter);
        debug_assert!(removed, "un-admitted waiter missing from the queue");
        // The removal may expose admissible entries: readers stuck behind a
        // writer that just gave up can join the running batch right away.
        self.admit_compatible(&mut state);
        drop(state);

        warn!(
            area = %self.name,
            role = %waiter.role(),
            max_queue_wait = ?self.max_queue_wait,
            "admission wait timed out"
        );
        Err(QueueTimeout {
            area: self.name.clone(),
            role: waiter.role(),
            max_queue_wait: self.max_queue_wait,
        })
    }

    // -----------------------------------------------------------------------
    // Leaving
    // -----------------------------------------------------------------------

    /// Leaves the protected area as a reader.
    pub fn leave_as_reader(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();

        if !state.current_readers.contains(&me) {
            self.violation(format_args!(
                "thread {me:?} attempts to leave as a reader, but it is not an active reader"
            ));
            return;
        }
        self.release_reader(&mut state, me);
    }

    /// Leaves the protected area as a writer.
    pub fn leave_as_writer(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();

        if state.current_writer != Some(me) {
            self.violation(format_args!(
                "thread {me:?} attempts to leave as a writer, but it is not the current writer"
            ));
            return;
        }
        self.release_writer(&mut state);
    }

    /// Removes `me` from the reader set and, when the set empties, admits
    /// the waiting writer at the head of the queue.
    fn release_reader(&self, state: &mut State, me: ThreadId) {
        state.current_readers.remove(&me);
        if !state.current_readers.is_empty() {
            return;
        }
        match state.queue.head_role() {
            Some(Role::Writer) => {
                let writer = state.queue.pop();
                state.current_writer = Some(writer.id());
                writer.grant();
            }
            Some(Role::Reader) => {
                // Readers never stack up behind active readers: while the
                // area is readable, arriving readers join the batch unless a
                // writer is queued ahead of them.  A reader at the head here
                // means the admission protocol itself is broken.
                panic!(
                    "doorman \"{}\": found a reader at the head of the queue \
                     while a reader is leaving",
                    self.name
                );
            }
            None => {}
        }
    }

    /// Clears the writer and admits the head of the queue: one writer, or
    /// the entire contiguous run of readers.
    fn release_writer(&self, state: &mut State) {
        state.current_writer = None;
        match state.queue.head_role() {
            Some(Role::Writer) => {
                let writer = state.queue.pop();
                state.current_writer = Some(writer.id());
                writer.grant();
            }
            Some(Role::Reader) => {
                while state.queue.head_role() == Some(Role::Reader) {
                    let reader = state.queue.pop();
                    state.current_readers.insert(reader.id());
                    reader.grant();
                }
            }
            None => {}
        }
    }

    /// Admits whatever the queue head is compatible with the current
    /// occupancy.  Runs after a timed-out waiter removes itself, which can
    /// change the head without anyone leaving; every other admission point
    /// is a leave.  Keeps the invariant that the area is never occupied by
    /// readers while more readers wait at the head of the queue.
    fn admit_compatible(&self, state: &mut State) {
        if state.current_writer.is_some() {
            return;
        }
        match state.queue.head_role() {
            Some(Role::Reader) => {
                while state.queue.head_role() == Some(Role::Reader) {
                    let reader = state.queue.pop();
                    state.current_readers.insert(reader.id());
                    reader.grant();
                }
            }
            Some(Role::Writer) if state.current_readers.is_empty() => {
                let writer = state.queue.pop();
                state.current_writer = Some(writer.id());
                writer.grant();
            }
            _ => {}
        }
    }

    /// Strict mode: panic.  Loose mode: log and let the caller recover.
    fn violation(&self, detail: fmt::Arguments<'_>) {
        if self.strict {
            panic!("doorman \"{}\": {}", self.name, detail);
        }
        warn!(area = %self.name, "{detail}");
    }
}

// ---------------------------------------------------------------------------
// Guarded
// ---------------------------------------------------------------------------

/// Data protected by a [`Doorman`].
///
/// Ties the admission protocol to the data it guards: [`read`] admits the
/// caller as a reader and hands out a shared reference, [`write`] admits it
/// as a writer and hands out an exclusive one.  The role is released when
/// the guard drops, including during unwinding.
///
/// Callers must not acquire a second guard on the same `Guarded` from a
/// thread that already holds one; the folder code never nests guards on a
/// single resource.
///
/// [`read`]: Guarded::read
/// [`write`]: Guarded::write
pub(crate) struct Guarded<T> {
    doorman: Doorman,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is mediated by the doorman's admission protocol —
// shared references are only handed out under the reader role, exclusive
// references only under the (single) writer role.
unsafe impl<T: Send> Send for Guarded<T> {}
unsafe impl<T: Send + Sync> Sync for Guarded<T> {}

impl<T> Guarded<T> {
    pub(crate) fn new(doorman: Doorman, data: T) -> Self {
        Guarded {
            doorman,
            data: UnsafeCell::new(data),
        }
    }

    /// Enters the protected area as a reader and returns a shared guard.
    pub(crate) fn read(&self) -> Result<ReadGuard<'_, T>, QueueTimeout> {
        self.doorman.enter_as_reader()?;
        Ok(ReadGuard { owner: self })
    }

    /// Enters the protected area as a writer and returns an exclusive guard.
    pub(crate) fn write(&self) -> Result<WriteGuard<'_, T>, QueueTimeout> {
        self.doorman.enter_as_writer()?;
        Ok(WriteGuard { owner: self })
    }
}

pub(crate) struct ReadGuard<'a, T> {
    owner: &'a Guarded<T>,
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: this thread holds the reader role, so no writer is active.
        unsafe { &*self.owner.data.get() }
    }
}

impl<T> Drop for ReadGuard<'_, T> {
    fn drop(&mut self) {
        self.owner.doorman.leave_as_reader();
    }
}

pub(crate) struct WriteGuard<'a, T> {
    owner: &'a Guarded<T>,
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: this thread holds the exclusive writer role.
        unsafe { &*self.owner.data.get() }
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: this thread holds the exclusive writer role.
        unsafe { &mut *self.owner.data.get() }
    }
}

impl<T> Drop for WriteGuard<'_, T> {
    fn drop(&mut self) {
        self.owner.doorman.leave_as_writer();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
