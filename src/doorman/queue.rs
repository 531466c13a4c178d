//! The doorman's FIFO wait queue and its parked-waiter records.
//!
//! A waiter decouples *who* is waiting (the thread id used as the queue
//! key) from *how* execution resumes (a per-waiter condvar).  The admitted
//! flag is only ever flipped under the owning doorman's state lock, which
//! is what lets a waking waiter tell a grant apart from an expired wait.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use super::Role;

// ---------------------------------------------------------------------------
// Waiter
// ---------------------------------------------------------------------------

/// A parked execution unit waiting for admission to a protected area.
pub(crate) struct Waiter {
    id: ThreadId,
    role: Role,
    admitted: Mutex<bool>,
    wake: Condvar,
}

impl Waiter {
    /// Creates a waiter for the calling thread.
    pub(crate) fn new(role: Role) -> Arc<Waiter> {
        Arc::new(Waiter {
            id: thread::current().id(),
            role,
            admitted: Mutex::new(false),
            wake: Condvar::new(),
        })
    }

    pub(crate) fn id(&self) -> ThreadId {
        self.id
    }

    pub(crate) fn role(&self) -> Role {
        self.role
    }

    /// Marks the waiter admitted and wakes it.
    ///
    /// Must be called with the owning doorman's state lock held, after the
    /// waiter has been popped from the queue and registered in its role.
    pub(crate) fn grant(&self) {
        *self.admitted.lock() = true;
        self.wake.notify_one();
    }

    /// Returns whether this waiter has been granted access.
    pub(crate) fn is_admitted(&self) -> bool {
        *self.admitted.lock()
    }

    /// Parks the calling thread until granted or `deadline` passes.
    ///
    /// A `false` return is provisional: the caller must settle the race
    /// against a concurrent grant under the doorman's state lock.
    pub(crate) fn park_until(&self, deadline: Instant) -> bool {
        let mut admitted = self.admitted.lock();
        while !*admitted {
            if self.wake.wait_until(&mut admitted, deadline).timed_out() {
                break;
            }
        }
        *admitted
    }
}

// ---------------------------------------------------------------------------
// WaitQueue
// ---------------------------------------------------------------------------

/// FIFO queue of waiting readers and writers.
pub(crate) struct WaitQueue {
    entries: VecDeque<Arc<Waiter>>,
}

impl WaitQueue {
    pub(crate) fn new() -> Self {
        WaitQueue {
            entries: VecDeque::new(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Role of the first waiting entry, or `None` when the queue is empty.
    pub(crate) fn head_role(&self) -> Option<Role> {
        self.entries.front().map(|waiter| waiter.role())
    }

    /// Appends `waiter` at the tail.
    ///
    /// Panics if the waiter's thread is already queued: a queued thread is
    /// parked, so a duplicate means the admission protocol itself broke.
    pub(crate) fn push(&mut self, waiter: Arc<Waiter>) {
        assert!(
            self.entries.iter().all(|queued| queued.id() != waiter.id()),
            "thread {:?} is already waiting in this queue",
            waiter.id(),
        );
        self.entries.push_back(waiter);
    }

    /// Pops the first waiting entry.  Panics when the queue is empty;
    /// callers inspect `head_role` first.
    pub(crate) fn pop(&mut self) -> Arc<Waiter> {
        self.entries
            .pop_front()
            .expect("pop from an empty wait queue")
    }

    /// Removes `waiter` (by identity) wherever it sits in the queue.
    ///
    /// Returns `false` when the waiter was not queued, meaning a grant
    /// already popped it.
    pub(crate) fn remove(&mut self, waiter: &Arc<Waiter>) -> bool {
        let before = self.entries.len();
        self.entries.retain(|queued| !Arc::ptr_eq(queued, waiter));
        self.entries.len() != before
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
