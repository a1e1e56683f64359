//! A small inter-thread wake primitive built on a mutex and condvar.

use std::sync::{Condvar, Mutex};

/// A wake primitive with a single latched permit.
///
/// [`wait`] blocks until a [`post`] or [`broadcast`] that has not already
/// been consumed. The permit is latched: a post delivered while no thread is
/// blocked is picked up by the next `wait` instead of being lost, so the
/// check-then-sleep window of a bare condvar cannot swallow the final wakeup.
///
/// Wakeups may still be spurious (stale permits from earlier posts, condvar
/// semantics); callers must re-check their predicate in a loop. The intended
/// use is a single blocking waiter — a synchronizing writer waiting for a
/// reader count to drain to zero. `broadcast` wakes every thread currently
/// blocked, but only one of them observes the permit.
///
/// [`wait`]: Event::wait
/// [`post`]: Event::post
/// [`broadcast`]: Event::broadcast
pub struct Event {
    permit: Mutex<bool>,
    cv: Condvar,
}

impl Event {
    /// Creates an event with no pending permit.
    pub fn new() -> Self {
        Self {
            permit: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    /// Blocks until a permit is available, then consumes it.
    pub fn wait(&self) {
        let mut permit = self.permit.lock().unwrap();
        while !*permit {
            permit = self.cv.wait(permit).unwrap();
        }
        *permit = false;
    }

    /// Makes one permit available and wakes one waiter.
    pub fn post(&self) {
        let mut permit = self.permit.lock().unwrap();
        *permit = true;
        drop(permit);
        self.cv.notify_one();
    }

    /// Makes one permit available and wakes every current waiter.
    pub fn broadcast(&self) {
        let mut permit = self.permit.lock().unwrap();
        *permit = true;
        drop(permit);
        self.cv.notify_all();
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}
