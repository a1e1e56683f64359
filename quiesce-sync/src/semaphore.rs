//! Counting semaphore used for the rwlock's reader/writer hand-off.

use std::sync::{Condvar, Mutex};

/// A counting semaphore over a mutex and condvar.
///
/// Permits are latched, which is what the lock hand-off needs: a release
/// performed before the matching acquire begins is not lost, it is consumed
/// when the acquirer arrives.
pub(crate) struct Semaphore {
    permits: Mutex<usize>,
    cv: Condvar,
}

impl Semaphore {
    pub(crate) fn new() -> Self {
        Self {
            permits: Mutex::new(0),
            cv: Condvar::new(),
        }
    }

    /// Blocks until a permit is available, then takes it.
    pub(crate) fn acquire(&self) {
        let mut permits = self.permits.lock().unwrap();
        while *permits == 0 {
            permits = self.cv.wait(permits).unwrap();
        }
        *permits -= 1;
    }

    /// Adds `n` permits, waking as many waiters.
    pub(crate) fn release(&self, n: usize) {
        if n == 0 {
            return;
        }
        let mut permits = self.permits.lock().unwrap();
        *permits += n;
        drop(permits);
        if n == 1 {
            self.cv.notify_one();
        } else {
            self.cv.notify_all();
        }
    }
}
