//! A write-preferring reader-writer lock.
//!
//! The counter scheme is the one used by Go's `sync.RWMutex`: a single
//! signed counter carries the net reader count, and a pending writer
//! subtracts [`MAX_READERS`] from it so that every reader can detect the
//! writer from the sign alone. The uncontended reader path is one atomic
//! add on entry and one atomic sub on exit — no lock, no syscall.
//!
//! Hand-off is by baton: the writer records how many readers were present
//! when it arrived, and the last of that cohort to leave releases the
//! writer. Readers that arrive while the writer is pending or holding queue
//! on a semaphore and are released, one permit each, when the writer exits.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::semaphore::Semaphore;

/// Pads the reader counter to its own cache line (a pair of 64-byte lines,
/// covering the x86 spatial prefetcher and big aarch64 cores) so the reader
/// fast path does not false-share with the rest of the lock.
#[repr(align(128))]
struct Padded<T>(T);

/// The maximum number of concurrent readers.
///
/// Reader counts are encoded in the low bits of a signed counter; a pending
/// writer subtracts this constant, so up to `MAX_READERS` readers fit
/// without disturbing the sign.
pub const MAX_READERS: i32 = 1 << 30;

/// A write-preferring reader/writer lock.
///
/// Any number of readers may hold the lock concurrently; writers are
/// exclusive. Once a writer has announced itself no new reader may enter
/// ahead of it, so writers cannot be starved by a steady stream of readers:
/// a waiting writer acquires as soon as the readers present at its arrival
/// have drained.
///
/// Locking is RAII: [`read`] and [`write`] return guards, and dropping the
/// guard releases the lock.
///
/// [`read`]: RwLock::read
/// [`write`]: RwLock::write
pub struct RwLock<T: ?Sized> {
    /// Serializes writers; held for the lifetime of a write guard.
    writer: Mutex<()>,
    /// Net reader count; negative while a writer is pending or holding.
    n_pending: Padded<AtomicI32>,
    /// Outstanding readers a pending writer must wait out. May dip negative
    /// when cohort readers leave before the writer has added its count.
    readers_departing: AtomicI32,
    /// Queued readers block here; the exiting writer releases one permit per
    /// reader that arrived while it was in.
    reader_release: Semaphore,
    /// The pending writer blocks here; the last departing cohort reader
    /// releases it.
    writer_release: Semaphore,
    data: UnsafeCell<T>,
}

// SAFETY: the lock protocol guarantees either many readers (&T) or one
// writer (&mut T), never both, so sharing the lock is sound whenever the
// payload itself may be sent and shared.
unsafe impl<T: ?Sized + Send> Send for RwLock<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for RwLock<T> {}

impl<T> RwLock<T> {
    /// Creates an unlocked lock holding `data`.
    pub fn new(data: T) -> Self {
        Self {
            writer: Mutex::new(()),
            n_pending: Padded(AtomicI32::new(0)),
            readers_departing: AtomicI32::new(0),
            reader_release: Semaphore::new(),
            writer_release: Semaphore::new(),
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> RwLock<T> {
    /// Acquires the lock shared. Blocks while a writer is pending or holding.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        // One atomic add. A non-negative result means no writer is in the
        // way; a negative result means a writer is pending and this reader
        // must queue behind it.
        if self.n_pending.0.fetch_add(1, Ordering::SeqCst) + 1 < 0 {
            self.reader_release.acquire();
        }
        RwLockReadGuard { lock: self }
    }

    /// Acquires the lock exclusively. Blocks until running readers drain.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        let serial = self.writer.lock().unwrap();

        // Announce the writer by driving the counter negative. fetch_sub
        // hands back the pre-subtraction value, which is exactly the number
        // of readers present at that instant.
        let r = self.n_pending.0.fetch_sub(MAX_READERS, Ordering::SeqCst);

        // Wait for that cohort, unless it is empty or already gone. Cohort
        // readers that left before this add drove readers_departing
        // negative, cancelling out here.
        if r != 0 && self.readers_departing.fetch_add(r, Ordering::SeqCst) + r != 0 {
            self.writer_release.acquire();
        }

        RwLockWriteGuard {
            lock: self,
            _serial: serial,
        }
    }

    /// Returns a mutable reference to the payload.
    ///
    /// `&mut self` proves no guard is live, so no locking is needed.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    fn unlock_read(&self) {
        if self.n_pending.0.fetch_sub(1, Ordering::SeqCst) - 1 < 0 {
            // A writer is pending; this reader belongs to the cohort it is
            // waiting out. The reader that zeroes the count hands over.
            if self.readers_departing.fetch_sub(1, Ordering::SeqCst) - 1 == 0 {
                self.writer_release.release(1);
            }
        }
    }

    fn unlock_write(&self) {
        // Restore the counter; what remains is the number of readers that
        // queued while the writer was in. Wake exactly those.
        let r = self.n_pending.0.fetch_add(MAX_READERS, Ordering::SeqCst) + MAX_READERS;
        debug_assert!(r >= 0, "unlock of an unlocked RwLock");
        self.reader_release.release(r as usize);
    }
}

impl<T: Default> Default for RwLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Shared access to the payload of an [`RwLock`]. Unlocks on drop.
pub struct RwLockReadGuard<'a, T: ?Sized> {
    lock: &'a RwLock<T>,
}

impl<T: ?Sized> Deref for RwLockReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the read lock is held; writers are excluded.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for RwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.unlock_read();
    }
}

/// Exclusive access to the payload of an [`RwLock`]. Unlocks on drop.
pub struct RwLockWriteGuard<'a, T: ?Sized> {
    lock: &'a RwLock<T>,
    // Dropped after unlock_write runs, releasing the writer serialization
    // last, as the protocol requires.
    _serial: MutexGuard<'a, ()>,
}

impl<T: ?Sized> Deref for RwLockWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the write lock is held; all other access is excluded.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for RwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the write lock is held; all other access is excluded.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for RwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.unlock_write();
    }
}
