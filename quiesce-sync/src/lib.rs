//! Blocking synchronization primitives for the quiesce workspace.
//!
//! This crate carries the low-level building blocks the reclamation core is
//! built on:
//!
//! - [`Event`]: a latched wake primitive over a mutex and condvar.
//! - [`RwLock`]: a write-preferring reader/writer lock with a constant-time
//!   uncontended reader path.
//!
//! Everything here blocks on OS primitives; nothing spins unboundedly. The
//! lock is *write-preferring*: once a writer announces itself, no new reader
//! may enter ahead of it, and the last reader of the pre-writer cohort hands
//! the lock directly to the waiting writer.

#![warn(missing_docs)]

mod event;
mod rwlock;
mod semaphore;

pub use event::Event;
pub use rwlock::{MAX_READERS, RwLock, RwLockReadGuard, RwLockWriteGuard};
