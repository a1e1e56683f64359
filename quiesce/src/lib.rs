//! Generation-based RCU memory reclamation.
//!
//! Readers pin the current *generation* on entry and unpin it on exit;
//! writers tag objects they have unlinked with the generation current at the
//! time and hand them to the [`Collector`]. A deferred object is destroyed
//! only once every reader that could still hold a reference to it — every
//! reader pinned at its generation or earlier — has departed.
//!
//! # Example
//!
//! ```rust
//! use quiesce::Collector;
//!
//! let collector = Collector::new();
//!
//! // Reader side: pin the current generation.
//! let guard = collector.enter();
//! // ... traverse the protected structure ...
//! drop(guard);
//!
//! // Writer side: unlink an object, defer its destruction, then wait for
//! // all readers that might still see it.
//! let stale = Box::into_raw(Box::new(42u64));
//! unsafe { collector.defer_drop(stale) };
//! collector.synchronize();
//! // The deferred Box has been dropped by now.
//! ```
//!
//! The reader path never blocks on other readers and never blocks on
//! writers for more than the registry's short lock-hold times; the writer's
//! [`synchronize`] blocks until the prior generation has fully drained.
//!
//! [`synchronize`]: Collector::synchronize

#![warn(missing_docs)]

mod collector;
pub mod intrusive;
pub mod pqueue;

pub use collector::{Collector, Guard};
