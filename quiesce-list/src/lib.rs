//! A doubly-linked list protected by RCU.
//!
//! Readers traverse without ever blocking and observe a consistent snapshot:
//! every node reachable during a read critical section stays allocated until
//! the section ends, even if a writer erases it concurrently. Writers are
//! serialized by an internal mutex and never free a node directly — erased
//! nodes go through the list's generation [`Collector`] and are destroyed
//! once every reader that could still see them has left.
//!
//! # Example
//!
//! ```rust
//! use quiesce_list::RcuList;
//!
//! let list: RcuList<u64> = RcuList::new();
//!
//! let writer = list.register_writer();
//! {
//!     let mut w = writer.write_lock();
//!     w.push_back(1);
//!     w.push_back(2);
//!     let it = w.find(|v| *v == 1);
//!     w.erase(it);
//!     w.synchronize(); // erased node is freed once readers drain
//! }
//!
//! let reader = list.register_reader();
//! let r = reader.read_lock();
//! let remaining: Vec<u64> = r.begin().copied().collect();
//! assert_eq!(remaining, [2]);
//! ```
//!
//! [`Collector`]: quiesce::Collector

#![warn(missing_docs)]

mod list;

pub use list::{Iter, RcuList, ReadGuard, ReadHandle, WriteGuard, WriteHandle};
