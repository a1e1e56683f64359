//! The RCU list proper.
//!
//! Publication discipline: every link store that makes a node reachable is
//! release-ordered and happens under the writer mutex; every reader-side
//! link load is acquire. A reader that sees a link therefore sees the fully
//! initialized node behind it. Erasure splices a node out of the live chain
//! but leaves the node's own links intact, so a reader parked on it keeps a
//! coherent (old) view of the neighborhood until its critical section ends.

use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::{Mutex, MutexGuard};

use quiesce::Collector;

struct Node<T> {
    /// Set (under the writer mutex) the moment the erase commits; the node
    /// stays allocated until its generation retires.
    deleted: AtomicBool,
    next: AtomicPtr<Node<T>>,
    prev: AtomicPtr<Node<T>>,
    data: T,
}

impl<T> Node<T> {
    fn alloc(data: T) -> *mut Self {
        Box::into_raw(Box::new(Self {
            deleted: AtomicBool::new(false),
            next: AtomicPtr::new(ptr::null_mut()),
            prev: AtomicPtr::new(ptr::null_mut()),
            data,
        }))
    }
}

/// A doubly-linked list with non-blocking RCU readers and a single writer.
///
/// Readers and writers register handles ([`register_reader`],
/// [`register_writer`]) and open critical sections through them; all list
/// operations are methods on the resulting guards, so a mutation cannot
/// escape the writer mutex and a traversal cannot escape its read pin.
///
/// The list owns its nodes and their payloads. An erased node's payload is
/// dropped together with the node when the collector retires its
/// generation.
///
/// [`register_reader`]: RcuList::register_reader
/// [`register_writer`]: RcuList::register_writer
pub struct RcuList<T> {
    head: AtomicPtr<Node<T>>,
    tail: AtomicPtr<Node<T>>,
    /// Serializes writers; held for the lifetime of a [`WriteGuard`].
    writer: Mutex<()>,
    collector: Collector,
}

// SAFETY: readers hand out &T concurrently (T: Sync) and erased payloads are
// dropped on whichever thread synchronizes (T: Send); the link structure
// itself is governed by the RCU protocol.
unsafe impl<T: Send + Sync> Send for RcuList<T> {}
unsafe impl<T: Send + Sync> Sync for RcuList<T> {}

impl<T: Send + Sync> RcuList<T> {
    /// Creates an empty list with its own collector.
    pub fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            tail: AtomicPtr::new(ptr::null_mut()),
            writer: Mutex::new(()),
            collector: Collector::new(),
        }
    }

    /// Registers a reader. The handle borrows the list and opens read
    /// critical sections with [`ReadHandle::read_lock`].
    pub fn register_reader(&self) -> ReadHandle<'_, T> {
        ReadHandle { list: self }
    }

    /// Registers a writer. The handle borrows the list and opens mutation
    /// sequences with [`WriteHandle::write_lock`].
    pub fn register_writer(&self) -> WriteHandle<'_, T> {
        WriteHandle { list: self }
    }

    fn first(&self) -> *mut Node<T> {
        self.head.load(Ordering::Acquire)
    }

    fn find_from_head<F>(&self, mut pred: F) -> *mut Node<T>
    where
        F: FnMut(&T) -> bool,
    {
        let mut current = self.first();
        while let Some(node) = unsafe { current.as_ref() } {
            if pred(&node.data) {
                break;
            }
            current = node.next.load(Ordering::Acquire);
        }
        current
    }
}

impl<T: Send + Sync> Default for RcuList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for RcuList<T> {
    fn drop(&mut self) {
        // Exclusive access: no reader or writer survives the list. Free the
        // live chain here; erased nodes still queued are freed by the
        // collector's own drop.
        let mut current = *self.head.get_mut();
        while !current.is_null() {
            let next = unsafe { (*current).next.load(Ordering::Relaxed) };
            unsafe { drop(Box::from_raw(current)) };
            current = next;
        }
    }
}

/// A registered reader of an [`RcuList`].
pub struct ReadHandle<'a, T> {
    list: &'a RcuList<T>,
}

impl<'a, T: Send + Sync> ReadHandle<'a, T> {
    /// Opens a read critical section by pinning the current generation.
    ///
    /// Never blocks on other readers or on the writer's critical section.
    /// Every iterator obtained from the guard is valid until the guard
    /// drops.
    pub fn read_lock(&self) -> ReadGuard<'_, T> {
        ReadGuard {
            list: self.list,
            _pin: self.list.collector.enter(),
        }
    }
}

/// An open read critical section. Dropping it ends the section.
pub struct ReadGuard<'g, T> {
    list: &'g RcuList<T>,
    _pin: quiesce::Guard<'g>,
}

impl<'g, T: Send + Sync> ReadGuard<'g, T> {
    /// An iterator positioned at the head of the list as currently
    /// published. Exhausted when the list is empty.
    pub fn begin(&self) -> Iter<'_, T> {
        Iter {
            node: self.list.first(),
            list: self.list,
            _marker: PhantomData,
        }
    }

    /// The exhausted iterator.
    pub fn end(&self) -> Iter<'_, T> {
        Iter {
            node: ptr::null_mut(),
            list: self.list,
            _marker: PhantomData,
        }
    }

    /// An iterator at the first element matching `pred`, or [`end`] when
    /// nothing matches.
    ///
    /// [`end`]: ReadGuard::end
    pub fn find<F>(&self, pred: F) -> Iter<'_, T>
    where
        F: FnMut(&T) -> bool,
    {
        Iter {
            node: self.list.find_from_head(pred),
            list: self.list,
            _marker: PhantomData,
        }
    }
}

/// A registered writer of an [`RcuList`].
pub struct WriteHandle<'a, T> {
    list: &'a RcuList<T>,
}

impl<'a, T: Send + Sync> WriteHandle<'a, T> {
    /// Acquires the writer mutex for a mutation sequence.
    ///
    /// At most one write guard exists per list at a time; readers are not
    /// affected and keep traversing concurrently.
    pub fn write_lock(&self) -> WriteGuard<'_, T> {
        WriteGuard {
            list: self.list,
            _serial: self.list.writer.lock().unwrap(),
        }
    }
}

/// An open mutation sequence. Dropping it releases the writer mutex.
pub struct WriteGuard<'g, T> {
    list: &'g RcuList<T>,
    _serial: MutexGuard<'g, ()>,
}

impl<'g, T: Send + Sync> WriteGuard<'g, T> {
    /// Inserts `value` at the head of the list.
    pub fn push_front(&self, value: T) {
        let node = Node::alloc(value);
        let list = self.list;
        // Writer-exclusive loads may be relaxed; publication is the store.
        let old_head = list.head.load(Ordering::Relaxed);
        if old_head.is_null() {
            list.head.store(node, Ordering::Release);
            list.tail.store(node, Ordering::Release);
        } else {
            unsafe {
                // Wire the node first, then let the head store publish it.
                (*node).next.store(old_head, Ordering::Release);
                (*old_head).prev.store(node, Ordering::Release);
            }
            list.head.store(node, Ordering::Release);
        }
    }

    /// Inserts `value` at the tail of the list.
    pub fn push_back(&self, value: T) {
        let node = Node::alloc(value);
        let list = self.list;
        let old_tail = list.tail.load(Ordering::Relaxed);
        if old_tail.is_null() {
            list.head.store(node, Ordering::Release);
            list.tail.store(node, Ordering::Release);
        } else {
            unsafe {
                (*node).prev.store(old_tail, Ordering::Release);
                // This store publishes the node to in-flight traversals.
                (*old_tail).next.store(node, Ordering::Release);
            }
            list.tail.store(node, Ordering::Release);
        }
    }

    /// Erases the node under `iter` from the live chain and defers its
    /// destruction until every reader that could still see it has left.
    ///
    /// A no-op on an exhausted iterator or a node already erased. Readers
    /// parked on the node keep a valid view of it (and of its old
    /// neighborhood) for the rest of their critical section.
    pub fn erase(&self, iter: Iter<'_, T>) {
        assert!(
            ptr::eq(iter.list, self.list),
            "iterator does not belong to this list"
        );
        let node = iter.node;
        if node.is_null() {
            return;
        }

        let list = self.list;
        let node_ref = unsafe { &*node };
        // Double-erase through a stale iterator is benign: the first erase
        // already unlinked and deferred the node.
        if node_ref.deleted.load(Ordering::Relaxed) {
            return;
        }
        node_ref.deleted.store(true, Ordering::Release);

        let prev = node_ref.prev.load(Ordering::Relaxed);
        let next = node_ref.next.load(Ordering::Relaxed);

        // Splice out of the live chain. The node's own links are left
        // untouched for readers still standing on it.
        if prev.is_null() {
            list.head.store(next, Ordering::Release);
        } else {
            unsafe { (*prev).next.store(next, Ordering::Release) };
        }
        if next.is_null() {
            list.tail.store(prev, Ordering::Release);
        } else {
            unsafe { (*next).prev.store(prev, Ordering::Release) };
        }

        // SAFETY: the node is unpublished (no new reader can reach it), it
        // came from Node::alloc, and it is deferred exactly once (guarded by
        // the deleted flag above).
        unsafe { list.collector.defer_drop(node) };
    }

    /// Waits until every reader that entered before now has left, then
    /// frees all nodes erased up to that point.
    ///
    /// Takes `&mut self` so the writer's own iterators — which hold no read
    /// pin — cannot survive into the reclamation.
    pub fn synchronize(&mut self) {
        self.list.collector.synchronize();
    }

    /// An iterator positioned at the head of the list.
    ///
    /// Writer-side traversal needs no read pin: nodes are only freed by
    /// [`synchronize`](WriteGuard::synchronize), which this writer alone can
    /// reach.
    pub fn begin(&self) -> Iter<'_, T> {
        Iter {
            node: self.list.first(),
            list: self.list,
            _marker: PhantomData,
        }
    }

    /// The exhausted iterator.
    pub fn end(&self) -> Iter<'_, T> {
        Iter {
            node: ptr::null_mut(),
            list: self.list,
            _marker: PhantomData,
        }
    }

    /// An iterator at the first element matching `pred`, or
    /// [`end`](WriteGuard::end) when nothing matches.
    pub fn find<F>(&self, pred: F) -> Iter<'_, T>
    where
        F: FnMut(&T) -> bool,
    {
        Iter {
            node: self.list.find_from_head(pred),
            list: self.list,
            _marker: PhantomData,
        }
    }
}

/// A cursor over the list, bound to the guard it came from.
///
/// [`get`] returns the value under the cursor (`None` once exhausted);
/// [`advance`] follows the published `next` link. The `Iterator` impl yields
/// each value and advances past it.
///
/// [`get`]: Iter::get
/// [`advance`]: Iter::advance
pub struct Iter<'g, T> {
    node: *mut Node<T>,
    list: *const RcuList<T>,
    _marker: PhantomData<&'g T>,
}

impl<'g, T> Iter<'g, T> {
    /// The value under the cursor, or `None` when exhausted.
    ///
    /// The reference lives as long as the guard this iterator came from:
    /// even if a writer erases the node, the value stays valid until the
    /// critical section ends.
    pub fn get(&self) -> Option<&'g T> {
        unsafe { self.node.as_ref().map(|node| &node.data) }
    }

    /// Steps to the next node in the chain observed by this traversal.
    /// A no-op once exhausted.
    pub fn advance(&mut self) {
        if let Some(node) = unsafe { self.node.as_ref() } {
            self.node = node.next.load(Ordering::Acquire);
        }
    }
}

impl<T> Clone for Iter<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Iter<'_, T> {}

impl<'g, T> Iterator for Iter<'g, T> {
    type Item = &'g T;

    fn next(&mut self) -> Option<&'g T> {
        let item = self.get()?;
        self.advance();
        Some(item)
    }
}
