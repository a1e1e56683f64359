//! The generation collector.
//!
//! One monotonic counter divides time into generations. Readers pin the
//! current generation by incrementing its reference count; writers tag
//! deferred destructors with the generation current at the time. Collection
//! advances a second counter, `last_retired`, through the generations in
//! order: wait for the generation's reference count to drain, run every
//! destructor tagged with it, drop its count record, move on.
//!
//! Registry discipline is what makes the reader side race-free: a reader
//! loads the current generation, finds its record, and publishes its
//! increment all inside one registry read-lock section, while both record
//! insertion (with the generation bump) and record removal happen under the
//! write lock. A reader can therefore never pin a generation whose record
//! has been, or is being, retired.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use quiesce_sync::{Event, RwLock};

use crate::intrusive::{Intrusive, IntrusiveList, ListEntry};
use crate::pqueue::PriorityQueue;

/// The generation counter is read on every enter and written only on
/// advance; a full cache line of its own keeps that traffic off the
/// registry lock's line.
#[repr(align(128))]
struct Padded<T>(T);

/// Reference-count record for one generation.
#[repr(C)]
struct RefCount {
    entry: ListEntry, // must stay the first field
    generation: usize,
    count: AtomicUsize,
}

// SAFETY: repr(C) with ListEntry first.
unsafe impl Intrusive for RefCount {}

impl RefCount {
    fn new(generation: usize) -> Box<Self> {
        Box::new(Self {
            entry: ListEntry::new(),
            generation,
            count: AtomicUsize::new(0),
        })
    }
}

/// Registry of live generation records, in ascending generation order.
struct Registry {
    records: IntrusiveList<RefCount>,
}

impl Registry {
    fn record(&self, generation: usize) -> &RefCount {
        self.records
            .find(|rc| rc.generation == generation)
            .expect("no record for pinned generation")
    }
}

/// A destructor waiting for its generation to retire.
///
/// Owns `object` until it runs; consumed exactly once.
struct Deferred {
    destructor: unsafe fn(*mut ()),
    object: *mut (),
    generation: usize,
}

// SAFETY: the queue exclusively owns the object behind the raw pointer, and
// the defer_destroy contract requires that it may be destroyed from any
// thread.
unsafe impl Send for Deferred {}

impl Deferred {
    /// # Safety
    ///
    /// Must be called at most once, after every reader pinned at
    /// `self.generation` or earlier has departed.
    unsafe fn run(self) {
        unsafe { (self.destructor)(self.object) }
    }
}

fn earlier_generation(a: &Deferred, b: &Deferred) -> bool {
    // `<=` keeps same-generation entries in FIFO order.
    a.generation <= b.generation
}

/// Writer-side state, serialized by one mutex: collection is single-file,
/// and the deferred queue is only touched by writers.
struct WriterState {
    last_retired: usize,
    deferred: PriorityQueue<Deferred>,
}

/// A generation-based garbage collector for read-copy-update structures.
///
/// Readers call [`enter`] to pin the current generation and drop the
/// returned [`Guard`] to unpin it. Writers hand unlinked objects to
/// [`defer_destroy`] (or [`defer_drop`]) and call [`synchronize`] to advance
/// the generation and destroy everything no departed reader could still
/// reference.
///
/// A collector is typically owned by the structure it protects; handles
/// borrow the collector, so they cannot outlive it or be returned to a
/// different one.
///
/// [`enter`]: Collector::enter
/// [`defer_destroy`]: Collector::defer_destroy
/// [`defer_drop`]: Collector::defer_drop
/// [`synchronize`]: Collector::synchronize
pub struct Collector {
    current_generation: Padded<AtomicUsize>,
    registry: RwLock<Registry>,
    writer: Mutex<WriterState>,
    /// Posted by the last reader leaving a generation; a synchronizing
    /// writer sleeps on it while a generation drains.
    generation_complete: Event,
}

impl Collector {
    /// Creates a collector at generation zero.
    pub fn new() -> Self {
        let mut records = IntrusiveList::new();
        records.push_back(RefCount::new(0));
        Self {
            current_generation: Padded(AtomicUsize::new(0)),
            registry: RwLock::new(Registry { records }),
            writer: Mutex::new(WriterState {
                last_retired: 0,
                deferred: PriorityQueue::new(earlier_generation),
            }),
            generation_complete: Event::new(),
        }
    }

    /// Returns the current generation.
    pub fn generation(&self) -> usize {
        self.current_generation.0.load(Ordering::Acquire)
    }

    /// Advances the current generation, returning the previous one.
    ///
    /// From the moment this returns, no new reader can pin the returned
    /// generation; pass it to [`collect_through`](Collector::collect_through)
    /// to reclaim everything deferred up to it.
    pub fn advance(&self) -> usize {
        let mut registry = self.registry.write();
        let next = self.current_generation.0.load(Ordering::Relaxed) + 1;
        registry.records.push_back(RefCount::new(next));
        // Publish while still holding the write lock: any reader that can
        // load the new value is ordered after this section and finds the
        // record just inserted.
        self.current_generation.0.fetch_add(1, Ordering::AcqRel)
    }

    /// Pins the current generation and returns the handle for it.
    ///
    /// Never blocks on other readers; may briefly wait out a registry
    /// update. Reads of the protected structure made while the guard is
    /// live stay valid until the guard is dropped.
    pub fn enter(&self) -> Guard<'_> {
        let registry = self.registry.read();
        // Load the generation under the read lock. Record removal takes the
        // write lock, so whatever value is loaded here has a live record,
        // and the increment below lands before that record can retire.
        let generation = self.current_generation.0.load(Ordering::Acquire);
        registry.record(generation).count.fetch_add(1, Ordering::AcqRel);
        Guard {
            collector: self,
            generation,
        }
    }

    fn leave(&self, generation: usize) {
        let registry = self.registry.read();
        let record = registry.record(generation);
        if record.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Last reader out; a synchronizing writer may be waiting on the
            // drain of exactly this generation.
            self.generation_complete.post();
        }
    }

    /// Queues `object` for destruction once the current generation retires.
    ///
    /// The queue owns the object from here on; `destructor` is invoked
    /// exactly once, by whichever thread retires the tagged generation.
    /// Shares the writer serialization with collection, so a call made
    /// while another thread is inside [`synchronize`](Collector::synchronize)
    /// blocks until that collection finishes.
    ///
    /// # Safety
    ///
    /// - `object` must be valid for `destructor` and must not be accessed
    ///   again by the caller except through still-pinned readers.
    /// - `destructor(object)` must be sound to call from any thread.
    /// - Every reader that could still reach `object` must have pinned the
    ///   current or an earlier generation (i.e. the object was unpublished
    ///   before this call).
    pub unsafe fn defer_destroy(&self, destructor: unsafe fn(*mut ()), object: *mut ()) {
        let mut writer = self.writer.lock().unwrap();
        // Read the generation after taking the lock: the acquire orders this
        // load after the previous collection, so the tag can never fall
        // below last_retired and wedge the ascending queue.
        let generation = self.generation();
        writer.deferred.push(Deferred {
            destructor,
            object,
            generation,
        });
    }

    /// Queues a `Box`-allocated object to be dropped at retirement.
    ///
    /// # Safety
    ///
    /// `object` must have come from [`Box::into_raw`], must not be accessed
    /// again by the caller except through still-pinned readers, and must
    /// have been unpublished before this call (see
    /// [`defer_destroy`](Collector::defer_destroy)).
    pub unsafe fn defer_drop<T: Send>(&self, object: *mut T) {
        unsafe fn drop_box<T>(object: *mut ()) {
            // SAFETY: object came from Box::into_raw::<T> and is dropped
            // exactly once, per the defer_drop contract.
            unsafe { drop(Box::from_raw(object as *mut T)) }
        }
        unsafe { self.defer_destroy(drop_box::<T>, object as *mut ()) }
    }

    /// Advances the generation and reclaims everything safe to reclaim.
    ///
    /// Blocks until every reader pinned at the previous generation or
    /// earlier has left, then runs their deferred destructors. Returns only
    /// when all of them have run.
    pub fn synchronize(&self) {
        let previous = self.advance();
        self.collect_through(previous);
    }

    /// Retires every generation up to and including `generation`.
    ///
    /// `generation` must be a value previously returned by
    /// [`advance`](Collector::advance), i.e. strictly below the current
    /// generation, so that its reader count can only drain.
    pub fn collect_through(&self, generation: usize) {
        assert!(
            generation < self.generation(),
            "collect_through past the current generation"
        );
        let mut writer = self.writer.lock().unwrap();
        while writer.last_retired <= generation {
            let retiring = writer.last_retired;

            // Wait out every reader pinned at the retiring generation. The
            // event may wake spuriously; the count is the truth.
            while self.pinned_readers(retiring) > 0 {
                self.generation_complete.wait();
            }

            // The generation has drained; run its destructors.
            while let Some(deferred) = writer.deferred.pop_if(|d| d.generation == retiring) {
                // SAFETY: no reader is pinned at `retiring` or below, and
                // each entry is popped (hence run) exactly once.
                unsafe { deferred.run() };
            }

            // Records ascend, so the retired generation is at the front.
            let mut registry = self.registry.write();
            let record = registry.records.pop_front_if(|rc| rc.generation == retiring);
            debug_assert!(record.is_some(), "registry out of order");
            drop(registry);

            writer.last_retired = retiring + 1;
        }
    }

    fn pinned_readers(&self, generation: usize) -> usize {
        self.registry
            .read()
            .record(generation)
            .count
            .load(Ordering::Acquire)
    }
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        // `&mut self` proves no guard is live and no reader can arrive, so
        // whatever is still queued can be destroyed immediately.
        let writer = self.writer.get_mut().unwrap();
        while let Some(deferred) = writer.deferred.pop() {
            // SAFETY: exclusive access; each entry runs exactly once.
            unsafe { deferred.run() };
        }
        // Registry records are dropped by the intrusive list.
    }
}

/// An active reader pin. Dropping it leaves the pinned generation.
///
/// Returned by [`Collector::enter`]. The borrow ties the guard to its
/// collector, so a guard can neither outlive the collector nor be handed to
/// a different one.
pub struct Guard<'c> {
    collector: &'c Collector,
    generation: usize,
}

impl Guard<'_> {
    /// The generation this guard pins.
    pub fn generation(&self) -> usize {
        self.generation
    }
}

impl Drop for Guard<'_> {
    fn drop(&mut self) {
        self.collector.leave(self.generation);
    }
}
