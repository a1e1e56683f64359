use quiesce_list::RcuList;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

fn contents(list: &RcuList<u64>) -> Vec<u64> {
    let reader = list.register_reader();
    let guard = reader.read_lock();
    guard.begin().copied().collect()
}

#[test]
fn test_empty_list_boundaries() {
    let list: RcuList<u64> = RcuList::new();

    let reader = list.register_reader();
    let guard = reader.read_lock();
    assert!(guard.begin().get().is_none());
    assert!(guard.find(|_| true).get().is_none());
    assert!(guard.end().get().is_none());

    // Erasing the end iterator is a no-op.
    let writer = list.register_writer();
    let w = writer.write_lock();
    w.erase(w.end());
}

#[test]
fn test_first_push_is_head_and_tail() {
    let list: RcuList<u64> = RcuList::new();
    let writer = list.register_writer();
    {
        let w = writer.write_lock();
        w.push_front(7);
    }
    assert_eq!(contents(&list), [7]);

    // Appending lands behind it, so 7 really was both head and tail.
    {
        let w = writer.write_lock();
        w.push_back(8);
    }
    assert_eq!(contents(&list), [7, 8]);

    let list: RcuList<u64> = RcuList::new();
    let writer = list.register_writer();
    {
        let w = writer.write_lock();
        w.push_back(9);
        w.push_front(1);
    }
    assert_eq!(contents(&list), [1, 9]);
}

#[test]
fn test_push_order() {
    let list: RcuList<u64> = RcuList::new();
    let writer = list.register_writer();
    {
        let w = writer.write_lock();
        for v in [1, 2, 3] {
            w.push_back(v);
        }
        w.push_front(0);
    }
    assert_eq!(contents(&list), [0, 1, 2, 3]);
}

/// Seed scenario: every inserted key is found again; a missing key is not.
#[test]
fn test_find_identity() {
    let list: RcuList<u64> = RcuList::new();
    let writer = list.register_writer();
    {
        let w = writer.write_lock();
        for key in 1..=1000u64 {
            w.push_back(key);
        }
    }

    let reader = list.register_reader();
    let guard = reader.read_lock();
    for key in 1..=1000u64 {
        let it = guard.find(|v| *v == key);
        assert_eq!(it.get(), Some(&key));
    }
    assert!(guard.find(|v| *v == 1001).get().is_none());
}

#[test]
fn test_erase_only_element_empties_list() {
    let list: RcuList<u64> = RcuList::new();
    let writer = list.register_writer();
    {
        let mut w = writer.write_lock();
        w.push_back(1);
        let it = w.begin();
        w.erase(it);
        w.synchronize();
    }
    assert_eq!(contents(&list), []);

    // Head and tail were both cleared; the list is reusable.
    {
        let w = writer.write_lock();
        w.push_back(2);
    }
    assert_eq!(contents(&list), [2]);
}

#[test]
fn test_erase_head_promotes_next() {
    let list: RcuList<u64> = RcuList::new();
    let writer = list.register_writer();
    {
        let mut w = writer.write_lock();
        for v in [1, 2, 3] {
            w.push_back(v);
        }
        let it = w.begin();
        w.erase(it);
        w.synchronize();
    }
    assert_eq!(contents(&list), [2, 3]);
}

#[test]
fn test_erase_middle_and_tail() {
    let list: RcuList<u64> = RcuList::new();
    let writer = list.register_writer();
    {
        let mut w = writer.write_lock();
        for v in [1, 2, 3] {
            w.push_back(v);
        }
        w.erase(w.find(|v| *v == 2));
        w.synchronize();
    }
    assert_eq!(contents(&list), [1, 3]);

    {
        let mut w = writer.write_lock();
        w.erase(w.find(|v| *v == 3));
        w.synchronize();
        // Tail moved back to 1; appending proves it.
        w.push_back(4);
    }
    assert_eq!(contents(&list), [1, 4]);
}

struct Tracked {
    key: u64,
    drops: Arc<AtomicUsize>,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_double_erase_defers_once() {
    let drops = Arc::new(AtomicUsize::new(0));
    let list: RcuList<Tracked> = RcuList::new();
    let writer = list.register_writer();
    {
        let mut w = writer.write_lock();
        w.push_back(Tracked {
            key: 1,
            drops: drops.clone(),
        });

        // Two cursors on the same node; the second erase must notice the
        // deleted flag and do nothing.
        let first = w.begin();
        let second = w.begin();
        w.erase(first);
        w.erase(second);
        w.synchronize();
    }
    assert_eq!(drops.load(Ordering::SeqCst), 1);

    let reader = list.register_reader();
    let guard = reader.read_lock();
    assert!(guard.begin().get().is_none());
}

/// Seed scenario: a reader standing on a node keeps its value through a
/// concurrent erase, and the destructor fires exactly once, only after the
/// reader leaves.
#[test]
fn test_erase_under_live_reader() {
    let drops = Arc::new(AtomicUsize::new(0));
    let list: RcuList<Tracked> = RcuList::new();
    {
        let writer = list.register_writer();
        let w = writer.write_lock();
        w.push_back(Tracked {
            key: 41,
            drops: drops.clone(),
        });
    }

    thread::scope(|scope| {
        let reader = list.register_reader();
        let guard = reader.read_lock();
        let it = guard.begin();
        assert_eq!(it.get().unwrap().key, 41);

        let eraser = scope.spawn(|| {
            let writer = list.register_writer();
            let mut w = writer.write_lock();
            let target = w.begin();
            w.erase(target);
            // Blocks until the reader below unpins.
            w.synchronize();
        });

        thread::sleep(Duration::from_millis(50));
        // The erase may have happened, but this reader's view is pinned.
        assert_eq!(it.get().unwrap().key, 41);
        assert_eq!(drops.load(Ordering::SeqCst), 0, "freed under a live reader");

        drop(guard);
        eraser.join().unwrap();
    });

    assert_eq!(drops.load(Ordering::SeqCst), 1);
    let reader = list.register_reader();
    assert!(reader.read_lock().begin().get().is_none());
}

/// Seed scenario: readers hammer the list while the writer erases 2 and 4
/// with a synchronize between. Every observed sequence is a strictly
/// increasing draw from {1..5} containing all never-erased values.
#[test]
fn test_concurrent_readers_sequential_eraser() {
    const N_READERS: usize = 4;

    let list: RcuList<u64> = RcuList::new();
    {
        let writer = list.register_writer();
        let w = writer.write_lock();
        for v in [1, 2, 3, 4, 5] {
            w.push_back(v);
        }
    }

    thread::scope(|scope| {
        for _ in 0..N_READERS {
            scope.spawn(|| {
                for _ in 0..2_000 {
                    let reader = list.register_reader();
                    let guard = reader.read_lock();
                    let observed: Vec<u64> = guard.begin().copied().collect();

                    assert!(observed.windows(2).all(|w| w[0] < w[1]), "{observed:?}");
                    assert!(observed.iter().all(|v| (1..=5).contains(v)), "{observed:?}");
                    for never_erased in [1, 3, 5] {
                        assert!(observed.contains(&never_erased), "{observed:?}");
                    }
                }
            });
        }

        scope.spawn(|| {
            let writer = list.register_writer();
            for target in [2u64, 4] {
                thread::sleep(Duration::from_millis(10));
                let mut w = writer.write_lock();
                w.erase(w.find(|v| *v == target));
                w.synchronize();
            }
        });
    });

    assert_eq!(contents(&list), [1, 3, 5]);
}

#[test]
fn test_writers_serialize() {
    const N_WRITERS: usize = 4;
    const N_PUSHES: usize = 250;

    let list: RcuList<u64> = RcuList::new();
    thread::scope(|scope| {
        for t in 0..N_WRITERS {
            let list = &list;
            scope.spawn(move || {
                let writer = list.register_writer();
                for i in 0..N_PUSHES {
                    let w = writer.write_lock();
                    w.push_back((t * N_PUSHES + i) as u64);
                }
            });
        }
    });

    assert_eq!(contents(&list).len(), N_WRITERS * N_PUSHES);
}

#[test]
fn test_list_drop_frees_live_and_erased_nodes() {
    let drops = Arc::new(AtomicUsize::new(0));
    let list: RcuList<Tracked> = RcuList::new();
    {
        let writer = list.register_writer();
        let w = writer.write_lock();
        for key in 0..10 {
            w.push_back(Tracked {
                key,
                drops: drops.clone(),
            });
        }
        // Erase a few without synchronizing; they stay on the deferred
        // queue until the list (and its collector) drop.
        w.erase(w.find(|v| v.key == 3));
        w.erase(w.find(|v| v.key == 7));
    }

    assert_eq!(drops.load(Ordering::SeqCst), 0);
    drop(list);
    assert_eq!(drops.load(Ordering::SeqCst), 10);
}

#[test]
fn test_iterator_advance_and_get() {
    let list: RcuList<u64> = RcuList::new();
    {
        let writer = list.register_writer();
        let w = writer.write_lock();
        for v in [10, 20] {
            w.push_back(v);
        }
    }

    let reader = list.register_reader();
    let guard = reader.read_lock();
    let mut it = guard.begin();
    assert_eq!(it.get(), Some(&10));
    it.advance();
    assert_eq!(it.get(), Some(&20));
    it.advance();
    assert!(it.get().is_none());
    // Advancing past the end stays put.
    it.advance();
    assert!(it.get().is_none());
}
