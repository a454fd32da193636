//! Lock-free multi-producer, single-consumer inbox.
//!
//! Nodes live in a fixed arena allocated up front and are addressed by index,
//! so neither `push` nor `drain` touches the allocator. Producers prepend to a
//! LIFO chain with a CAS on `head`; the owner detaches the whole chain with one
//! swap and reverses it to recover arrival order.
//!
//! Free nodes form a second LIFO threaded through the same `next` fields. Its
//! head is a `(generation, index)` pair packed into a `u64`: every successful
//! CAS bumps the generation, so a stale `(gen, index)` observed before another
//! producer popped and re-pushed the same node cannot be installed (ABA).
//! The inbox chain itself is only ever pushed onto or swapped out whole, so its
//! head needs no generation.

use alloc::boxed::Box;
use alloc::vec::Vec;
use crate::sync::{AtomicU32, AtomicU64, Ordering, UnsafeCell};

/// Index value meaning "no node"
const NIL: u32 = u32::MAX;

#[inline]
fn pack(generation: u32, index: u32) -> u64 {
    ((generation as u64) << 32) | index as u64
}

#[inline]
fn index_of(word: u64) -> u32 {
    word as u32
}

#[inline]
fn generation_of(word: u64) -> u32 {
    (word >> 32) as u32
}

struct Node<T> {
    next: AtomicU32,
    value: UnsafeCell<Option<T>>,
}

/// Bounded lock-free inbox of `T`.
///
/// Any number of threads may `push`; `drain` must only be called by the
/// single owner (the core the inbox belongs to).
pub struct Inbox<T> {
    /// Index of the most recently pushed node
    head: AtomicU32,
    /// Tagged head of the free-node list
    free: AtomicU64,
    nodes: Box<[Node<T>]>,
}

// SAFETY: a node's value is written only by the producer that popped the node
// from the free list, and read only by the drainer after the node has been
// published through `head`. Values cross threads, hence `T: Send`.
unsafe impl<T: Send> Send for Inbox<T> {}
unsafe impl<T: Send> Sync for Inbox<T> {}

impl<T> Inbox<T> {
    /// Create an inbox with room for `capacity` undelivered items.
    ///
    /// # Panics
    /// If `capacity` does not fit below the reserved `NIL` index.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity < NIL as usize, "inbox capacity too large");

        let nodes: Box<[Node<T>]> = (0..capacity)
            .map(|i| Node {
                next: AtomicU32::new(if i + 1 < capacity { i as u32 + 1 } else { NIL }),
                value: UnsafeCell::new(None),
            })
            .collect();
        let first_free = if capacity == 0 { NIL } else { 0 };

        Self {
            head: AtomicU32::new(NIL),
            free: AtomicU64::new(pack(0, first_free)),
            nodes,
        }
    }

    /// Maximum number of undelivered items
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    /// True if nothing has been pushed since the last drain
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == NIL
    }

    /// Append `value`.
    ///
    /// # Returns
    /// * `Ok(())` - Value is visible to the next `drain`
    /// * `Err(value)` - Node arena exhausted; the value is handed back
    pub fn push(&self, value: T) -> Result<(), T> {
        let Some(index) = self.alloc_node() else {
            return Err(value);
        };
        let node = &self.nodes[index as usize];

        // SAFETY: the node was just removed from the free list and is not yet
        // reachable from `head`, so this thread has exclusive access to it.
        node.value.with_mut(|slot| unsafe { *slot = Some(value) });

        let mut head = self.head.load(Ordering::Acquire);
        loop {
            node.next.store(head, Ordering::Relaxed);
            match self
                .head
                .compare_exchange_weak(head, index, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(()),
                Err(current) => head = current,
            }
        }
    }

    /// Take every pushed item, oldest first.
    ///
    /// Must only be called by the inbox owner. Items pushed concurrently with
    /// the drain are either returned now or left for the next drain.
    pub fn drain(&self) -> Vec<T> {
        let mut index = self.head.swap(NIL, Ordering::AcqRel);
        let mut items = Vec::new();

        while index != NIL {
            let node = &self.nodes[index as usize];
            // Read the link before the node goes back on the free list, where
            // a producer may immediately overwrite it.
            let next = node.next.load(Ordering::Relaxed);

            // SAFETY: the node was published by a release CAS on `head` that
            // the swap above acquired, and it is off the chain now, so only
            // this thread can touch its value until it is freed below.
            let value = node.value.with_mut(|slot| unsafe { (*slot).take() });
            if let Some(value) = value {
                items.push(value);
            }

            self.release_node(index);
            index = next;
        }

        items.reverse();
        items
    }

    fn alloc_node(&self) -> Option<u32> {
        let mut free = self.free.load(Ordering::Acquire);
        loop {
            let index = index_of(free);
            if index == NIL {
                return None;
            }
            // May be stale if another thread raced us; the generation check
            // in the CAS rejects it.
            let next = self.nodes[index as usize].next.load(Ordering::Relaxed);
            let replacement = pack(generation_of(free).wrapping_add(1), next);
            match self.free.compare_exchange_weak(
                free,
                replacement,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(index),
                Err(current) => free = current,
            }
        }
    }

    fn release_node(&self, index: u32) {
        let node = &self.nodes[index as usize];
        let mut free = self.free.load(Ordering::Acquire);
        loop {
            node.next.store(index_of(free), Ordering::Relaxed);
            let replacement = pack(generation_of(free).wrapping_add(1), index);
            match self.free.compare_exchange_weak(
                free,
                replacement,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(current) => free = current,
            }
        }
    }
}

impl<T> core::fmt::Debug for Inbox<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Inbox")
            .field("capacity", &self.capacity())
            .field("empty", &self.is_empty())
            .finish()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    extern crate std;

    use super::*;
    use alloc::sync::Arc;
    use alloc::vec;
    use std::thread;

    #[test]
    fn test_drain_returns_arrival_order() {
        let inbox = Inbox::with_capacity(8);
        for i in 0..5 {
            inbox.push(i).unwrap();
        }
        assert!(!inbox.is_empty());
        assert_eq!(inbox.drain(), vec![0, 1, 2, 3, 4]);
        assert!(inbox.is_empty());
        assert!(inbox.drain().is_empty());
    }

    #[test]
    fn test_exhaustion_returns_value() {
        let inbox = Inbox::with_capacity(2);
        inbox.push("a").unwrap();
        inbox.push("b").unwrap();
        assert_eq!(inbox.push("c"), Err("c"));

        // Draining recycles the nodes
        assert_eq!(inbox.drain(), vec!["a", "b"]);
        inbox.push("c").unwrap();
        assert_eq!(inbox.drain(), vec!["c"]);
    }

    #[test]
    fn test_zero_capacity() {
        let inbox: Inbox<u8> = Inbox::with_capacity(0);
        assert_eq!(inbox.push(1), Err(1));
        assert!(inbox.drain().is_empty());
    }

    #[test]
    fn test_nodes_reused_many_times() {
        let inbox = Inbox::with_capacity(3);
        for round in 0..1000u32 {
            inbox.push(round).unwrap();
            inbox.push(round + 1).unwrap();
            assert_eq!(inbox.drain(), vec![round, round + 1]);
        }
    }

    #[test]
    fn test_undrained_values_dropped() {
        let marker = Arc::new(());
        {
            let inbox = Inbox::with_capacity(4);
            inbox.push(marker.clone()).unwrap();
            inbox.push(marker.clone()).unwrap();
            assert_eq!(Arc::strong_count(&marker), 3);
        }
        assert_eq!(Arc::strong_count(&marker), 1);
    }

    #[test]
    fn test_concurrent_producers_keep_per_sender_order() {
        const PER_SENDER: u32 = 2000;
        let inbox = Arc::new(Inbox::with_capacity(64));

        let producers: Vec<_> = (0..4u32)
            .map(|sender| {
                let inbox = inbox.clone();
                thread::spawn(move || {
                    for seq in 0..PER_SENDER {
                        let mut item = (sender, seq);
                        loop {
                            match inbox.push(item) {
                                Ok(()) => break,
                                Err(back) => {
                                    item = back;
                                    thread::yield_now();
                                }
                            }
                        }
                    }
                })
            })
            .collect();

        let mut next_expected = [0u32; 4];
        let mut received = 0;
        while received < 4 * PER_SENDER {
            for (sender, seq) in inbox.drain() {
                assert_eq!(seq, next_expected[sender as usize]);
                next_expected[sender as usize] += 1;
                received += 1;
            }
            thread::yield_now();
        }

        for p in producers {
            p.join().unwrap();
        }
        assert!(inbox.drain().is_empty());
    }
}
