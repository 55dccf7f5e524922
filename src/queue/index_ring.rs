//! Lock-free single-producer/single-consumer ring of slot indices.
//!
//! The queue hands slot ownership between its producer and consumer through
//! two of these rings: free slots travel consumer → producer, filled slots
//! travel producer → consumer. Entries are atomics so the ring needs no
//! `unsafe`; the head/tail pair carries the Release/Acquire hand-off.

use super::sync::{AtomicU16, AtomicUsize, Ordering};

#[derive(Debug)]
pub(crate) struct IndexRing {
    entries: Box<[AtomicU16]>,
    mask: usize,
    /// Next position to pop; written only by the consuming side.
    head: AtomicUsize,
    /// Next position to push; written only by the producing side.
    tail: AtomicUsize,
}

impl IndexRing {
    /// Allocate a ring holding up to `capacity` indices.
    ///
    /// `capacity` must be a power of two. Returns `None` if the backing
    /// storage cannot be reserved.
    pub(crate) fn with_capacity(capacity: usize) -> Option<Self> {
        debug_assert!(capacity.is_power_of_two(), "ring capacity must be a power of two");
        let mut entries = Vec::new();
        entries.try_reserve_exact(capacity).ok()?;
        entries.extend((0..capacity).map(|_| AtomicU16::new(0)));
        Some(Self {
            entries: entries.into_boxed_slice(),
            mask: capacity - 1,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        })
    }

    pub(crate) fn capacity(&self) -> usize { self.entries.len() }

    /// Append `index`. Returns `false` if the ring is full.
    ///
    /// Must only be called from the producing side of this ring.
    pub(crate) fn push(&self, index: u16) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail.wrapping_sub(head) >= self.capacity() {
            return false;
        }
        self.entries[tail & self.mask].store(index, Ordering::Relaxed);
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        true
    }

    /// Remove the oldest index.
    ///
    /// Must only be called from the consuming side of this ring.
    pub(crate) fn pop(&self) -> Option<u16> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let index = self.entries[head & self.mask].load(Ordering::Relaxed);
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Some(index)
    }

    /// Number of indices currently in the ring.
    ///
    /// May be stale by the time it returns when the other side is active.
    pub(crate) fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.wrapping_sub(head).min(self.capacity())
    }
}
