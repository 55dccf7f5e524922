//! Consumer half of the ring queue: priority lists, coalescing and pops.

use tracing::{debug, trace};

use super::{
    COALESCE_BUCKETS,
    QueueError,
    SLOT_NONE,
    SLOT_SIZE,
    Shared,
    SlotFlags,
    coalesce_bucket,
    slot::{Slot, SlotBody},
    sync::{Arc, Ordering},
};
use crate::{metrics, priority::Priority};

/// Deferred conditions recorded by an [`IsrProducer`](super::IsrProducer).
///
/// The producer path may not log, so it raises flags which the consumer
/// collects from its polling loop via [`QueueConsumer::take_isr_events`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IsrEvents {
    /// A push was rejected because the queue was full.
    pub queue_full: bool,
    /// A push was rejected because the payload exceeded the slot size.
    pub oversize: bool,
}

impl IsrEvents {
    /// Whether nothing was recorded.
    #[must_use]
    pub const fn is_empty(self) -> bool { !self.queue_full && !self.oversize }
}

/// Message copied out of the queue by [`QueueConsumer::pop_priority`].
#[derive(Clone, Debug)]
pub struct PoppedMessage {
    priority: Priority,
    flags: SlotFlags,
    len: u16,
    data: [u8; SLOT_SIZE],
}

impl PoppedMessage {
    fn from_body(body: &SlotBody) -> Self {
        Self {
            priority: body.priority,
            flags: body.flags,
            len: body.len,
            data: body.data,
        }
    }

    /// Priority the message was queued at.
    #[must_use]
    pub const fn priority(&self) -> Priority { self.priority }

    /// Flags recorded with the message.
    #[must_use]
    pub const fn flags(&self) -> SlotFlags { self.flags }

    /// Message bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] { &self.data[..usize::from(self.len)] }
}

/// Consumer-owned bookkeeping: per-priority FIFO lists and the coalescing
/// table. Lists are singly linked through `next` by slot index.
#[derive(Debug)]
struct Lists {
    heads: [u16; Priority::COUNT],
    tails: [u16; Priority::COUNT],
    counts: [usize; Priority::COUNT],
    next: Box<[u16]>,
    coalesce: [u16; COALESCE_BUCKETS],
    linked: usize,
}

impl Lists {
    fn with_capacity(capacity: usize) -> Result<Self, QueueError> {
        let mut next = Vec::new();
        next.try_reserve_exact(capacity)
            .map_err(|_| QueueError::Allocation { capacity })?;
        next.resize(capacity, SLOT_NONE);
        Ok(Self {
            heads: [SLOT_NONE; Priority::COUNT],
            tails: [SLOT_NONE; Priority::COUNT],
            counts: [0; Priority::COUNT],
            next: next.into_boxed_slice(),
            coalesce: [SLOT_NONE; COALESCE_BUCKETS],
            linked: 0,
        })
    }

    fn next_mut(&mut self, index: u16) -> Result<&mut u16, QueueError> {
        self.next
            .get_mut(usize::from(index))
            .ok_or(QueueError::Corrupted)
    }

    fn link_tail(&mut self, index: u16, priority: Priority) -> Result<(), QueueError> {
        let level = priority.index();
        *self.next_mut(index)? = SLOT_NONE;
        match self.tails[level] {
            SLOT_NONE => self.heads[level] = index,
            tail => *self.next_mut(tail)? = index,
        }
        self.tails[level] = index;
        self.counts[level] += 1;
        self.linked += 1;
        Ok(())
    }

    fn highest_non_empty(&self) -> Option<Priority> {
        Priority::DESCENDING
            .into_iter()
            .find(|priority| self.heads[priority.index()] != SLOT_NONE)
    }

    fn unlink_head(&mut self, priority: Priority, expected: u16) -> Result<(), QueueError> {
        let level = priority.index();
        if self.heads[level] != expected || self.counts[level] == 0 {
            return Err(QueueError::Corrupted);
        }
        let next = *self.next_mut(expected)?;
        self.heads[level] = next;
        if next == SLOT_NONE {
            self.tails[level] = SLOT_NONE;
        }
        self.counts[level] -= 1;
        self.linked = self.linked.saturating_sub(1);
        Ok(())
    }

    /// Move every published slot from the ready ring into the lists.
    fn absorb(&mut self, shared: &Shared) -> Result<(), QueueError> {
        while let Some(index) = shared.ready.pop() {
            let slot = shared.slot(index)?;
            if !slot.is_ready() {
                return Err(QueueError::Corrupted);
            }
            // SAFETY: the slot was popped from the ready ring, so the
            // producer has finished with it and the consumer now owns it.
            let (priority, key) = unsafe { slot.read(|body| (body.priority, body.key)) };
            if key != 0 && self.absorb_coalesced(shared, index, key)? {
                continue;
            }
            self.link_tail(index, priority)?;
        }
        Ok(())
    }

    /// Resolve a keyed slot against the coalescing table.
    ///
    /// Returns `true` when the slot's payload was folded into an older
    /// queued message and the slot itself released.
    fn absorb_coalesced(&mut self, shared: &Shared, index: u16, key: u16) -> Result<bool, QueueError> {
        let bucket = coalesce_bucket(key);
        let existing = self.coalesce[bucket];
        if existing != SLOT_NONE && existing != index {
            let target = shared.slot(existing)?;
            let source = shared.slot(index)?;
            // SAFETY: both slots are absorbed and owned by the consumer.
            let target_key = unsafe { target.read(|body| body.key) };
            if target_key == key {
                // SAFETY: distinct consumer-owned slots.
                unsafe {
                    source.read(|src| target.write(|dst| dst.set_payload(src.payload())));
                }
                release(shared, index)?;
                trace!(key, slot = existing, "coalesced deferred push");
                metrics::inc_coalesced();
                return Ok(true);
            }
            debug!(key, evicted_key = target_key, bucket, "coalesce bucket collision");
        }
        self.coalesce[bucket] = index;
        Ok(false)
    }

    fn forget_coalesce(&mut self, index: u16, key: u16) {
        if key == 0 {
            return;
        }
        let bucket = coalesce_bucket(key);
        if self.coalesce[bucket] == index {
            self.coalesce[bucket] = SLOT_NONE;
        }
    }

    fn verify(&self, shared: &Shared) -> Result<(), QueueError> {
        let capacity = shared.capacity();
        let mut total = 0usize;
        for priority in Priority::DESCENDING {
            let level = priority.index();
            let mut walked = 0usize;
            let mut cursor = self.heads[level];
            let mut last = SLOT_NONE;
            while cursor != SLOT_NONE {
                walked += 1;
                if walked > capacity {
                    return Err(QueueError::Corrupted);
                }
                last = cursor;
                cursor = *self
                    .next
                    .get(usize::from(cursor))
                    .ok_or(QueueError::Corrupted)?;
            }
            if walked != self.counts[level] || last != self.tails[level] {
                return Err(QueueError::Corrupted);
            }
            total += walked;
        }
        if total != self.linked || self.linked + shared.free.len() > capacity {
            return Err(QueueError::Corrupted);
        }
        for &index in &self.coalesce {
            if index != SLOT_NONE && usize::from(index) >= capacity {
                return Err(QueueError::Corrupted);
            }
        }
        Ok(())
    }
}

fn poison(shared: &Shared, err: QueueError) -> QueueError {
    if err == QueueError::Corrupted {
        shared.poisoned.store(true, Ordering::Release);
    }
    err
}

fn release(shared: &Shared, index: u16) -> Result<(), QueueError> {
    shared.slot(index)?.clear();
    if shared.free.push(index) {
        Ok(())
    } else {
        Err(QueueError::Corrupted)
    }
}

/// Polling half of a ring queue.
///
/// Obtained from [`RingQueue::split`](super::RingQueue::split); it absorbs
/// messages published by the paired [`IsrProducer`](super::IsrProducer) and
/// dequeues them in priority order.
#[derive(Debug)]
pub struct QueueConsumer {
    shared: Arc<Shared>,
    lists: Lists,
}

impl QueueConsumer {
    pub(crate) fn new(shared: Arc<Shared>) -> Result<Self, QueueError> {
        let lists = Lists::with_capacity(shared.capacity())?;
        Ok(Self { shared, lists })
    }

    pub(crate) fn shared(&self) -> &Shared { &self.shared }

    pub(crate) fn shared_arc(&self) -> &Arc<Shared> { &self.shared }

    fn healthy(&self) -> Result<(), QueueError> {
        if self.shared.is_poisoned() {
            Err(QueueError::Corrupted)
        } else {
            Ok(())
        }
    }

    /// Pull newly published messages into the priority lists.
    pub(crate) fn absorb(&mut self) -> Result<(), QueueError> {
        self.healthy()?;
        self.lists
            .absorb(&self.shared)
            .map_err(|err| poison(&self.shared, err))
    }

    /// Overwrite a queued message sharing `key`, if the bucket still tracks
    /// one. Returns whether the overwrite happened.
    pub(crate) fn coalesce_in_place(&mut self, key: u16, data: &[u8]) -> Result<bool, QueueError> {
        self.absorb()?;
        let existing = self.lists.coalesce[coalesce_bucket(key)];
        if existing == SLOT_NONE {
            return Ok(false);
        }
        let slot = self.shared.slot(existing).map_err(|err| poison(&self.shared, err))?;
        // SAFETY: the slot is absorbed and linked, so the consumer owns it.
        let replaced = unsafe {
            slot.write(|body| {
                if body.key == key {
                    body.set_payload(data);
                    true
                } else {
                    false
                }
            })
        };
        if replaced {
            trace!(key, slot = existing, "coalesced push in place");
            metrics::inc_coalesced();
        }
        Ok(replaced)
    }

    /// Remove and copy out the highest-priority message.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Corrupted`] if the queue state is inconsistent.
    pub fn pop_priority(&mut self) -> Result<Option<PoppedMessage>, QueueError> {
        let Some(pending) = self.pop_direct()? else {
            return Ok(None);
        };
        let message = pending.with_body(PoppedMessage::from_body);
        pending.commit()?;
        Ok(Some(message))
    }

    /// Borrow the highest-priority message in place.
    ///
    /// The returned guard must be committed to remove the message. Dropping
    /// it, or calling [`DirectPop::rollback`], leaves the message at the head
    /// of its priority level.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Corrupted`] if the queue state is inconsistent.
    pub fn pop_direct(&mut self) -> Result<Option<DirectPop<'_>>, QueueError> {
        self.absorb()?;
        let Some(priority) = self.lists.highest_non_empty() else {
            return Ok(None);
        };
        let index = self.lists.heads[priority.index()];
        let shared: &Shared = &self.shared;
        let slot = shared.slot(index).map_err(|err| poison(shared, err))?;
        Ok(Some(DirectPop {
            shared,
            lists: &mut self.lists,
            slot,
            index,
            priority,
        }))
    }

    /// Number of occupied slots, including pushes not yet absorbed.
    #[must_use]
    pub fn len(&self) -> usize { self.shared.occupancy() }

    /// Whether no slots are occupied.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize { self.shared.capacity() }

    /// Number of slots available to the producer.
    #[must_use]
    pub fn free_slots(&self) -> usize { self.capacity().saturating_sub(self.len()) }

    /// Occupancy as a percentage of capacity, 0 to 100.
    #[must_use]
    pub fn pressure(&self) -> u8 {
        let percent = self.len().saturating_mul(100) / self.capacity().max(1);
        u8::try_from(percent.min(100)).unwrap_or(100)
    }

    /// Collect and clear the conditions raised by the producer.
    pub fn take_isr_events(&mut self) -> IsrEvents {
        IsrEvents {
            queue_full: self.shared.isr_full.swap(false, Ordering::AcqRel),
            oversize: self.shared.isr_oversize.swap(false, Ordering::AcqRel),
        }
    }

    /// Verify the internal bookkeeping, poisoning the queue on failure.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Corrupted`] when the lists and rings disagree.
    pub fn check_integrity(&mut self) -> Result<(), QueueError> {
        self.absorb()?;
        self.lists
            .verify(&self.shared)
            .map_err(|err| poison(&self.shared, err))
    }

    #[cfg(test)]
    pub(crate) fn corrupt_for_tests(&mut self) { self.lists.counts[Priority::Normal.index()] += 1; }
}

/// Borrowed view of the message at the head of the queue.
///
/// Only one view can exist at a time because it mutably borrows the queue.
#[derive(Debug)]
pub struct DirectPop<'a> {
    shared: &'a Shared,
    lists: &'a mut Lists,
    slot: &'a Slot,
    index: u16,
    priority: Priority,
}

impl DirectPop<'_> {
    fn with_body<R>(&self, f: impl FnOnce(&SlotBody) -> R) -> R {
        // SAFETY: the slot is linked at the head of its level and owned by
        // the consumer for the lifetime of this view.
        unsafe { self.slot.read(f) }
    }

    /// Message bytes, borrowed from the slot.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        // SAFETY: as for `with_body`; the slice cannot outlive this view,
        // during which the slot is neither released nor rewritten.
        unsafe { self.slot.body_ref() }.payload()
    }

    /// Priority of the message.
    #[must_use]
    pub const fn priority(&self) -> Priority { self.priority }

    /// Flags recorded with the message.
    #[must_use]
    pub fn flags(&self) -> SlotFlags { self.with_body(|body| body.flags) }

    /// Remove the message from the queue.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Corrupted`] if the head changed underneath the
    /// view or the slot cannot be returned to the free ring.
    pub fn commit(self) -> Result<(), QueueError> {
        let key = self.with_body(|body| body.key);
        let Self {
            shared,
            lists,
            index,
            priority,
            ..
        } = self;
        lists
            .unlink_head(priority, index)
            .and_then(|()| {
                lists.forget_coalesce(index, key);
                release(shared, index)
            })
            .map_err(|err| poison(shared, err))
    }

    /// Leave the message at the head of its priority level.
    pub fn rollback(self) {
        trace!(slot = self.index, priority = ?self.priority, "direct pop rolled back");
    }
}
