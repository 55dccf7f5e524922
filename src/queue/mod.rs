//! Tier-1 priority ring queue for small and control messages.
//!
//! The queue stores up to [`MAX_QUEUE_CAPACITY`] messages of at most
//! [`SLOT_SIZE`] bytes in a slot array allocated once at construction. It
//! offers O(1) dequeue of the highest-priority message (FIFO within a level)
//! and O(1) coalescing, where a newer message replaces a queued one that
//! shares its non-zero key.
//!
//! Two execution shapes are supported:
//!
//! - [`RingQueue`] is driven from a single context that both pushes and pops.
//! - [`RingQueue::split`] yields an [`IsrProducer`] for an asynchronous
//!   completion callback and a [`QueueConsumer`] for the polling loop. The
//!   halves communicate through lock-free index rings; the producer never
//!   allocates, blocks or logs.
//!
//! Slot ownership moves between the halves by index. Free slots travel
//! consumer → producer and filled slots producer → consumer, so neither side
//! ever observes a slot the other is writing.

use static_assertions::const_assert;

mod consumer;
mod errors;
mod index_ring;
mod producer;
mod slot;
pub(crate) mod sync;

pub use consumer::{DirectPop, IsrEvents, PoppedMessage, QueueConsumer};
pub use errors::QueueError;
pub use producer::IsrProducer;
pub use slot::SlotFlags;

use self::{
    index_ring::IndexRing,
    slot::Slot,
    sync::{Arc, AtomicBool, Ordering},
};
use crate::priority::Priority;

/// Payload bytes available in each slot.
pub const SLOT_SIZE: usize = 256;
/// Largest supported queue capacity.
pub const MAX_QUEUE_CAPACITY: usize = 1024;
/// Number of buckets in the direct-mapped coalescing table.
pub const COALESCE_BUCKETS: usize = 32;

/// Index sentinel meaning "no slot".
pub(crate) const SLOT_NONE: u16 = u16::MAX;

const_assert!(MAX_QUEUE_CAPACITY.is_power_of_two());
const_assert!(MAX_QUEUE_CAPACITY < SLOT_NONE as usize);
const_assert!(SLOT_SIZE <= u16::MAX as usize);
const_assert!(COALESCE_BUCKETS.is_power_of_two());

/// Map a coalescing key to its bucket.
///
/// Keys that differ only in bits folded together by the hash share a
/// bucket; see [`RingQueue::push_coalesce`] for the collision behaviour.
///
/// # Examples
///
/// ```
/// use peertalk::queue::coalesce_bucket;
///
/// assert_eq!(coalesce_bucket(0x0001), coalesce_bucket(0x0021));
/// assert_ne!(coalesce_bucket(0x0001), coalesce_bucket(0x0002));
/// ```
#[must_use]
pub const fn coalesce_bucket(key: u16) -> usize {
    ((key ^ (key >> 8)) as usize) & (COALESCE_BUCKETS - 1)
}

/// State shared between the producer and consumer halves.
#[derive(Debug)]
pub(crate) struct Shared {
    slots: Box<[Slot]>,
    /// Empty slots; consumer pushes, producer pops.
    free: IndexRing,
    /// Filled slots awaiting absorption; producer pushes, consumer pops.
    ready: IndexRing,
    /// Set by the consumer when an integrity check fails.
    poisoned: AtomicBool,
    /// Set by the producer, cleared by the consumer.
    isr_full: AtomicBool,
    /// Set by the producer, cleared by the consumer.
    isr_oversize: AtomicBool,
}

impl Shared {
    fn with_capacity(capacity: usize) -> Result<Self, QueueError> {
        if capacity == 0 || !capacity.is_power_of_two() || capacity > MAX_QUEUE_CAPACITY {
            return Err(QueueError::InvalidCapacity(capacity));
        }
        let alloc_failed = || QueueError::Allocation { capacity };

        let mut slots = Vec::new();
        slots.try_reserve_exact(capacity).map_err(|_| alloc_failed())?;
        slots.extend((0..capacity).map(|_| Slot::new()));

        let free = IndexRing::with_capacity(capacity).ok_or_else(alloc_failed)?;
        let ready = IndexRing::with_capacity(capacity).ok_or_else(alloc_failed)?;
        for index in 0..capacity {
            let index = u16::try_from(index).map_err(|_| QueueError::InvalidCapacity(capacity))?;
            if !free.push(index) {
                return Err(QueueError::Corrupted);
            }
        }

        Ok(Self {
            slots: slots.into_boxed_slice(),
            free,
            ready,
            poisoned: AtomicBool::new(false),
            isr_full: AtomicBool::new(false),
            isr_oversize: AtomicBool::new(false),
        })
    }

    pub(crate) fn capacity(&self) -> usize { self.slots.len() }

    /// Slots not sitting in the free ring.
    pub(crate) fn occupancy(&self) -> usize { self.capacity().saturating_sub(self.free.len()) }

    pub(crate) fn slot(&self, index: u16) -> Result<&Slot, QueueError> {
        self.slots.get(usize::from(index)).ok_or(QueueError::Corrupted)
    }

    pub(crate) fn is_poisoned(&self) -> bool { self.poisoned.load(Ordering::Acquire) }

    /// Copy a message into a free slot and publish it to the consumer.
    ///
    /// This is the producer path shared by both execution shapes. It does not
    /// allocate or log.
    fn produce(
        &self,
        data: &[u8],
        priority: Priority,
        flags: SlotFlags,
        key: u16,
    ) -> Result<(), QueueError> {
        if self.is_poisoned() {
            return Err(QueueError::Corrupted);
        }
        if data.len() > SLOT_SIZE {
            return Err(QueueError::PayloadTooLarge { len: data.len() });
        }
        let Some(index) = self.free.pop() else {
            return Err(QueueError::Full {
                capacity: self.capacity(),
            });
        };
        let slot = self.slot(index)?;
        // SAFETY: `index` came from the free ring, so this side owns the slot
        // until it is pushed to the ready ring below.
        unsafe { slot.publish(data, priority, flags, key) };
        if self.ready.push(index) {
            Ok(())
        } else {
            Err(QueueError::Corrupted)
        }
    }
}

/// Tier-1 queue driven from a single execution context.
///
/// # Examples
///
/// ```
/// use peertalk::{Priority, queue::RingQueue};
///
/// let mut queue = RingQueue::new(8).expect("power-of-two capacity");
/// queue.push(b"later", Priority::Low).expect("queue has room");
/// queue.push(b"first", Priority::Critical).expect("queue has room");
///
/// let popped = queue.pop_priority().expect("healthy queue").expect("message queued");
/// assert_eq!(popped.payload(), b"first");
/// assert_eq!(queue.len(), 1);
/// ```
#[derive(Debug)]
pub struct RingQueue {
    consumer: QueueConsumer,
}

impl RingQueue {
    /// Allocate a queue with `capacity` slots.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidCapacity`] unless `capacity` is a power of
    /// two no larger than [`MAX_QUEUE_CAPACITY`], and
    /// [`QueueError::Allocation`] if the slot array cannot be reserved.
    pub fn new(capacity: usize) -> Result<Self, QueueError> {
        let shared = Shared::with_capacity(capacity)?;
        let consumer = QueueConsumer::new(Arc::new(shared))?;
        Ok(Self { consumer })
    }

    /// Push a message at `priority`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::PayloadTooLarge`] when `data` exceeds
    /// [`SLOT_SIZE`], [`QueueError::Full`] when every slot is occupied and
    /// [`QueueError::Corrupted`] once the queue has failed an integrity
    /// check.
    pub fn push(&mut self, data: &[u8], priority: Priority) -> Result<(), QueueError> {
        self.push_with_flags(data, priority, SlotFlags::empty())
    }

    /// Push a message carrying explicit slot flags.
    ///
    /// # Errors
    ///
    /// See [`RingQueue::push`].
    pub fn push_with_flags(
        &mut self,
        data: &[u8],
        priority: Priority,
        flags: SlotFlags,
    ) -> Result<(), QueueError> {
        self.consumer.shared().produce(data, priority, flags, 0)?;
        self.consumer.absorb()
    }

    /// Push a message that supersedes any queued message sharing `key`.
    ///
    /// A `key` of zero behaves as [`RingQueue::push`]. When the key's bucket
    /// references a queued message with the same key, that message's payload
    /// is replaced in place: its position, priority and the queue occupancy
    /// are unchanged, so this succeeds even when the queue is full. Otherwise
    /// the message is pushed and claims the bucket. A different key already
    /// in the bucket stays queued but can no longer be coalesced.
    ///
    /// # Errors
    ///
    /// See [`RingQueue::push`].
    pub fn push_coalesce(
        &mut self,
        data: &[u8],
        priority: Priority,
        key: u16,
    ) -> Result<(), QueueError> {
        if key == 0 {
            return self.push(data, priority);
        }
        if data.len() > SLOT_SIZE {
            return Err(QueueError::PayloadTooLarge { len: data.len() });
        }
        if self.consumer.coalesce_in_place(key, data)? {
            return Ok(());
        }
        self.consumer
            .shared()
            .produce(data, priority, SlotFlags::COALESCABLE, key)?;
        self.consumer.absorb()
    }

    /// Remove and copy out the highest-priority message.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Corrupted`] if the queue state is inconsistent.
    pub fn pop_priority(&mut self) -> Result<Option<PoppedMessage>, QueueError> {
        self.consumer.pop_priority()
    }

    /// Borrow the highest-priority message without copying it.
    ///
    /// The message stays queued until [`DirectPop::commit`] is called.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Corrupted`] if the queue state is inconsistent.
    pub fn pop_direct(&mut self) -> Result<Option<DirectPop<'_>>, QueueError> {
        self.consumer.pop_direct()
    }

    /// Number of queued messages.
    #[must_use]
    pub fn len(&self) -> usize { self.consumer.len() }

    /// Whether no messages are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.consumer.is_empty() }

    /// Number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize { self.consumer.capacity() }

    /// Number of slots available to the next push.
    #[must_use]
    pub fn free_slots(&self) -> usize { self.consumer.free_slots() }

    /// Occupancy as a percentage of capacity, 0 to 100.
    #[must_use]
    pub fn pressure(&self) -> u8 { self.consumer.pressure() }

    /// Verify the internal bookkeeping.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Corrupted`] and poisons the queue when the
    /// priority lists, coalescing table and slot rings disagree.
    pub fn check_integrity(&mut self) -> Result<(), QueueError> {
        self.consumer.check_integrity()
    }

    /// Split into an asynchronous producer and a polling consumer.
    #[must_use]
    pub fn split(self) -> (IsrProducer, QueueConsumer) {
        let producer = IsrProducer::new(Arc::clone(self.consumer.shared_arc()));
        (producer, self.consumer)
    }
}
