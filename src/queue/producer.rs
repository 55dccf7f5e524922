//! Producer half for asynchronous completion contexts.

use super::{
    QueueError,
    Shared,
    SlotFlags,
    sync::{Arc, Ordering},
};
use crate::priority::Priority;

/// Pushes messages from an interrupt or network-completion callback.
///
/// The producer is not `Clone`, so each queue has exactly one. Its push
/// methods copy into a pre-allocated slot and publish it with a single
/// release store; they never allocate, block or log. Rejections are
/// returned to the caller and also raised as [`IsrEvents`](super::IsrEvents)
/// for the consumer to report.
///
/// Coalescing keys are resolved when the consumer absorbs the message, so a
/// keyed push from this side always takes a slot, which is freed again once
/// the consumer folds it into the older message.
///
/// # Examples
///
/// ```
/// use peertalk::{Priority, queue::RingQueue};
///
/// let (mut producer, mut consumer) = RingQueue::new(4).expect("valid capacity").split();
/// producer.push_isr(b"ping", Priority::High).expect("slot available");
///
/// let popped = consumer.pop_priority().expect("healthy").expect("queued");
/// assert_eq!(popped.payload(), b"ping");
/// ```
#[derive(Debug)]
pub struct IsrProducer {
    shared: Arc<Shared>,
}

impl IsrProducer {
    pub(crate) fn new(shared: Arc<Shared>) -> Self { Self { shared } }

    /// Push a message at `priority`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::PayloadTooLarge`], [`QueueError::Full`] or
    /// [`QueueError::Corrupted`] with the same meaning as
    /// [`RingQueue::push`](super::RingQueue::push).
    pub fn push_isr(&mut self, data: &[u8], priority: Priority) -> Result<(), QueueError> {
        self.push_with_flags_isr(data, priority, SlotFlags::empty())
    }

    /// Push a message carrying explicit slot flags.
    ///
    /// # Errors
    ///
    /// See [`IsrProducer::push_isr`].
    pub fn push_with_flags_isr(
        &mut self,
        data: &[u8],
        priority: Priority,
        flags: SlotFlags,
    ) -> Result<(), QueueError> {
        self.produce(data, priority, flags, 0)
    }

    /// Push a message that supersedes any queued message sharing `key`.
    ///
    /// # Errors
    ///
    /// See [`IsrProducer::push_isr`].
    pub fn push_coalesce_isr(
        &mut self,
        data: &[u8],
        priority: Priority,
        key: u16,
    ) -> Result<(), QueueError> {
        let flags = if key == 0 {
            SlotFlags::empty()
        } else {
            SlotFlags::COALESCABLE
        };
        self.produce(data, priority, flags, key)
    }

    /// Number of slots in the queue.
    #[must_use]
    pub fn capacity(&self) -> usize { self.shared.capacity() }

    fn produce(
        &mut self,
        data: &[u8],
        priority: Priority,
        flags: SlotFlags,
        key: u16,
    ) -> Result<(), QueueError> {
        let result = self.shared.produce(data, priority, flags, key);
        match result {
            Err(QueueError::Full { .. }) => self.shared.isr_full.store(true, Ordering::Release),
            Err(QueueError::PayloadTooLarge { .. }) => {
                self.shared.isr_oversize.store(true, Ordering::Release);
            }
            _ => {}
        }
        result
    }
}
