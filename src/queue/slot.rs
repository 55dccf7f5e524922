//! Fixed-size message slots backing the ring queue.

use bitflags::bitflags;

use super::{
    SLOT_SIZE,
    sync::{AtomicU8, Ordering, UnsafeCell},
};
use crate::priority::Priority;

bitflags! {
    /// Per-message flags recorded in a slot.
    ///
    /// # Examples
    ///
    /// ```
    /// use peertalk::queue::SlotFlags;
    ///
    /// let flags = SlotFlags::COALESCABLE | SlotFlags::FRAGMENT;
    /// assert!(flags.contains(SlotFlags::FRAGMENT));
    /// assert!(!SlotFlags::empty().contains(SlotFlags::COALESCABLE));
    /// ```
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct SlotFlags: u8 {
        /// The message was pushed with a coalescing key.
        const COALESCABLE = 0x02;
        /// The message is one chunk of a fragmented payload.
        const FRAGMENT = 0x08;
    }
}

// Slot lifecycle bits. The producer sets them while it owns the slot; the
// consumer clears them when it hands the slot back to the free ring.
pub(crate) const STATE_USED: u8 = 0x01;
pub(crate) const STATE_READY: u8 = 0x04;

#[derive(Debug)]
pub(crate) struct SlotBody {
    pub(crate) len: u16,
    pub(crate) priority: Priority,
    pub(crate) flags: SlotFlags,
    pub(crate) key: u16,
    pub(crate) data: [u8; SLOT_SIZE],
}

impl SlotBody {
    const fn empty() -> Self {
        Self {
            len: 0,
            priority: Priority::Low,
            flags: SlotFlags::empty(),
            key: 0,
            data: [0; SLOT_SIZE],
        }
    }

    pub(crate) fn payload(&self) -> &[u8] { &self.data[..usize::from(self.len)] }

    /// Overwrite the payload, truncating `data` to the slot size.
    pub(crate) fn set_payload(&mut self, data: &[u8]) {
        let len = data.len().min(SLOT_SIZE);
        self.data[..len].copy_from_slice(&data[..len]);
        self.len = u16::try_from(len).unwrap_or(u16::MAX);
    }
}

#[derive(Debug)]
pub(crate) struct Slot {
    state: AtomicU8,
    body: UnsafeCell<SlotBody>,
}

// SAFETY: access to `body` is handed between exactly one producer and one
// consumer through the free and ready index rings. A slot index is owned by
// at most one side at a time and the hand-off uses Release/Acquire ordering.
unsafe impl Sync for Slot {}
unsafe impl Send for Slot {}

impl Slot {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(0),
            body: UnsafeCell::new(SlotBody::empty()),
        }
    }

    /// Fill the slot and publish it as ready.
    ///
    /// # Safety
    ///
    /// The caller must own the slot: it was taken from the free ring and has
    /// not yet been pushed to the ready ring.
    pub(crate) unsafe fn publish(
        &self,
        data: &[u8],
        priority: Priority,
        flags: SlotFlags,
        key: u16,
    ) {
        self.body.with_mut(|body| {
            // SAFETY: exclusive ownership is guaranteed by the caller.
            let body = unsafe { &mut *body };
            body.set_payload(data);
            body.priority = priority;
            body.flags = flags;
            body.key = key;
        });
        self.state.store(STATE_USED | STATE_READY, Ordering::Release);
    }

    /// Report whether the producer finished writing this slot.
    pub(crate) fn is_ready(&self) -> bool {
        self.state.load(Ordering::Acquire) & (STATE_USED | STATE_READY)
            == STATE_USED | STATE_READY
    }

    /// Clear the lifecycle bits before the slot returns to the free ring.
    pub(crate) fn clear(&self) { self.state.store(0, Ordering::Release); }

    /// Run `f` with shared access to the slot body.
    ///
    /// # Safety
    ///
    /// The caller must be the consumer and the slot must be absorbed.
    pub(crate) unsafe fn read<R>(&self, f: impl FnOnce(&SlotBody) -> R) -> R {
        // SAFETY: the producer never touches an absorbed slot.
        self.body.with(|body| f(unsafe { &*body }))
    }

    /// Borrow the slot body for as long as the slot is borrowed.
    ///
    /// # Safety
    ///
    /// The caller must be the consumer, the slot must be absorbed, and the
    /// body must not be written while the reference is alive.
    pub(crate) unsafe fn body_ref(&self) -> &SlotBody {
        // SAFETY: upheld by the caller.
        self.body.with(|body| unsafe { &*body })
    }

    /// Run `f` with exclusive access to the slot body.
    ///
    /// # Safety
    ///
    /// The caller must be the consumer and the slot must be absorbed.
    pub(crate) unsafe fn write<R>(&self, f: impl FnOnce(&mut SlotBody) -> R) -> R {
        // SAFETY: the producer never touches an absorbed slot.
        self.body.with_mut(|body| f(unsafe { &mut *body }))
    }
}
