//! Lock-free byte-slot ring queues for cross-context handoff.
//!
//! SPSC (single producer, single consumer): radio-receive and GATT-write
//! callbacks push from their own execution context, application tasks drain.
//! The producer never blocks — a full queue drops the item.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

/// How a slot's payload is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// 16-bit little-endian PCM, forwarded as-is.
    Raw16,
    /// Legacy 8-bit PCM, upsampled before peripheral notification.
    Legacy8,
}

/// One queue slot: a bounded payload plus its encoding tag.
#[derive(Debug, Clone, Copy)]
pub struct Slot<const CAP: usize> {
    pub len: u16,
    pub kind: PayloadKind,
    pub data: [u8; CAP],
}

impl<const CAP: usize> Slot<CAP> {
    pub const fn empty() -> Self {
        Self {
            len: 0,
            kind: PayloadKind::Raw16,
            data: [0; CAP],
        }
    }

    /// The valid payload bytes of this slot.
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

/// Fixed-capacity SPSC ring queue of byte slots.
///
/// N must be a power of 2 so indices wrap via bitmask. `head`/`tail` are
/// free-running counters; the producer writes the slot contents *then*
/// publishes `head` with Release ordering, and the consumer loads `head`
/// with Acquire before reading the slot, so the payload write is visible
/// before the index update is observed.
pub struct RingQueue<const N: usize, const CAP: usize> {
    slots: UnsafeCell<[Slot<CAP>; N]>,
    /// Next slot the producer will write. Written by the producer only.
    head: AtomicUsize,
    /// Next slot the consumer will read. Written by the consumer only.
    tail: AtomicUsize,
}

// Safety: exactly one producer context calls `try_push` and exactly one
// consumer context calls `try_pop`. The producer only touches the slot at
// `head` before publishing it; the consumer only touches the slot at `tail`
// after observing `head` past it. No slot is ever owned by both sides.
unsafe impl<const N: usize, const CAP: usize> Sync for RingQueue<N, CAP> {}

impl<const N: usize, const CAP: usize> RingQueue<N, CAP> {
    pub const fn new() -> Self {
        const { assert!(N.is_power_of_two(), "queue capacity must be a power of 2") };

        Self {
            slots: UnsafeCell::new([Slot::empty(); N]),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    /// Push a payload from the producer context. Never blocks.
    ///
    /// Returns false (item dropped) when the queue is full. Payloads longer
    /// than the slot capacity are truncated to CAP bytes.
    pub fn try_push(&self, kind: PayloadKind, payload: &[u8]) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head.wrapping_sub(tail) == N {
            return false; // full
        }

        let len = payload.len().min(CAP);
        // Safety: this slot is not visible to the consumer until the head
        // store below; see the Sync contract.
        let slot = unsafe { &mut (*self.slots.get())[head & (N - 1)] };
        slot.len = len as u16;
        slot.kind = kind;
        slot.data[..len].copy_from_slice(&payload[..len]);

        self.head.store(head.wrapping_add(1), Ordering::Release);
        true
    }

    /// Pop the oldest item into `out` from the single consumer context.
    ///
    /// Returns false when the queue is empty.
    pub fn try_pop(&self, out: &mut Slot<CAP>) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail == head {
            return false; // empty
        }

        // Safety: the producer will not overwrite this slot until `tail`
        // advances past it.
        let slot = unsafe { &(*self.slots.get())[tail & (N - 1)] };
        out.len = slot.len;
        out.kind = slot.kind;
        let len = slot.len as usize;
        out.data[..len].copy_from_slice(&slot.data[..len]);

        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        true
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Relaxed);
        head.wrapping_sub(tail)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<const N: usize, const CAP: usize> Default for RingQueue<N, CAP> {
    fn default() -> Self {
        Self::new()
    }
}

/// Decoded mesh audio awaiting peripheral notification (relay side).
pub type NotifyQueue = RingQueue<64, 256>;

/// Raw peripheral writes awaiting chunking (hub side).
pub type InboundQueue = RingQueue<16, 256>;
