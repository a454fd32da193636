//! Slot state machine of the IPC ring.
//!
//! # Layout
//!
//! - `entry_count` fixed-size slots of `entry_size` bytes
//! - one ownership bit per slot, packed into `u64` words; a set bit means the
//!   slot holds an unconsumed item
//! - one claim bit per slot, set while a producer is filling it
//! - a producer cursor
//! - a consumer word: cursor in the low 31 bits, [`ACTIVE`] in bit 31
//!
//! # Protocol
//!
//! A producer claims the slot under the cursor by setting its claim bit and
//! then CAS-advancing the cursor past it, provided the slot's ownership bit is
//! clear. The claim bit keeps a second producer off the slot even if the
//! cursor laps back to it before the fill completes. The producer copies the
//! payload in, sets the ownership bit, drops the claim and then reads the
//! consumer word. If the consumer is not ACTIVE and its cursor equals the slot
//! just filled, the consumer is (or is about to be) waiting for exactly this
//! item and the producer must wake it.
//!
//! The consumer that finds its slot empty clears ACTIVE, then re-checks the
//! slot. Either the re-check sees the item, or the producer's read of the
//! consumer word sees ACTIVE clear. All operations are `SeqCst`, so at least
//! one side observes the other and no wakeup is lost.
//!
//! Blocking and waking are not done here; the kernel pairs this state machine
//! with its notification objects.

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

use crate::sync::{spin_hint, AtomicU32, AtomicU64, Ordering, UnsafeCell};

/// Consumer-word flag: the consumer is running and will look at its cursor
/// again without being woken.
pub const ACTIVE: u32 = 1 << 31;

const CURSOR_MASK: u32 = !ACTIVE;

/// Ring errors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RingError {
    /// The slot under the producer cursor still holds an unconsumed item
    Full,
    /// Payload is longer than the ring's entry size
    PayloadTooLarge,
}

impl core::fmt::Display for RingError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RingError::Full => write!(f, "ring full"),
            RingError::PayloadTooLarge => write!(f, "payload larger than ring entry"),
        }
    }
}

/// Result of a successful produce
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Produced {
    /// Slot the payload was written to
    pub slot: u32,
    /// The consumer is waiting for this item and must be woken
    pub wake_consumer: bool,
}

/// Exclusive claim on one filled slot, returned to the ring by `release`.
///
/// Deliberately neither `Clone` nor `Copy`: holding the key is what keeps the
/// producer from overwriting the slot.
#[derive(Debug, PartialEq, Eq)]
pub struct RingKey {
    slot: u32,
}

impl RingKey {
    /// Slot index this key refers to
    pub fn slot(&self) -> u32 {
        self.slot
    }
}

/// Outcome of a consumer acquire attempt
#[derive(Debug, PartialEq, Eq)]
pub enum Acquire {
    /// An item is ready in the keyed slot
    Ready(RingKey),
    /// The ring is empty and ACTIVE has been cleared; the consumer must block
    /// until the producer wakes it.
    MustWait,
}

/// Fixed-capacity ring of byte entries with a single consumer.
///
/// Any number of threads may produce; slot claims are atomic.
pub struct RingBuffer {
    entry_size: usize,
    entry_count: u32,
    slots: Box<[UnsafeCell<Box<[u8]>>]>,
    full: Box<[AtomicU64]>,
    claimed: Box<[AtomicU64]>,
    producer: AtomicU32,
    consumer: AtomicU32,
}

// SAFETY: slot bytes are written only by the producer holding the slot's claim
// bit while its ownership bit is clear, and read only by the key holder while
// the ownership bit is set. Claim and ownership transitions are SeqCst
// atomics, which order the byte accesses between the two sides.
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    /// Create an empty ring.
    ///
    /// Returns `None` if `entry_size` is zero or `entry_count` is zero or
    /// does not fit in the 31-bit cursor.
    pub fn new(entry_size: usize, entry_count: u32) -> Option<Self> {
        if entry_size == 0 || entry_count == 0 || entry_count > CURSOR_MASK {
            return None;
        }
        entry_size.checked_mul(entry_count as usize)?;
        let words = (entry_count as usize).div_ceil(64);

        let slots: Box<[UnsafeCell<Box<[u8]>>]> = (0..entry_count)
            .map(|_| UnsafeCell::new(vec![0u8; entry_size].into_boxed_slice()))
            .collect();
        let full: Box<[AtomicU64]> = (0..words).map(|_| AtomicU64::new(0)).collect();
        let claimed: Box<[AtomicU64]> = (0..words).map(|_| AtomicU64::new(0)).collect();

        Some(Self {
            entry_size,
            entry_count,
            slots,
            full,
            claimed,
            producer: AtomicU32::new(0),
            // The consumer starts ACTIVE: it has not blocked yet.
            consumer: AtomicU32::new(ACTIVE),
        })
    }

    pub fn entry_size(&self) -> usize {
        self.entry_size
    }

    pub fn entry_count(&self) -> u32 {
        self.entry_count
    }

    /// Next slot the producer will fill
    pub fn producer_cursor(&self) -> u32 {
        self.producer.load(Ordering::SeqCst)
    }

    /// Next slot the consumer will take
    pub fn consumer_cursor(&self) -> u32 {
        self.consumer.load(Ordering::SeqCst) & CURSOR_MASK
    }

    /// True unless the consumer has announced it is about to block
    pub fn consumer_active(&self) -> bool {
        self.consumer.load(Ordering::SeqCst) & ACTIVE != 0
    }

    /// True if `slot` holds an unconsumed item
    pub fn is_slot_full(&self, slot: u32) -> bool {
        let (word, bit) = self.locate(slot);
        self.full[word].load(Ordering::SeqCst) & bit != 0
    }

    /// Number of slots currently holding items
    pub fn len(&self) -> usize {
        self.full
            .iter()
            .map(|w| w.load(Ordering::SeqCst).count_ones() as usize)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `payload` into the next slot.
    ///
    /// Shorter payloads are zero-padded to the entry size. Safe to call from
    /// several producers at once; each successful call gets its own slot.
    pub fn produce(&self, payload: &[u8]) -> Result<Produced, RingError> {
        if payload.len() > self.entry_size {
            return Err(RingError::PayloadTooLarge);
        }

        let slot = self.claim()?;
        let (word, bit) = self.locate(slot);

        // SAFETY: this thread holds the slot's claim bit and its ownership bit
        // is clear, so no other producer writes it and the consumer holds no
        // key for it until the ownership bit is set below.
        self.slots[slot as usize].with_mut(|buf| unsafe {
            let buf = &mut *buf;
            buf[..payload.len()].copy_from_slice(payload);
            buf[payload.len()..].fill(0);
        });

        self.full[word].fetch_or(bit, Ordering::SeqCst);
        self.claimed[word].fetch_and(!bit, Ordering::SeqCst);

        let consumer = self.consumer.load(Ordering::SeqCst);
        let wake_consumer = consumer & ACTIVE == 0 && consumer & CURSOR_MASK == slot;

        Ok(Produced {
            slot,
            wake_consumer,
        })
    }

    /// Claim the slot under the producer cursor and advance the cursor.
    fn claim(&self) -> Result<u32, RingError> {
        loop {
            let slot = self.producer.load(Ordering::SeqCst);
            if self.is_slot_full(slot) {
                return Err(RingError::Full);
            }

            let (word, bit) = self.locate(slot);
            if self.claimed[word].fetch_or(bit, Ordering::SeqCst) & bit != 0 {
                // Another producer is mid-fill on this slot.
                spin_hint();
                continue;
            }

            if !self.is_slot_full(slot)
                && self
                    .producer
                    .compare_exchange(slot, self.advance(slot), Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            {
                return Ok(slot);
            }
            self.claimed[word].fetch_and(!bit, Ordering::SeqCst);
        }
    }

    /// Take the next item without ever clearing ACTIVE.
    ///
    /// For consumers that poll rather than block.
    pub fn try_acquire(&self) -> Option<RingKey> {
        loop {
            let consumer = self.consumer.load(Ordering::SeqCst);
            let cursor = consumer & CURSOR_MASK;
            if !self.is_slot_full(cursor) {
                return None;
            }
            let next = self.advance(cursor) | ACTIVE;
            if self
                .consumer
                .compare_exchange(consumer, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Some(RingKey { slot: cursor });
            }
        }
    }

    /// Take the next item, or announce that the consumer is going to block.
    ///
    /// On [`Acquire::MustWait`] ACTIVE is clear and the producer's next fill of
    /// the consumer cursor reports `wake_consumer`. Taking an item sets ACTIVE
    /// again.
    pub fn acquire_or_idle(&self) -> Acquire {
        loop {
            let consumer = self.consumer.load(Ordering::SeqCst);
            let cursor = consumer & CURSOR_MASK;

            if self.is_slot_full(cursor) {
                let next = self.advance(cursor) | ACTIVE;
                if self
                    .consumer
                    .compare_exchange(consumer, next, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    return Acquire::Ready(RingKey { slot: cursor });
                }
                continue;
            }

            if consumer & ACTIVE != 0
                && self
                    .consumer
                    .compare_exchange(consumer, cursor, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
            {
                continue;
            }

            // Close the window between the empty check and clearing ACTIVE.
            if self.is_slot_full(cursor) {
                continue;
            }
            return Acquire::MustWait;
        }
    }

    /// Payload bytes of the keyed slot.
    ///
    /// # Panics
    /// If the key does not refer to a filled slot of this ring.
    pub fn read<'a>(&'a self, key: &'a RingKey) -> &'a [u8] {
        assert!(
            key.slot < self.entry_count && self.is_slot_full(key.slot),
            "ring key does not own a filled slot"
        );
        // SAFETY: the slot's bit is set and the caller holds its only key, so
        // no producer will write it while the returned borrow (tied to the
        // key) is alive.
        self.slots[key.slot as usize].with(|buf| unsafe { &**buf })
    }

    /// Copy the keyed slot's payload out.
    pub fn copy_out(&self, key: &RingKey) -> Vec<u8> {
        self.read(key).to_vec()
    }

    /// Return the keyed slot to the producer. Returns the slot index.
    pub fn release(&self, key: RingKey) -> u32 {
        let (word, bit) = self.locate(key.slot);
        let mut current = self.full[word].load(Ordering::SeqCst);
        loop {
            debug_assert!(current & bit != 0, "releasing an empty slot");
            match self.full[word].compare_exchange(
                current,
                current & !bit,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return key.slot,
                Err(actual) => current = actual,
            }
        }
    }

    #[inline]
    fn advance(&self, slot: u32) -> u32 {
        if slot + 1 == self.entry_count {
            0
        } else {
            slot + 1
        }
    }

    #[inline]
    fn locate(&self, slot: u32) -> (usize, u64) {
        ((slot / 64) as usize, 1u64 << (slot % 64))
    }
}

impl core::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("entry_size", &self.entry_size)
            .field("entry_count", &self.entry_count)
            .field("producer", &self.producer_cursor())
            .field("consumer", &self.consumer_cursor())
            .field("active", &self.consumer_active())
            .finish()
    }
}
