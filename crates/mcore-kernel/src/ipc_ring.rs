//! Single-producer, single-consumer IPC ring with blocking endpoints.
//!
//! The lock-free slot protocol lives in `mcore_primitives::RingBuffer`. This
//! wrapper pairs it with two notify objects:
//!
//! - `recv`: the consumer blocks here (RecvBlocked) after
//!   `acquire_or_idle` reports `MustWait`; the producer signals it when
//!   `produce` reports `wake_consumer`.
//! - `space`: a producer using [`IpcRing::produce_wait`] on a full ring
//!   blocks here (SendBlocked); the consumer signals it on release when the
//!   producer announced itself.
//!
//! The producer side of `space` uses the same announce-then-recheck order as
//! the consumer's ACTIVE flag, so a release between the failed produce and
//! the wait is never missed.

use std::sync::atomic::{AtomicBool, Ordering};

use mcore_primitives::{Acquire, RingBuffer, RingError, RingKey};

use crate::error::KernelError;
use crate::syscall::{status_error, Signaller, UserContext};
use crate::types::NotifyHandle;

/// A ring shared by one producer thread and one consumer thread.
pub struct IpcRing {
    ring: RingBuffer,
    recv: NotifyHandle,
    space: NotifyHandle,
    producer_waiting: AtomicBool,
}

impl IpcRing {
    pub(crate) fn new(ring: RingBuffer, recv: NotifyHandle, space: NotifyHandle) -> Self {
        Self {
            ring,
            recv,
            space,
            producer_waiting: AtomicBool::new(false),
        }
    }

    pub fn entry_size(&self) -> usize {
        self.ring.entry_size()
    }

    pub fn entry_count(&self) -> u32 {
        self.ring.entry_count()
    }

    /// Items produced and not yet released
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Notify the consumer blocks on
    pub fn recv_handle(&self) -> NotifyHandle {
        self.recv
    }

    /// Notify a waiting producer blocks on
    pub fn space_handle(&self) -> NotifyHandle {
        self.space
    }

    /// Raw slot state, for inspection
    pub fn buffer(&self) -> &RingBuffer {
        &self.ring
    }

    // ========================================================================
    // Producer
    // ========================================================================

    /// Copy `payload` into the next slot, waking the consumer if it is
    /// blocked on exactly that slot. Returns the slot index.
    ///
    /// A full ring fails with `RingError::Full` and is left untouched.
    pub fn produce(&self, signaller: &dyn Signaller, payload: &[u8]) -> Result<u32, RingError> {
        let produced = self.ring.produce(payload)?;
        if produced.wake_consumer {
            if let Err(e) = signaller.signal(self.recv, 1) {
                log::warn!("ring consumer wake failed: {}", e);
            }
        }
        Ok(produced.slot)
    }

    /// Produce, blocking the calling thread while the ring is full.
    pub fn produce_wait(&self, ctx: &UserContext, payload: &[u8]) -> Result<u32, KernelError> {
        loop {
            match self.produce(ctx, payload) {
                Ok(slot) => return Ok(slot),
                Err(RingError::PayloadTooLarge) => return Err(KernelError::PayloadTooLarge),
                Err(RingError::Full) => {}
            }

            self.producer_waiting.store(true, Ordering::SeqCst);
            if !self.ring.is_slot_full(self.ring.producer_cursor()) {
                self.producer_waiting.store(false, Ordering::SeqCst);
                continue;
            }
            ctx.wait_for_notify(self.space).map_err(status_error)?;
        }
    }

    // ========================================================================
    // Consumer
    // ========================================================================

    /// Take the next item if one is ready, without blocking.
    pub fn try_consume<'a>(&'a self, signaller: &'a dyn Signaller) -> Option<RingEntry<'a>> {
        self.ring.try_acquire().map(|key| RingEntry {
            ring: self,
            key: Some(key),
            signaller,
        })
    }

    /// Take the next item, blocking the calling thread while the ring is empty.
    pub fn consume<'a>(&'a self, ctx: &'a UserContext) -> Result<RingEntry<'a>, KernelError> {
        loop {
            match self.ring.acquire_or_idle() {
                Acquire::Ready(key) => {
                    return Ok(RingEntry {
                        ring: self,
                        key: Some(key),
                        signaller: ctx,
                    })
                }
                Acquire::MustWait => {
                    ctx.wait_for_notify(self.recv).map_err(status_error)?;
                }
            }
        }
    }

    fn release(&self, key: RingKey, signaller: &dyn Signaller) {
        self.ring.release(key);
        if self.producer_waiting.swap(false, Ordering::SeqCst) {
            if let Err(e) = signaller.signal(self.space, 1) {
                log::warn!("ring producer wake failed: {}", e);
            }
        }
    }
}

impl core::fmt::Debug for IpcRing {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IpcRing")
            .field("entry_size", &self.ring.entry_size())
            .field("entry_count", &self.ring.entry_count())
            .field("len", &self.ring.len())
            .field("recv", &self.recv)
            .field("space", &self.space)
            .finish()
    }
}

/// An acquired ring slot. The slot goes back to the producer when the entry
/// is dropped.
pub struct RingEntry<'a> {
    ring: &'a IpcRing,
    key: Option<RingKey>,
    signaller: &'a dyn Signaller,
}

impl RingEntry<'_> {
    /// Payload bytes (entry-size long, zero-padded)
    pub fn data(&self) -> &[u8] {
        match &self.key {
            Some(key) => self.ring.ring.read(key),
            None => &[],
        }
    }

    pub fn slot(&self) -> Option<u32> {
        self.key.as_ref().map(|key| key.slot())
    }

    /// Copy the payload out and release the slot.
    pub fn take(self) -> Vec<u8> {
        self.data().to_vec()
    }
}

impl Drop for RingEntry<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.ring.release(key, self.signaller);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spin::Mutex;

    /// Records signals instead of issuing syscalls.
    #[derive(Default)]
    struct Recorder {
        signals: Mutex<Vec<(NotifyHandle, u64)>>,
    }

    impl Signaller for Recorder {
        fn signal(&self, handle: NotifyHandle, data: u64) -> Result<u64, KernelError> {
            self.signals.lock().push((handle, data));
            Ok(data)
        }
    }

    const RECV: NotifyHandle = NotifyHandle(10);
    const SPACE: NotifyHandle = NotifyHandle(11);

    fn ring(size: usize, count: u32) -> IpcRing {
        IpcRing::new(RingBuffer::new(size, count).unwrap(), RECV, SPACE)
    }

    #[test]
    fn test_fifo_order() {
        let r = ring(8, 4);
        let sig = Recorder::default();
        for i in 0..4u8 {
            r.produce(&sig, &[i, i]).unwrap();
        }
        for i in 0..4u8 {
            let entry = r.try_consume(&sig).unwrap();
            assert_eq!(&entry.data()[..2], &[i, i]);
            assert_eq!(entry.data().len(), 8);
        }
        assert!(r.try_consume(&sig).is_none());
        assert!(r.is_empty());
    }

    #[test]
    fn test_full_ring_rejects_then_accepts_after_release() {
        let r = ring(4, 2);
        let sig = Recorder::default();
        r.produce(&sig, b"a").unwrap();
        r.produce(&sig, b"b").unwrap();
        assert_eq!(r.produce(&sig, b"c"), Err(RingError::Full));
        assert_eq!(r.len(), 2);

        let first = r.try_consume(&sig).unwrap().take();
        assert_eq!(first[0], b'a');

        assert_eq!(r.produce(&sig, b"c"), Ok(0));
        let rest: Vec<u8> = (0..2).map(|_| r.try_consume(&sig).unwrap().take()[0]).collect();
        assert_eq!(rest, b"bc".to_vec());
    }

    #[test]
    fn test_payload_too_large() {
        let r = ring(4, 2);
        let sig = Recorder::default();
        assert_eq!(r.produce(&sig, b"toolong"), Err(RingError::PayloadTooLarge));
        assert!(r.is_empty());
    }

    #[test]
    fn test_wrap_boundary_laps() {
        let r = ring(2, 3);
        let sig = Recorder::default();
        for lap in 0..5u8 {
            for i in 0..3u8 {
                let slot = r.produce(&sig, &[lap, i]).unwrap();
                assert_eq!(slot, i as u32);
            }
            for i in 0..3u8 {
                let entry = r.try_consume(&sig).unwrap();
                assert_eq!(entry.slot(), Some(i as u32));
                assert_eq!(entry.data(), &[lap, i]);
            }
        }
    }

    #[test]
    fn test_produce_into_idle_consumer_signals_recv() {
        let r = ring(4, 4);
        let sig = Recorder::default();

        // Consumer starts ACTIVE: no wake
        r.produce(&sig, b"x").unwrap();
        assert!(sig.signals.lock().is_empty());
        drop(r.try_consume(&sig));

        // Consumer finds the ring empty and goes idle
        assert!(matches!(r.ring.acquire_or_idle(), Acquire::MustWait));
        r.produce(&sig, b"y").unwrap();
        assert_eq!(*sig.signals.lock(), vec![(RECV, 1)]);
    }

    #[test]
    fn test_release_wakes_announced_producer() {
        let r = ring(4, 1);
        let sig = Recorder::default();
        r.produce(&sig, b"x").unwrap();

        let entry = r.try_consume(&sig).unwrap();
        drop(entry);
        assert!(sig.signals.lock().is_empty());

        r.produce(&sig, b"y").unwrap();
        r.producer_waiting.store(true, Ordering::SeqCst);
        drop(r.try_consume(&sig));
        assert_eq!(*sig.signals.lock(), vec![(SPACE, 1)]);
        assert!(!r.producer_waiting.load(Ordering::SeqCst));
    }
}
