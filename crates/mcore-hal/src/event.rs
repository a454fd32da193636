//! Host wait primitives: events and wait-on-any.
//!
//! An [`EventSet`] holds up to 32 auto-reset events as bits of one word.
//! `wait_any` blocks until at least one of the requested events is signalled
//! (or the timeout passes) and consumes exactly the bits it returns.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// A set of auto-reset events that can be waited on together.
pub struct EventSet {
    pending: Mutex<u32>,
    cond: Condvar,
}

impl EventSet {
    /// Create an event set with nothing pending.
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    /// Signal every event in `bits`.
    pub fn signal(&self, bits: u32) {
        let mut pending = self.lock();
        *pending |= bits;
        self.cond.notify_all();
    }

    /// Bits currently signalled, without consuming them
    pub fn peek(&self) -> u32 {
        *self.lock()
    }

    /// Wait until one of the events in `mask` is signalled.
    ///
    /// `timeout` of `None` waits forever. Returns the signalled bits within
    /// `mask` (now cleared), or 0 on timeout.
    pub fn wait_any(&self, mask: u32, timeout: Option<Duration>) -> u32 {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut pending = self.lock();

        loop {
            let fired = *pending & mask;
            if fired != 0 {
                *pending &= !fired;
                return fired;
            }

            match deadline {
                None => {
                    pending = self
                        .cond
                        .wait(pending)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return 0;
                    }
                    pending = self
                        .cond
                        .wait_timeout(pending, deadline - now)
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .0;
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, u32> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for EventSet {
    fn default() -> Self {
        Self::new()
    }
}

/// A manual-reset event: once set, every waiter returns until it is reset.
pub struct Event {
    set: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    /// Create an unset event.
    pub fn new() -> Self {
        Self {
            set: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Set the event and wake all waiters.
    pub fn set(&self) {
        let mut set = self.lock();
        *set = true;
        self.cond.notify_all();
    }

    /// Clear the event.
    pub fn reset(&self) {
        *self.lock() = false;
    }

    /// True if the event is set
    pub fn is_set(&self) -> bool {
        *self.lock()
    }

    /// Wait for the event. Returns `false` if `timeout` elapsed first.
    pub fn wait(&self, timeout: Duration) -> bool {
        let set = self.lock();
        let (set, _) = self
            .cond
            .wait_timeout_while(set, timeout, |set| !*set)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *set
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wait_any_consumes_only_masked_bits() {
        let events = EventSet::new();
        events.signal(0b101);

        assert_eq!(events.wait_any(0b001, Some(Duration::ZERO)), 0b001);
        assert_eq!(events.peek(), 0b100);
        assert_eq!(events.wait_any(0b111, None), 0b100);
        assert_eq!(events.peek(), 0);
    }

    #[test]
    fn test_wait_any_timeout() {
        let events = EventSet::new();
        let start = Instant::now();
        assert_eq!(events.wait_any(0b1, Some(Duration::from_millis(20))), 0);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_wait_any_cross_thread() {
        let events = Arc::new(EventSet::new());
        let signaller = events.clone();

        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            signaller.signal(0b10);
        });

        assert_eq!(events.wait_any(0b10, Some(Duration::from_secs(5))), 0b10);
        t.join().unwrap();
    }

    #[test]
    fn test_manual_reset_event() {
        let event = Event::new();
        assert!(!event.wait(Duration::from_millis(1)));

        event.set();
        assert!(event.is_set());
        assert!(event.wait(Duration::ZERO));
        assert!(event.wait(Duration::ZERO));

        event.reset();
        assert!(!event.is_set());
    }
}
