//! Notify: a wait/signal object carrying an accumulable data word.
//!
//! ```text
//!            signal (no waiter)            wait
//!   Idle ───────────────────────▶ Active ───────▶ Idle   (data consumed)
//!    │  ▲                          │  ▲
//!    │  │ signal releases          └──┘ signal: data |= new
//!    │  │ the last waiter
//!    ▼  │
//!   Waiting ──┐ wait: append to FIFO
//!       ▲     │ signal: release head, handoff = new data only
//!       └─────┘
//! ```
//!
//! The lock is held only across the state/list mutation. Waking a released
//! waiter (possibly on another core) is left to the caller, after the lock
//! has been dropped.

use std::collections::VecDeque;
use std::sync::Arc;

use spin::Mutex;

use crate::thread::Thread;
use crate::types::{NotifyHandle, ThreadId, ThreadState};

/// Notify object state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotifyState {
    /// No data, no waiters
    Idle,
    /// At least one thread is waiting
    Waiting,
    /// Signalled with data nobody has consumed yet
    Active,
}

/// Result of a signal
#[derive(Debug)]
pub enum SignalOutcome {
    /// Nobody was waiting; the combined pending data word
    Accumulated(u64),
    /// The head waiter was removed from the wait list and must be woken with
    /// `data` as its result.
    Released { waiter: Arc<Thread>, data: u64 },
    /// The notify is Waiting with an empty wait list. Nothing was changed;
    /// the caller must treat this as fatal.
    Corrupt,
}

/// Result of a wait
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Data was pending and has been consumed; the caller does not block
    Ready(u64),
    /// The caller is now on the wait list
    Parked,
}

struct NotifyInner {
    state: NotifyState,
    data: u64,
    waiters: VecDeque<Arc<Thread>>,
}

/// A wait/signal object.
pub struct Notify {
    handle: NotifyHandle,
    /// State a parked waiter is put in
    block_state: ThreadState,
    inner: Mutex<NotifyInner>,
}

impl Notify {
    /// Create a notify whose waiters block in `block_state`
    /// (`WaitingOnNotify`, `RecvBlocked` or `SendBlocked`).
    pub fn new(handle: NotifyHandle, block_state: ThreadState) -> Self {
        debug_assert!(block_state.is_blocked_on_notify());
        Self {
            handle,
            block_state,
            inner: Mutex::new(NotifyInner {
                state: NotifyState::Idle,
                data: 0,
                waiters: VecDeque::new(),
            }),
        }
    }

    pub fn handle(&self) -> NotifyHandle {
        self.handle
    }

    pub fn block_state(&self) -> ThreadState {
        self.block_state
    }

    pub fn state(&self) -> NotifyState {
        self.inner.lock().state
    }

    /// Pending data word (meaningful only while Active)
    pub fn data(&self) -> u64 {
        let inner = self.inner.lock();
        match inner.state {
            NotifyState::Active => inner.data,
            _ => 0,
        }
    }

    /// Ids of the parked waiters, head first
    pub fn waiter_ids(&self) -> Vec<ThreadId> {
        self.inner.lock().waiters.iter().map(|t| t.id()).collect()
    }

    /// Signal with `data`.
    ///
    /// Exactly one waiter is released per call, however much data has
    /// accumulated.
    pub fn signal(&self, data: u64) -> SignalOutcome {
        let mut inner = self.inner.lock();
        match inner.state {
            NotifyState::Idle => {
                inner.state = NotifyState::Active;
                inner.data = data;
                SignalOutcome::Accumulated(data)
            }
            NotifyState::Active => {
                inner.data |= data;
                SignalOutcome::Accumulated(inner.data)
            }
            NotifyState::Waiting => match inner.waiters.pop_front() {
                Some(waiter) => {
                    if inner.waiters.is_empty() {
                        inner.state = NotifyState::Idle;
                    }
                    SignalOutcome::Released { waiter, data }
                }
                None => {
                    log::error!("notify {} is Waiting with no waiters", self.handle.0);
                    SignalOutcome::Corrupt
                }
            },
        }
    }

    /// Wait for a signal.
    ///
    /// If data is pending it is consumed and returned. Otherwise `thread` is
    /// appended to the wait list and `park` is called with it while the lock
    /// is held, so its state change is ordered before any signaller can
    /// release it.
    pub fn wait(&self, thread: &Arc<Thread>, park: impl FnOnce(&Arc<Thread>)) -> WaitOutcome {
        let mut inner = self.inner.lock();
        match inner.state {
            NotifyState::Active => {
                let data = inner.data;
                inner.state = NotifyState::Idle;
                inner.data = 0;
                WaitOutcome::Ready(data)
            }
            NotifyState::Idle | NotifyState::Waiting => {
                inner.state = NotifyState::Waiting;
                park(thread);
                inner.waiters.push_back(thread.clone());
                WaitOutcome::Parked
            }
        }
    }

    /// Remove every waiter (shutdown). The notify returns to Idle.
    pub fn drain_waiters(&self) -> Vec<Arc<Thread>> {
        let mut inner = self.inner.lock();
        inner.state = NotifyState::Idle;
        inner.data = 0;
        inner.waiters.drain(..).collect()
    }
}

impl core::fmt::Debug for Notify {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Notify")
            .field("handle", &self.handle)
            .field("state", &inner.state)
            .field("data", &inner.data)
            .field("waiters", &inner.waiters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::Process;
    use crate::types::ProcessId;

    fn thread(id: ThreadId) -> Arc<Thread> {
        let process = Arc::new(Process {
            id: ProcessId(1),
            name: String::from("test"),
        });
        Thread::new(id, "t", process, 0)
    }

    fn notify() -> Notify {
        Notify::new(NotifyHandle(1), ThreadState::WaitingOnNotify)
    }

    #[test]
    fn test_waiting_without_waiters_is_reported() {
        let n = notify();
        n.inner.lock().state = NotifyState::Waiting;

        assert!(matches!(n.signal(0x3), SignalOutcome::Corrupt));
        // Left as found; the signal is not turned into pending data
        assert_eq!(n.state(), NotifyState::Waiting);
        assert_eq!(n.inner.lock().data, 0);
    }

    #[test]
    fn test_signals_accumulate_by_or() {
        let n = notify();
        assert!(matches!(n.signal(0b0001), SignalOutcome::Accumulated(0b0001)));
        assert!(matches!(n.signal(0b0100), SignalOutcome::Accumulated(0b0101)));
        assert_eq!(n.state(), NotifyState::Active);
        assert_eq!(n.data(), 0b0101);

        let t = thread(1);
        assert_eq!(n.wait(&t, |_| panic!("must not park")), WaitOutcome::Ready(0b0101));
        assert_eq!(n.state(), NotifyState::Idle);
        assert_eq!(n.data(), 0);
    }

    #[test]
    fn test_wait_parks_then_signal_hands_off_fresh_data() {
        let n = notify();
        let t = thread(7);
        let mut parked = false;

        assert_eq!(n.wait(&t, |_| parked = true), WaitOutcome::Parked);
        assert!(parked);
        assert_eq!(n.state(), NotifyState::Waiting);
        assert_eq!(n.waiter_ids(), vec![7]);

        match n.signal(0x40) {
            SignalOutcome::Released { waiter, data } => {
                assert_eq!(waiter.id(), 7);
                assert_eq!(data, 0x40);
            }
            other => panic!("expected release, got {:?}", other),
        }
        assert_eq!(n.state(), NotifyState::Idle);
        assert!(n.waiter_ids().is_empty());
    }

    #[test]
    fn test_one_waiter_released_per_signal_in_fifo_order() {
        let n = notify();
        let (a, b) = (thread(1), thread(2));
        n.wait(&a, |_| {});
        n.wait(&b, |_| {});

        let first = match n.signal(1) {
            SignalOutcome::Released { waiter, .. } => waiter.id(),
            other => panic!("expected release, got {:?}", other),
        };
        assert_eq!(first, 1);
        assert_eq!(n.state(), NotifyState::Waiting);

        let second = match n.signal(2) {
            SignalOutcome::Released { waiter, data } => (waiter.id(), data),
            other => panic!("expected release, got {:?}", other),
        };
        assert_eq!(second, (2, 2));
        assert_eq!(n.state(), NotifyState::Idle);

        // Nobody left: the next signal accumulates
        assert!(matches!(n.signal(8), SignalOutcome::Accumulated(8)));
    }

    #[test]
    fn test_park_runs_under_lock_with_thread() {
        let n = Notify::new(NotifyHandle(3), ThreadState::RecvBlocked);
        let t = thread(4);
        n.wait(&t, |thread| thread.store_state(ThreadState::RecvBlocked));
        assert_eq!(t.state(), ThreadState::RecvBlocked);
        assert_eq!(n.block_state(), ThreadState::RecvBlocked);
    }

    #[test]
    fn test_drain_waiters() {
        let n = notify();
        n.wait(&thread(1), |_| {});
        n.wait(&thread(2), |_| {});
        let drained: Vec<ThreadId> = n.drain_waiters().iter().map(|t| t.id()).collect();
        assert_eq!(drained, vec![1, 2]);
        assert_eq!(n.state(), NotifyState::Idle);
    }
}
