//! Delta-sorted sleep timer queue.
//!
//! Each entry stores its remaining ticks *relative to the entry before it*,
//! so only the head needs decrementing on a tick:
//!
//! ```text
//! sleeps inserted: 100, 50, 150
//! queue:  [50] -> [50] -> [50]
//!          B       A       C
//! ```
//!
//! The queue owns one periodic host timer while it is non-empty. The timer
//! callback only raises an interrupt on some core; that core's interrupt
//! handler then calls [`TimerQueue::tick`] with the ticks it collected.
//!
//! Every arming gets a fresh epoch and the callback reports it with each
//! interrupt. Ticks from an earlier arming that a core has not consumed yet
//! carry a stale epoch and are dropped by `tick`, so they never shorten a
//! sleep queued after the timer was re-armed.

use std::collections::VecDeque;
use std::sync::Arc;

use mcore_hal::{HalError, TimerId, HAL};
use spin::Mutex;

use crate::thread::Thread;
use crate::types::ThreadId;

/// A delta list of items.
#[derive(Debug)]
pub struct DeltaQueue<T> {
    entries: VecDeque<(u64, T)>,
}

impl<T> DeltaQueue<T> {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ticks until the head expires
    pub fn head_delta(&self) -> Option<u64> {
        self.entries.front().map(|(delta, _)| *delta)
    }

    /// Insert `item` to expire `ticks` from now.
    ///
    /// Walks the list consuming the deltas of earlier entries; the entry the
    /// new item is placed before gives up the new item's remaining delta.
    /// Items with equal expiry keep insertion order.
    pub fn insert(&mut self, ticks: u64, item: T) {
        let mut remaining = ticks;
        let mut position = self.entries.len();

        for (index, (delta, _)) in self.entries.iter_mut().enumerate() {
            if remaining < *delta {
                *delta -= remaining;
                position = index;
                break;
            }
            remaining -= *delta;
        }

        self.entries.insert(position, (remaining, item));
    }

    /// Advance time by `ticks` and pop every item that expired, in expiry
    /// order.
    pub fn advance(&mut self, ticks: u64) -> Vec<T> {
        let mut remaining = ticks;
        let mut expired = Vec::new();

        while let Some((delta, _)) = self.entries.front_mut() {
            if *delta > remaining {
                *delta -= remaining;
                break;
            }
            remaining -= *delta;
            if let Some((_, item)) = self.entries.pop_front() {
                expired.push(item);
            }
        }

        expired
    }

    /// Items with their absolute remaining ticks, head first
    pub fn iter_absolute(&self) -> impl Iterator<Item = (u64, &T)> {
        self.entries.iter().scan(0u64, |acc, (delta, item)| {
            *acc += *delta;
            Some((*acc, item))
        })
    }

    /// Remove and return every item.
    pub fn drain(&mut self) -> Vec<T> {
        self.entries.drain(..).map(|(_, item)| item).collect()
    }
}

impl<T> Default for DeltaQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Interrupt callback; receives the epoch of the arming that raised it.
pub type TimerIrq = Arc<dyn Fn(u64) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum HostTimer {
    Disarmed,
    /// An insert is arming the host timer outside the lock
    Arming,
    Armed(TimerId),
}

struct TimerInner {
    queue: DeltaQueue<Arc<Thread>>,
    timer: HostTimer,
    epoch: u64,
}

impl TimerInner {
    /// Forget the host timer, returning its id if one must be disarmed.
    fn take_timer(&mut self) -> Option<TimerId> {
        match core::mem::replace(&mut self.timer, HostTimer::Disarmed) {
            HostTimer::Armed(id) => Some(id),
            HostTimer::Arming | HostTimer::Disarmed => None,
        }
    }
}

/// The global sleep queue of sleeping threads.
///
/// HAL timer calls are never made while the queue lock is held.
pub struct TimerQueue {
    hal: Arc<dyn HAL>,
    period_ms: u64,
    /// Raised on every host timer period
    irq: TimerIrq,
    inner: Mutex<TimerInner>,
}

impl TimerQueue {
    pub fn new(hal: Arc<dyn HAL>, period_ms: u64, irq: TimerIrq) -> Self {
        Self {
            hal,
            period_ms,
            irq,
            inner: Mutex::new(TimerInner {
                queue: DeltaQueue::new(),
                timer: HostTimer::Disarmed,
                epoch: 0,
            }),
        }
    }

    /// Queue `thread` to expire after `ticks` timer periods.
    ///
    /// Arms the host timer under a new epoch if none is armed.
    pub fn insert(&self, thread: Arc<Thread>, ticks: u64) -> Result<(), HalError> {
        let epoch = {
            let mut inner = self.inner.lock();
            inner.queue.insert(ticks, thread);
            if inner.timer != HostTimer::Disarmed {
                return Ok(());
            }
            inner.timer = HostTimer::Arming;
            inner.epoch += 1;
            inner.epoch
        };

        let irq = self.irq.clone();
        let armed = self
            .hal
            .arm_periodic_timer(self.period_ms, Box::new(move || irq(epoch)));

        let mut inner = self.inner.lock();
        let current = inner.epoch == epoch && inner.timer == HostTimer::Arming;
        match armed {
            Ok(id) if current => {
                inner.timer = HostTimer::Armed(id);
                log::trace!("sleep timer armed ({} ms, epoch {})", self.period_ms, epoch);
                Ok(())
            }
            Ok(id) => {
                // Emptied or re-armed while this insert was arming
                drop(inner);
                self.hal.disarm_timer(id);
                Ok(())
            }
            Err(e) => {
                if current {
                    inner.timer = HostTimer::Disarmed;
                }
                Err(e)
            }
        }
    }

    /// Consume `ticks` timer periods raised under `epoch` and return the
    /// threads that expired.
    ///
    /// Ticks from any epoch but the current one are stale and ignored.
    /// Disarms the host timer once the queue is empty.
    pub fn tick(&self, epoch: u64, ticks: u64) -> Vec<Arc<Thread>> {
        let (expired, disarm) = {
            let mut inner = self.inner.lock();
            if epoch != inner.epoch {
                log::trace!("dropping {} stale ticks of epoch {}", ticks, epoch);
                return Vec::new();
            }
            let expired = inner.queue.advance(ticks);
            let disarm = if inner.queue.is_empty() {
                inner.take_timer()
            } else {
                None
            };
            (expired, disarm)
        };

        if let Some(id) = disarm {
            self.hal.disarm_timer(id);
            log::trace!("sleep timer disarmed");
        }
        expired
    }

    /// Epoch of the most recent arming
    pub fn epoch(&self) -> u64 {
        self.inner.lock().epoch
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }

    /// True while a host timer is registered or being registered
    pub fn is_armed(&self) -> bool {
        self.inner.lock().timer != HostTimer::Disarmed
    }

    /// Sleeping threads in expiry order
    pub fn thread_ids(&self) -> Vec<ThreadId> {
        self.inner
            .lock()
            .queue
            .iter_absolute()
            .map(|(_, thread)| thread.id())
            .collect()
    }

    /// Remove every sleeper and disarm the timer (shutdown).
    pub fn drain(&self) -> Vec<Arc<Thread>> {
        let (drained, disarm) = {
            let mut inner = self.inner.lock();
            (inner.queue.drain(), inner.take_timer())
        };
        if let Some(id) = disarm {
            self.hal.disarm_timer(id);
        }
        drained
    }
}
