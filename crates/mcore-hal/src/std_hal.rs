//! HAL backed by the host's standard library.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use spin::Mutex;

use crate::thread::{spawn_agent_thread, spawn_host_thread};
use crate::{AgentHandle, HalError, HostThread, ThreadEntry, TimerCallback, TimerId, HAL};

/// HAL for running the simulation on a real host.
///
/// Each armed timer gets its own sleeping host thread; disarming flips a flag
/// the timer thread checks before every callback.
pub struct StdHal {
    epoch: Instant,
    next_timer: AtomicU64,
    timers: Mutex<BTreeMap<TimerId, Arc<AtomicBool>>>,
    random_state: AtomicU64,
}

impl StdHal {
    pub fn new() -> Self {
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x5EED);
        Self {
            epoch: Instant::now(),
            next_timer: AtomicU64::new(1),
            timers: Mutex::new(BTreeMap::new()),
            random_state: AtomicU64::new(seed | 1),
        }
    }

    /// Number of currently armed timers
    pub fn armed_timer_count(&self) -> usize {
        self.timers.lock().len()
    }
}

impl Default for StdHal {
    fn default() -> Self {
        Self::new()
    }
}

impl HAL for StdHal {
    fn spawn_thread(&self, name: &str, entry: ThreadEntry) -> Result<HostThread, HalError> {
        spawn_host_thread(name, entry)
    }

    fn spawn_agent(&self, name: &str, entry: ThreadEntry) -> Result<AgentHandle, HalError> {
        spawn_agent_thread(name, entry)
    }

    fn now_nanos(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    fn arm_periodic_timer(
        &self,
        period_ms: u64,
        tick: TimerCallback,
    ) -> Result<TimerId, HalError> {
        if period_ms == 0 {
            return Err(HalError::InvalidArgument);
        }

        let id = TimerId(self.next_timer.fetch_add(1, Ordering::Relaxed));
        let armed = Arc::new(AtomicBool::new(true));
        let running = armed.clone();
        let period = Duration::from_millis(period_ms);

        thread::Builder::new()
            .name(format!("host-timer-{}", id.0))
            .spawn(move || {
                let mut next = Instant::now() + period;
                while running.load(Ordering::Acquire) {
                    let now = Instant::now();
                    if next > now {
                        thread::sleep(next - now);
                    }
                    if !running.load(Ordering::Acquire) {
                        break;
                    }
                    tick();
                    next += period;
                }
            })
            .map_err(|_| HalError::TimerUnavailable)?;

        self.timers.lock().insert(id, armed);
        Ok(id)
    }

    fn disarm_timer(&self, id: TimerId) {
        if let Some(armed) = self.timers.lock().remove(&id) {
            armed.store(false, Ordering::Release);
        }
    }

    fn random_u32(&self) -> u32 {
        // xorshift64*
        let mut x = self.random_state.load(Ordering::Relaxed);
        loop {
            let mut next = x;
            next ^= next >> 12;
            next ^= next << 25;
            next ^= next >> 27;
            match self.random_state.compare_exchange_weak(
                x,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return (next.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 32) as u32,
                Err(current) => x = current,
            }
        }
    }

    fn debug_write(&self, msg: &str) {
        let stderr = std::io::stderr();
        let mut out = stderr.lock();
        let _ = writeln!(out, "{}", msg);
    }
}
