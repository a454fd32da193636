//! A HAL with a manual clock and manually fired timers.
//!
//! Threads are still real host threads, but nothing time-dependent happens
//! unless the test advances the clock or fires the timers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use spin::Mutex;

use crate::thread::{spawn_agent_thread, spawn_host_thread};
use crate::{AgentHandle, HalError, HostThread, ThreadEntry, TimerCallback, TimerId, HAL};

/// Test HAL with deterministic time, entropy and timers.
pub struct TestHal {
    /// Simulated time in nanoseconds
    time: AtomicU64,
    /// Captured debug messages
    debug_log: Mutex<Vec<String>>,
    /// Random seed for deterministic testing
    random_seed: AtomicU64,
    next_timer: AtomicU64,
    /// Armed timers (id -> (period_ms, callback))
    timers: Mutex<BTreeMap<TimerId, (u64, Arc<TimerCallback>)>>,
    /// Total number of timers ever armed
    armed_total: AtomicU64,
}

impl TestHal {
    pub fn new() -> Self {
        Self::with_time(0)
    }

    /// Create a test HAL with a specific starting time
    pub fn with_time(nanos: u64) -> Self {
        Self {
            time: AtomicU64::new(nanos),
            debug_log: Mutex::new(Vec::new()),
            random_seed: AtomicU64::new(12345),
            next_timer: AtomicU64::new(1),
            timers: Mutex::new(BTreeMap::new()),
            armed_total: AtomicU64::new(0),
        }
    }

    /// Advance the simulated time by the given duration
    pub fn advance_time(&self, nanos: u64) {
        self.time.fetch_add(nanos, Ordering::SeqCst);
    }

    /// Set the simulated time to a specific value
    pub fn set_time(&self, nanos: u64) {
        self.time.store(nanos, Ordering::SeqCst);
    }

    /// Invoke every armed timer callback once, advancing the clock by the
    /// timer's period first. Returns the number of callbacks invoked.
    pub fn fire_timers(&self) -> usize {
        // Callbacks may disarm timers, so run them outside the lock.
        let armed: Vec<(u64, Arc<TimerCallback>)> = self
            .timers
            .lock()
            .values()
            .map(|(period, cb)| (*period, cb.clone()))
            .collect();

        for (period_ms, cb) in &armed {
            self.advance_time(period_ms * 1_000_000);
            cb();
        }
        armed.len()
    }

    /// Number of currently armed timers
    pub fn armed_timer_count(&self) -> usize {
        self.timers.lock().len()
    }

    /// Number of timers armed since creation
    pub fn armed_total(&self) -> u64 {
        self.armed_total.load(Ordering::SeqCst)
    }

    /// Get all captured debug messages
    pub fn get_debug_log(&self) -> Vec<String> {
        self.debug_log.lock().clone()
    }

    /// Check if a specific message was logged
    pub fn has_log_containing(&self, substr: &str) -> bool {
        self.debug_log.lock().iter().any(|msg| msg.contains(substr))
    }

    /// Set the random seed for deterministic testing
    pub fn set_random_seed(&self, seed: u64) {
        self.random_seed.store(seed, Ordering::SeqCst);
    }
}

impl Default for TestHal {
    fn default() -> Self {
        Self::new()
    }
}

impl HAL for TestHal {
    fn spawn_thread(&self, name: &str, entry: ThreadEntry) -> Result<HostThread, HalError> {
        spawn_host_thread(name, entry)
    }

    fn spawn_agent(&self, name: &str, entry: ThreadEntry) -> Result<AgentHandle, HalError> {
        spawn_agent_thread(name, entry)
    }

    fn now_nanos(&self) -> u64 {
        self.time.load(Ordering::SeqCst)
    }

    fn arm_periodic_timer(
        &self,
        period_ms: u64,
        tick: TimerCallback,
    ) -> Result<TimerId, HalError> {
        if period_ms == 0 {
            return Err(HalError::InvalidArgument);
        }
        let id = TimerId(self.next_timer.fetch_add(1, Ordering::SeqCst));
        self.timers.lock().insert(id, (period_ms, Arc::new(tick)));
        self.armed_total.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    fn disarm_timer(&self, id: TimerId) {
        self.timers.lock().remove(&id);
    }

    fn random_u32(&self) -> u32 {
        // Simple LCG for deterministic "random" values in tests
        let seed = self
            .random_seed
            .load(Ordering::SeqCst)
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1);
        self.random_seed.store(seed, Ordering::SeqCst);
        (seed >> 33) as u32
    }

    fn debug_write(&self, msg: &str) {
        self.debug_log.lock().push(String::from(msg));
    }
}
