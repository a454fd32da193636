//! The per-core run engine.
//!
//! Each simulated core is a single-writer actor: its run list is a plain
//! `VecDeque` owned by the agent thread and never locked. Everything other
//! cores can touch lives in [`CoreShared`] (inboxes, doorbell, tick counter,
//! published statistics).
//!
//! One agent iteration ([`CpuCore::step`]) handles, in order:
//!
//! 1. ICIs (including migrated threads)
//! 2. Timer interrupts
//! 3. A syscall posted by the current thread
//! 4. Quantum expiry
//! 5. The idle reschedule check
//!
//! and then resumes whatever thread is at the head of the run list.

mod handlers;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mcore_abi::ici::{
    ICI_HALT, ICI_MIGRATED_THREAD, ICI_RESCHEDULE, ICI_RESUME_THREAD, ICI_SUSPEND_THREAD,
};
use mcore_abi::SysStatus;
use mcore_hal::EventSet;
use mcore_primitives::Inbox;
use spin::Mutex;

use crate::ici::IciMessage;
use crate::kernel::{idle_thread_id, KernelShared};
use crate::thread::Thread;
use crate::types::{CoreId, CoreStats, ThreadId, ThreadState};

/// Doorbell bit: an ICI was queued
pub const EVENT_ICI: u32 = 1 << 0;
/// Doorbell bit: a timer interrupt was raised
pub const EVENT_IRQ: u32 = 1 << 1;
/// Doorbell bit: the current thread posted a syscall
pub const EVENT_SYSCALL: u32 = 1 << 2;

const ALL_EVENTS: u32 = EVENT_ICI | EVENT_IRQ | EVENT_SYSCALL;

/// Result of one agent iteration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoreStatus {
    Running,
    /// A halt ICI was handled; the agent must evacuate and stop
    Halted,
}

#[derive(Debug, Default)]
pub(crate) struct CoreCounters {
    pub context_switches: AtomicU64,
    pub icis_handled: AtomicU64,
    pub migrations_in: AtomicU64,
    pub migrations_out: AtomicU64,
    pub syscalls: AtomicU64,
    pub ticks: AtomicU64,
    pub preemptions: AtomicU64,
}

/// Timer interrupts raised on a core and not yet consumed, tagged with the
/// timer epoch that raised them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct PendingTicks {
    pub(crate) epoch: u64,
    pub(crate) count: u64,
}

/// The part of a core other cores and the front end may touch.
pub(crate) struct CoreShared {
    pub(crate) index: CoreId,
    pub(crate) ici: Inbox<IciMessage>,
    pub(crate) migrations: Inbox<Arc<Thread>>,
    pub(crate) doorbell: EventSet,
    pending_ticks: Mutex<PendingTicks>,
    pub(crate) counters: CoreCounters,
    /// Non-idle threads on the run list as of the last step
    load: AtomicU32,
    /// Run list as of the last step, head first
    run_list: Mutex<Vec<ThreadId>>,
    halted: AtomicBool,
}

impl CoreShared {
    pub(crate) fn new(index: CoreId, capacity: usize) -> Self {
        Self {
            index,
            ici: Inbox::with_capacity(capacity),
            migrations: Inbox::with_capacity(capacity),
            doorbell: EventSet::new(),
            pending_ticks: Mutex::new(PendingTicks::default()),
            counters: CoreCounters::default(),
            load: AtomicU32::new(0),
            run_list: Mutex::new(Vec::new()),
            halted: AtomicBool::new(false),
        }
    }

    pub(crate) fn publish(&self, run_list: &[ThreadId], load: u32) {
        *self.run_list.lock() = run_list.to_vec();
        self.load.store(load, Ordering::Relaxed);
    }

    /// Record one timer interrupt of `epoch`.
    ///
    /// A newer epoch replaces whatever was pending; ticks of an older one
    /// are dropped.
    pub(crate) fn raise_tick(&self, epoch: u64) {
        let mut pending = self.pending_ticks.lock();
        if epoch > pending.epoch {
            *pending = PendingTicks { epoch, count: 1 };
        } else if epoch == pending.epoch {
            pending.count += 1;
        }
    }

    pub(crate) fn take_ticks(&self) -> PendingTicks {
        let mut pending = self.pending_ticks.lock();
        let taken = *pending;
        pending.count = 0;
        taken
    }

    pub(crate) fn pending_ticks(&self) -> u64 {
        self.pending_ticks.lock().count
    }

    pub(crate) fn load(&self) -> u32 {
        self.load.load(Ordering::Relaxed)
    }

    pub(crate) fn published_run_list(&self) -> Vec<ThreadId> {
        self.run_list.lock().clone()
    }

    pub(crate) fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    pub(crate) fn snapshot(&self) -> CoreStats {
        let c = &self.counters;
        CoreStats {
            context_switches: c.context_switches.load(Ordering::Relaxed),
            icis_handled: c.icis_handled.load(Ordering::Relaxed),
            migrations_in: c.migrations_in.load(Ordering::Relaxed),
            migrations_out: c.migrations_out.load(Ordering::Relaxed),
            syscalls: c.syscalls.load(Ordering::Relaxed),
            ticks: c.ticks.load(Ordering::Relaxed),
            preemptions: c.preemptions.load(Ordering::Relaxed),
        }
    }
}

/// One simulated core: the execution agent's private state.
pub(crate) struct CpuCore {
    index: CoreId,
    kernel: Arc<KernelShared>,
    shared: Arc<CoreShared>,
    idle: Arc<Thread>,
    /// Head is the current thread
    run_list: VecDeque<Arc<Thread>>,
    /// Administratively suspended threads owned by this core
    suspended: Vec<Arc<Thread>>,
    current: ThreadId,
    /// Quantum deadline of the current thread; `None` while idle
    deadline: Option<u64>,
    /// When the current thread was last resumed
    resumed_at: Option<u64>,
}

impl CpuCore {
    pub(crate) fn new(kernel: Arc<KernelShared>, index: CoreId) -> Self {
        let shared = match kernel.core(index) {
            Some(shared) => shared.clone(),
            None => kernel.fatal(&format!("core {} does not exist", index)),
        };
        let idle = Thread::new_idle(idle_thread_id(index), index, kernel.kernel_process.clone());

        let mut run_list = VecDeque::new();
        run_list.push_back(idle.clone());

        let core = Self {
            index,
            kernel,
            shared,
            current: idle.id(),
            idle,
            run_list,
            suspended: Vec::new(),
            deadline: None,
            resumed_at: None,
        };
        core.publish();
        core
    }

    pub(crate) fn index(&self) -> CoreId {
        self.index
    }

    /// The current thread (run-list head)
    pub(crate) fn current(&self) -> &Arc<Thread> {
        match self.run_list.front() {
            Some(thread) => thread,
            None => self
                .kernel
                .fatal(&format!("core {}: run list lost its idle thread", self.index)),
        }
    }

    #[cfg(test)]
    pub(crate) fn idle(&self) -> &Arc<Thread> {
        &self.idle
    }

    pub(crate) fn run_list_ids(&self) -> Vec<ThreadId> {
        self.run_list.iter().map(|t| t.id()).collect()
    }

    #[cfg(test)]
    pub(crate) fn deadline(&self) -> Option<u64> {
        self.deadline
    }

    // ========================================================================
    // Agent loop
    // ========================================================================

    /// Body of the core's execution agent.
    pub(crate) fn run(mut self) {
        log::debug!("core {} agent started", self.index);
        self.resume_current();
        loop {
            let fired = self
                .shared
                .doorbell
                .wait_any(ALL_EVENTS, self.wait_timeout());
            if self.step(fired) == CoreStatus::Halted {
                break;
            }
        }
        self.evacuate();
        log::debug!("core {} agent stopped", self.index);
    }

    /// Time until the current quantum expires; `None` while idle.
    fn wait_timeout(&self) -> Option<Duration> {
        let now = self.kernel.hal.now_nanos();
        self.deadline
            .map(|deadline| Duration::from_nanos(deadline.saturating_sub(now)))
    }

    /// One agent iteration. `fired` is the doorbell bits that woke the
    /// agent; inboxes and counters are checked regardless.
    pub(crate) fn step(&mut self, fired: u32) -> CoreStatus {
        self.pause_current();

        if fired & EVENT_ICI != 0 || !self.shared.ici.is_empty() {
            if self.handle_icis() == CoreStatus::Halted {
                self.shared.halted.store(true, Ordering::SeqCst);
                return CoreStatus::Halted;
            }
            self.reschedule();
        }

        self.handle_interrupt();

        if self.current().syscall_pending() {
            self.handle_syscall();
            self.reschedule();
        }

        self.handle_quantum_expiry();
        self.reschedule();

        self.publish();
        #[cfg(debug_assertions)]
        self.assert_invariants();

        self.resume_current();
        CoreStatus::Running
    }

    /// Release every thread this core still holds (halt path).
    pub(crate) fn evacuate(&mut self) {
        let mut stranded: Vec<Arc<Thread>> =
            self.run_list.drain(..).filter(|t| !t.is_idle()).collect();
        stranded.append(&mut self.suspended);
        stranded.extend(self.shared.migrations.drain());

        for thread in stranded {
            log::debug!("core {}: releasing thread {} on halt", self.index, thread.id());
            self.kernel.force_dead(&thread);
            thread.release(SysStatus::Shutdown);
        }

        self.run_list.push_back(self.idle.clone());
        self.current = self.idle.id();
        self.deadline = None;
        self.resumed_at = None;
        self.publish();
    }

    // ========================================================================
    // Current thread
    // ========================================================================

    fn pause_current(&mut self) {
        let head = self.current().clone();
        if head.is_idle() {
            return;
        }
        head.pause();
        if let Some(at) = self.resumed_at.take() {
            head.account(self.kernel.hal.now_nanos().saturating_sub(at));
        }
    }

    fn resume_current(&mut self) {
        let head = self.current().clone();
        if head.is_idle() {
            return;
        }
        head.resume();
        if self.resumed_at.is_none() {
            self.resumed_at = Some(self.kernel.hal.now_nanos());
        }
    }

    /// Put a ready thread ahead of idle, then make the head current.
    fn reschedule(&mut self) {
        if self.run_list.len() > 1 && self.current().is_idle() {
            if let Some(idle) = self.run_list.pop_front() {
                self.run_list.push_back(idle);
            }
        }
        self.set_new_current();
    }

    /// Account a context switch if the head changed and start its quantum.
    fn set_new_current(&mut self) {
        let head = self.current().clone();
        if head.id() == self.current {
            return;
        }
        self.current = head.id();
        self.deadline = if head.is_idle() {
            None
        } else {
            Some(self.kernel.hal.now_nanos() + head.quantum_nanos())
        };
        self.shared
            .counters
            .context_switches
            .fetch_add(1, Ordering::Relaxed);
        log::trace!("core {}: switch to thread {}", self.index, head.id());
    }

    fn handle_quantum_expiry(&mut self) {
        let Some(deadline) = self.deadline else {
            return;
        };
        let now = self.kernel.hal.now_nanos();
        if now < deadline {
            return;
        }

        let others_ready = self.run_list.iter().skip(1).any(|t| !t.is_idle());
        if others_ready {
            if let Some(expired) = self.run_list.pop_front() {
                log::trace!("core {}: quantum expired for thread {}", self.index, expired.id());
                self.run_list.push_back(expired);
            }
            self.shared
                .counters
                .preemptions
                .fetch_add(1, Ordering::Relaxed);
        } else {
            self.deadline = Some(now + self.current().quantum_nanos());
        }
    }

    // ========================================================================
    // Run-list intake
    // ========================================================================

    /// Append `thread` to this core's run list in OnRunList.
    fn accept(&mut self, thread: Arc<Thread>) {
        self.kernel
            .transition(&thread, ThreadState::OnRunList, Some(self.index));
        thread.set_owner(Some(self.index));
        if let Some(host) = thread.host() {
            self.kernel.hal.set_affinity(host, self.index as usize);
        }
        self.run_list.push_back(thread);
    }

    /// Make a thread released from a notify runnable again.
    ///
    /// It goes back to the core it last ran on: directly onto this run list
    /// when that is us, through a migration otherwise.
    pub(crate) fn wake(&mut self, thread: Arc<Thread>) {
        match thread.last_core() {
            Some(core) if core != self.index => {
                self.kernel
                    .transition(&thread, ThreadState::Migrating, Some(self.index));
                self.kernel.migrate(thread, core, Some(self.index));
            }
            _ => self.accept(thread),
        }
    }

    fn handle_icis(&mut self) -> CoreStatus {
        let mut status = CoreStatus::Running;

        for msg in self.shared.ici.drain() {
            self.shared
                .counters
                .icis_handled
                .fetch_add(1, Ordering::Relaxed);
            log::trace!("core {}: ICI {} from {:?}", self.index, msg.name(), msg.from);

            match msg.code {
                ICI_MIGRATED_THREAD => {
                    for thread in self.shared.migrations.drain() {
                        self.shared
                            .counters
                            .migrations_in
                            .fetch_add(1, Ordering::Relaxed);
                        self.accept(thread);
                    }
                }
                ICI_RESCHEDULE => {}
                ICI_HALT => status = CoreStatus::Halted,
                ICI_SUSPEND_THREAD => self.suspend_thread(msg.payload),
                ICI_RESUME_THREAD => self.resume_thread(msg.payload),
                code => log::debug!("core {}: unhandled ICI {:#x}", self.index, code),
            }
        }

        status
    }

    fn suspend_thread(&mut self, id: ThreadId) {
        let position = self
            .run_list
            .iter()
            .position(|t| t.id() == id && !t.is_idle());
        let Some(thread) = position.and_then(|p| self.run_list.remove(p)) else {
            log::debug!("core {}: suspend of thread {} not on run list", self.index, id);
            return;
        };
        self.kernel
            .transition(&thread, ThreadState::Suspended, Some(self.index));
        self.suspended.push(thread);
    }

    fn resume_thread(&mut self, id: ThreadId) {
        let Some(position) = self.suspended.iter().position(|t| t.id() == id) else {
            log::debug!("core {}: resume of thread {} not suspended here", self.index, id);
            return;
        };
        let thread = self.suspended.remove(position);
        self.accept(thread);
    }

    // ========================================================================
    // Timer interrupt
    // ========================================================================

    fn handle_interrupt(&mut self) {
        let pending = self.shared.take_ticks();
        if pending.count == 0 {
            return;
        }
        self.shared
            .counters
            .ticks
            .fetch_add(pending.count, Ordering::Relaxed);

        for thread in self.kernel.timers.tick(pending.epoch, pending.count) {
            self.kernel
                .transition(&thread, ThreadState::Migrating, Some(self.index));
            let target = self.kernel.pick_core();
            log::debug!("thread {} slept out, waking on core {}", thread.id(), target);
            if target == self.index {
                self.accept(thread);
            } else {
                self.kernel.migrate(thread, target, Some(self.index));
            }
        }
    }

    // ========================================================================
    // Publication
    // ========================================================================

    fn publish(&self) {
        let ids = self.run_list_ids();
        let load = self.run_list.iter().filter(|t| !t.is_idle()).count() as u32;
        self.shared.publish(&ids, load);
    }

    #[cfg(debug_assertions)]
    fn assert_invariants(&self) {
        let violations = crate::invariants::check_core(self.index, &self.run_list, self.current);
        if let Some(violation) = violations.first() {
            self.kernel.fatal(&format!(
                "invariant {} violated: {}",
                violation.invariant, violation.description
            ));
        }
    }
}
