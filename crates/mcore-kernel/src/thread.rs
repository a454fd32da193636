//! Threads, processes and the run gate.
//!
//! A [`Thread`] is backed 1:1 by a host thread. The host thread only executes
//! user code while the thread's *run gate* reads `Running`:
//!
//! ```text
//!            resume (core)                 post syscall (thread)
//! Suspended ─────────────────▶ Running ─────────────────────────▶ SyscallPending
//!     ▲                           │                                     │
//!     └──── pause (core, CAS) ────┘                                     │
//!     └──────────────────── call finished (core) ───────────────────────┘
//!
//! any ──▶ Released   (exit or shutdown; the host thread runs to completion)
//! ```
//!
//! Only the owning core's agent moves the gate out of `Running`/`SyscallPending`
//! and only the thread itself moves it from `Running` to `SyscallPending`, so
//! the two CASes decide who got there first.

use core::fmt;
use std::cell::RefCell;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use mcore_abi::SysStatus;
use mcore_hal::{park_current, Event, HostThread};
use spin::Mutex;

use crate::types::{CoreId, ProcessId, ThreadId, ThreadState, NO_CORE};

const GATE_SUSPENDED: u8 = 0;
const GATE_RUNNING: u8 = 1;
const GATE_SYSCALL: u8 = 2;
const GATE_RELEASED: u8 = 3;

/// A process: the owner of a group of threads.
#[derive(Debug)]
pub struct Process {
    pub id: ProcessId,
    pub name: String,
}

/// Private call slot of one thread.
///
/// Written by the thread before it posts a syscall and by the core (or a
/// notify signaller) when storing the result; the gate orders the two.
#[derive(Clone, Copy, Debug, Default)]
struct CallSlot {
    id: u32,
    args: [u64; 2],
    /// SysLog event of the request, 0 when audit is off
    request: u64,
    result: Option<(SysStatus, u64)>,
}

/// One schedulable unit.
pub struct Thread {
    id: ThreadId,
    name: String,
    process: Arc<Process>,
    idle: bool,
    quantum_ns: u64,
    state: AtomicU8,
    /// Core whose run list holds the thread, or NO_CORE
    owner: AtomicU32,
    /// Core the thread last ran on; notify releases go back there
    last_core: AtomicU32,
    gate: AtomicU8,
    run_time_ns: AtomicU64,
    call: Mutex<CallSlot>,
    host: OnceLock<HostThread>,
    exited: Event,
}

impl Thread {
    pub(crate) fn new(
        id: ThreadId,
        name: &str,
        process: Arc<Process>,
        quantum_ns: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            name: String::from(name),
            process,
            idle: false,
            quantum_ns,
            state: AtomicU8::new(ThreadState::Inception as u8),
            owner: AtomicU32::new(NO_CORE),
            last_core: AtomicU32::new(NO_CORE),
            gate: AtomicU8::new(GATE_SUSPENDED),
            run_time_ns: AtomicU64::new(0),
            call: Mutex::new(CallSlot::default()),
            host: OnceLock::new(),
            exited: Event::new(),
        })
    }

    /// The permanent idle thread of `core`. It has no host thread and no quantum.
    pub(crate) fn new_idle(id: ThreadId, core: CoreId, process: Arc<Process>) -> Arc<Self> {
        Arc::new(Self {
            id,
            name: format!("idle-{}", core),
            process,
            idle: true,
            quantum_ns: 0,
            state: AtomicU8::new(ThreadState::OnRunList as u8),
            owner: AtomicU32::new(core),
            last_core: AtomicU32::new(core),
            gate: AtomicU8::new(GATE_SUSPENDED),
            run_time_ns: AtomicU64::new(0),
            call: Mutex::new(CallSlot::default()),
            host: OnceLock::new(),
            exited: Event::new(),
        })
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn process(&self) -> &Arc<Process> {
        &self.process
    }

    pub fn is_idle(&self) -> bool {
        self.idle
    }

    /// Time slice granted each time the thread becomes current
    pub fn quantum_nanos(&self) -> u64 {
        self.quantum_ns
    }

    pub fn state(&self) -> ThreadState {
        // Only valid discriminants are ever stored.
        ThreadState::from_u8(self.state.load(Ordering::SeqCst)).unwrap_or(ThreadState::Dead)
    }

    pub(crate) fn store_state(&self, state: ThreadState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Core whose run list holds the thread
    pub fn owner(&self) -> Option<CoreId> {
        match self.owner.load(Ordering::SeqCst) {
            NO_CORE => None,
            core => Some(core),
        }
    }

    pub(crate) fn set_owner(&self, core: Option<CoreId>) {
        self.owner.store(core.unwrap_or(NO_CORE), Ordering::SeqCst);
        if let Some(core) = core {
            self.last_core.store(core, Ordering::SeqCst);
        }
    }

    /// Core the thread was last owned by
    pub fn last_core(&self) -> Option<CoreId> {
        match self.last_core.load(Ordering::SeqCst) {
            NO_CORE => None,
            core => Some(core),
        }
    }

    /// Accumulated time the thread held its core
    pub fn run_time_nanos(&self) -> u64 {
        self.run_time_ns.load(Ordering::Relaxed)
    }

    pub(crate) fn account(&self, nanos: u64) {
        self.run_time_ns.fetch_add(nanos, Ordering::Relaxed);
    }

    pub(crate) fn host(&self) -> Option<&HostThread> {
        self.host.get()
    }

    pub(crate) fn attach_host(&self, host: HostThread) {
        let _ = self.host.set(host);
    }

    /// Wait until the thread is dead. Returns `false` on timeout.
    pub fn wait_exit(&self, timeout: Duration) -> bool {
        self.exited.wait(timeout)
    }

    // ========================================================================
    // Call slot
    // ========================================================================

    /// Syscall id and arguments staged in the call slot
    pub fn pending_call(&self) -> (u32, [u64; 2]) {
        let slot = self.call.lock();
        (slot.id, slot.args)
    }

    pub(crate) fn stage_call(&self, id: u32, args: [u64; 2]) {
        let mut slot = self.call.lock();
        slot.id = id;
        slot.args = args;
        slot.request = 0;
        slot.result = None;
    }

    pub(crate) fn set_request(&self, event: u64) {
        self.call.lock().request = event;
    }

    pub(crate) fn request(&self) -> u64 {
        self.call.lock().request
    }

    pub(crate) fn set_result(&self, status: SysStatus, value: u64) {
        self.call.lock().result = Some((status, value));
    }

    pub(crate) fn take_result(&self) -> Option<(SysStatus, u64)> {
        self.call.lock().result.take()
    }

    /// Stage a syscall and mark it pending without a running host thread.
    ///
    /// Lets run-engine tests drive syscalls on threads that have no host
    /// thread behind them.
    #[cfg(test)]
    pub(crate) fn post_call(&self, id: u32, args: [u64; 2]) {
        self.stage_call(id, args);
        self.gate.store(GATE_SYSCALL, Ordering::SeqCst);
    }

    // ========================================================================
    // Run gate: core side
    // ========================================================================

    /// True while the host thread may execute user code
    pub fn is_running(&self) -> bool {
        self.gate.load(Ordering::SeqCst) == GATE_RUNNING
    }

    /// True once a syscall has been posted and not yet finished
    pub fn syscall_pending(&self) -> bool {
        self.gate.load(Ordering::SeqCst) == GATE_SYSCALL
    }

    /// True once the host thread has been let go for good
    pub fn is_released(&self) -> bool {
        self.gate.load(Ordering::SeqCst) == GATE_RELEASED
    }

    /// Preempt: Running -> Suspended. Fails if the thread posted a syscall first.
    pub(crate) fn pause(&self) -> bool {
        self.gate
            .compare_exchange(
                GATE_RUNNING,
                GATE_SUSPENDED,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Suspended -> Running, then wake the host thread.
    pub(crate) fn resume(&self) {
        if self
            .gate
            .compare_exchange(
                GATE_SUSPENDED,
                GATE_RUNNING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            if let Some(host) = self.host.get() {
                host.unpark();
            }
        }
    }

    /// The core is done with the posted syscall: SyscallPending -> Suspended.
    ///
    /// The result (if any) must already be stored.
    pub(crate) fn finish_call(&self) {
        let _ = self.gate.compare_exchange(
            GATE_SYSCALL,
            GATE_SUSPENDED,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Let the host thread go for good (exit or shutdown).
    ///
    /// A call still outstanding completes with `fallback`.
    pub(crate) fn release(&self, fallback: SysStatus) {
        {
            let mut slot = self.call.lock();
            if slot.result.is_none() {
                slot.result = Some((fallback, 0));
            }
        }
        self.gate.store(GATE_RELEASED, Ordering::SeqCst);
        if let Some(host) = self.host.get() {
            host.unpark();
        }
        self.exited.set();
    }

    // ========================================================================
    // Run gate: thread side
    // ========================================================================

    /// Park the calling host thread until the gate opens.
    ///
    /// Returns `false` if the thread was released instead.
    pub(crate) fn wait_until_running(&self) -> bool {
        loop {
            match self.gate.load(Ordering::SeqCst) {
                GATE_RUNNING => return true,
                GATE_RELEASED => return false,
                _ => park_current(),
            }
        }
    }

    /// Running -> SyscallPending. Fails if the core paused the thread first.
    pub(crate) fn try_post(&self) -> bool {
        self.gate
            .compare_exchange(GATE_RUNNING, GATE_SYSCALL, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("owner", &self.owner())
            .finish()
    }
}

// ============================================================================
// Current thread
// ============================================================================

thread_local! {
    static CURRENT: RefCell<Option<Arc<Thread>>> = const { RefCell::new(None) };
}

/// The kernel thread backed by the calling host thread, if any.
pub fn current_thread() -> Option<Arc<Thread>> {
    CURRENT.with(|current| current.borrow().clone())
}

pub(crate) fn set_current_thread(thread: Option<Arc<Thread>>) {
    CURRENT.with(|current| *current.borrow_mut() = thread);
}
