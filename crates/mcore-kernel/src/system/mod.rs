//! System struct - the front end of a booted scheduler.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           SYSTEM                              │
//! │   boot / spawn / notify / ring / suspend / shutdown          │
//! │                              │                                │
//! │                              ▼                                │
//! │   ┌──────────────────── KernelShared ────────────────────┐    │
//! │   │ registries · TimerQueue · SysLog · TransitionLog     │    │
//! │   │ CoreShared[n]: ICI inbox · migration inbox · doorbell │    │
//! │   └──────────────────────────────────────────────────────┘    │
//! │        ▲               ▲                        ▲             │
//! │   core-0 agent    core-1 agent     ...     core-n agent       │
//! │   (CpuCore)       (CpuCore)                (CpuCore)          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The front end never touches a run list. Placement, suspension and halting
//! are all requested through a core's inboxes.

mod lifecycle;
mod metrics;

use std::sync::Arc;
use std::time::Duration;

use mcore_abi::ici::{ICI_RESUME_THREAD, ICI_SUSPEND_THREAD, ICI_USER_BASE};
use mcore_hal::{AgentHandle, HAL};
use mcore_primitives::RingBuffer;
use mcore_trace::{SysEvent, Transition};
use spin::Mutex;

use crate::config::SystemConfig;
use crate::error::KernelError;
use crate::ici::IciMessage;
use crate::invariants::{self, InvariantViolation, Placement};
use crate::ipc_ring::IpcRing;
use crate::kernel::KernelShared;
use crate::notify::{Notify, SignalOutcome};
use crate::syscall::{Signaller, UserContext};
use crate::thread::Thread;
use crate::types::{CoreId, CoreStats, NotifyHandle, ProcessId, ThreadId, ThreadState};

pub use metrics::SystemMetrics;

/// A booted multi-core scheduler.
pub struct System {
    kernel: Arc<KernelShared>,
    agents: Mutex<Vec<AgentHandle>>,
}

impl System {
    /// Validate `config`, create the cores and start one execution agent per
    /// core on `hal`.
    pub fn boot(config: SystemConfig, hal: Arc<dyn HAL>) -> Result<Self, KernelError> {
        if let Err(e) = config.validate() {
            log::error!("rejecting configuration: {}", e);
            return Err(KernelError::InvalidConfig);
        }
        let kernel = KernelShared::new(config, hal);
        let agents = lifecycle::start_agents(&kernel);
        log::info!(
            "mcore booted: {} cores, {} ms quantum",
            kernel.config.cores,
            kernel.config.quantum_ms
        );
        Ok(Self {
            kernel,
            agents: Mutex::new(agents),
        })
    }

    pub fn config(&self) -> &SystemConfig {
        &self.kernel.config
    }

    pub fn hal(&self) -> &Arc<dyn HAL> {
        &self.kernel.hal
    }

    pub fn core_count(&self) -> u32 {
        self.kernel.config.cores
    }

    /// Nanoseconds since boot
    pub fn uptime_nanos(&self) -> u64 {
        self.kernel.now()
    }

    pub fn is_shut_down(&self) -> bool {
        self.kernel.is_shutting_down()
    }

    // ========================================================================
    // Processes and threads
    // ========================================================================

    pub fn register_process(&self, name: &str) -> ProcessId {
        self.kernel.register_process(name)
    }

    /// Spawn a thread of `process` running `body`, placed by the wake policy.
    ///
    /// The thread exits when `body` returns.
    pub fn spawn_thread<F>(&self, process: ProcessId, name: &str, body: F) -> Result<ThreadId, KernelError>
    where
        F: FnOnce(&UserContext) + Send + 'static,
    {
        let core = self.kernel.pick_core();
        lifecycle::spawn(&self.kernel, process, name, core, Box::new(body))
    }

    /// Spawn a thread on a specific core.
    pub fn spawn_thread_on<F>(
        &self,
        process: ProcessId,
        name: &str,
        core: CoreId,
        body: F,
    ) -> Result<ThreadId, KernelError>
    where
        F: FnOnce(&UserContext) + Send + 'static,
    {
        if core >= self.core_count() {
            return Err(KernelError::InvalidCore);
        }
        lifecycle::spawn(&self.kernel, process, name, core, Box::new(body))
    }

    /// A live thread. Dead threads are dropped from the registry.
    pub fn thread(&self, id: ThreadId) -> Option<Arc<Thread>> {
        self.kernel.thread(id)
    }

    /// State of a thread; `Dead` for spawned threads that have been retired.
    pub fn thread_state(&self, id: ThreadId) -> Option<ThreadState> {
        match self.kernel.thread(id) {
            Some(thread) => Some(thread.state()),
            None if self.kernel.is_retired(id) => Some(ThreadState::Dead),
            None => None,
        }
    }

    /// Block until the thread is dead. Returns `Ok(false)` on timeout.
    pub fn wait_for_thread(&self, id: ThreadId, timeout: Duration) -> Result<bool, KernelError> {
        match self.kernel.thread(id) {
            Some(thread) => Ok(thread.wait_exit(timeout)),
            None if self.kernel.is_retired(id) => Ok(true),
            None => Err(KernelError::ThreadNotFound),
        }
    }

    /// Take a runnable thread off its core's run list (OnRunList -> Suspended).
    ///
    /// Delivered asynchronously by ICI to the owning core.
    pub fn suspend_thread(&self, id: ThreadId) -> Result<(), KernelError> {
        let thread = self.kernel.thread(id).ok_or(KernelError::ThreadNotFound)?;
        if thread.state() != ThreadState::OnRunList {
            return Err(KernelError::InvalidState);
        }
        let core = thread.owner().ok_or(KernelError::InvalidState)?;
        self.send(core, IciMessage::new(ICI_SUSPEND_THREAD, id, None))
    }

    /// Return a suspended thread to its core's run list.
    pub fn resume_thread(&self, id: ThreadId) -> Result<(), KernelError> {
        let thread = self.kernel.thread(id).ok_or(KernelError::ThreadNotFound)?;
        if thread.state() != ThreadState::Suspended {
            return Err(KernelError::InvalidState);
        }
        let core = thread.owner().ok_or(KernelError::InvalidState)?;
        self.send(core, IciMessage::new(ICI_RESUME_THREAD, id, None))
    }

    /// Send a user-defined ICI (`code >= ICI_USER_BASE`) to a core.
    pub fn send_ici(&self, core: CoreId, code: u32, payload: u64) -> Result<(), KernelError> {
        if code < ICI_USER_BASE {
            return Err(KernelError::InvalidState);
        }
        self.send(core, IciMessage::new(code, payload, None))
    }

    fn send(&self, core: CoreId, msg: IciMessage) -> Result<(), KernelError> {
        if self.kernel.is_shutting_down() {
            return Err(KernelError::ShutDown);
        }
        if core >= self.core_count() {
            return Err(KernelError::InvalidCore);
        }
        self.kernel.send_ici(core, msg);
        Ok(())
    }

    // ========================================================================
    // Notify and rings
    // ========================================================================

    /// Create a notify whose waiters block in WaitingOnNotify.
    pub fn create_notify(&self) -> NotifyHandle {
        self.kernel
            .create_notify(ThreadState::WaitingOnNotify)
            .handle()
    }

    pub fn notify(&self, handle: NotifyHandle) -> Option<Arc<Notify>> {
        self.kernel.notify(handle)
    }

    /// Signal a notify from kernel context (any host thread).
    ///
    /// A released waiter is migrated back to the core it last ran on.
    pub fn signal_notify(&self, handle: NotifyHandle, data: u64) -> Result<u64, KernelError> {
        if self.kernel.is_shutting_down() {
            return Err(KernelError::ShutDown);
        }
        let notify = self.kernel.notify(handle).ok_or(KernelError::InvalidHandle)?;

        match notify.signal(data) {
            SignalOutcome::Accumulated(combined) => Ok(combined),
            SignalOutcome::Released { waiter, data } => {
                let core = waiter.last_core().unwrap_or(0);
                self.kernel
                    .complete_call(&waiter, core, mcore_abi::SysStatus::Ok, data);
                self.kernel
                    .transition(&waiter, ThreadState::Migrating, None);
                self.kernel.migrate(waiter, core, None);
                Ok(data)
            }
            SignalOutcome::Corrupt => self
                .kernel
                .fatal(&format!("notify {} waiting with an empty wait list", handle.0)),
        }
    }

    /// Create an SPSC ring of `entry_count` slots of `entry_size` bytes.
    pub fn create_ring(&self, entry_size: usize, entry_count: u32) -> Result<Arc<IpcRing>, KernelError> {
        let buffer = RingBuffer::new(entry_size, entry_count).ok_or(KernelError::InvalidRingGeometry)?;
        let recv = self.kernel.create_notify(ThreadState::RecvBlocked);
        let space = self.kernel.create_notify(ThreadState::SendBlocked);
        Ok(Arc::new(IpcRing::new(buffer, recv.handle(), space.handle())))
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Copy of the syscall audit log
    pub fn syslog(&self) -> Vec<SysEvent> {
        self.kernel.with_syslog(|log| log.events().to_vec())
    }

    /// Syscall requests one thread issued, oldest first
    pub fn requests_of(&self, id: ThreadId) -> Vec<SysEvent> {
        self.kernel
            .with_syslog(|log| log.requests_of(id).into_iter().cloned().collect())
    }

    /// Copy of the state-transition log
    pub fn transitions(&self) -> Vec<Transition> {
        self.kernel.with_transitions(|log| log.entries().to_vec())
    }

    /// Transitions of one thread, oldest first
    pub fn history_of(&self, id: ThreadId) -> Vec<Transition> {
        self.kernel
            .with_transitions(|log| log.history_of(id).into_iter().cloned().collect())
    }

    /// True if the transition log's hash chain is intact
    pub fn verify_transitions(&self) -> bool {
        self.kernel.with_transitions(|log| log.verify_integrity())
    }

    pub fn core_stats(&self, core: CoreId) -> Option<CoreStats> {
        self.kernel.core(core).map(|c| c.snapshot())
    }

    /// Run list of `core` as published after its last step, head first
    pub fn run_list(&self, core: CoreId) -> Option<Vec<ThreadId>> {
        self.kernel.core(core).map(|c| c.published_run_list())
    }

    /// Sleeping threads in expiry order
    pub fn sleeping_threads(&self) -> Vec<ThreadId> {
        self.kernel.timers.thread_ids()
    }

    pub fn placement(&self) -> Placement {
        metrics::placement(&self.kernel)
    }

    /// Check run-list / wait-list / timer-queue exclusivity.
    ///
    /// Run lists are published snapshots, so call this when the system is
    /// quiescent.
    pub fn check_exclusivity(&self) -> Vec<InvariantViolation> {
        invariants::check_exclusivity(&self.placement())
    }

    pub fn metrics(&self) -> SystemMetrics {
        metrics::collect(&self.kernel)
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Halt every core, join the agents and release every remaining thread
    /// with `SysStatus::Shutdown`. Idempotent.
    pub fn shutdown(&self) {
        let agents = core::mem::take(&mut *self.agents.lock());
        lifecycle::shutdown(&self.kernel, agents);
    }
}

impl Signaller for System {
    fn signal(&self, handle: NotifyHandle, data: u64) -> Result<u64, KernelError> {
        self.signal_notify(handle, data)
    }
}

impl Drop for System {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl core::fmt::Debug for System {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("System")
            .field("cores", &self.kernel.config.cores)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
