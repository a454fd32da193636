//! State shared by every core agent and the `System` front end.
//!
//! Nothing in here is per-core scheduling state: run lists live inside each
//! `CpuCore` and are never reachable from this struct.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use mcore_abi::SysStatus;
use mcore_hal::HAL;
use mcore_trace::{SysLog, TransitionLog};
use spin::{Mutex, RwLock};

use crate::config::{IrqRouting, SystemConfig, WakePolicy};
use crate::cpu::{CoreShared, EVENT_IRQ};
use crate::error::fatal;
use crate::notify::Notify;
use crate::thread::{Process, Thread};
use crate::timer::TimerQueue;
use crate::types::{CoreId, NotifyHandle, ProcessId, ThreadId, ThreadState};

/// Idle threads take ids from the top half of the id space so they never
/// collide with spawned threads.
const IDLE_THREAD_BASE: ThreadId = 1 << 63;

/// Id of the idle thread of `core`
pub(crate) fn idle_thread_id(core: CoreId) -> ThreadId {
    IDLE_THREAD_BASE | ThreadId::from(core)
}

/// Routes host timer interrupts to cores.
struct IrqRouter {
    cores: Vec<Arc<CoreShared>>,
    routing: IrqRouting,
    hal: Arc<dyn HAL>,
    cursor: AtomicUsize,
}

impl IrqRouter {
    fn raise(&self, epoch: u64) {
        let n = self.cores.len();
        let index = match self.routing {
            IrqRouting::RoundRobin => self.cursor.fetch_add(1, Ordering::Relaxed) % n,
            IrqRouting::Random => self.hal.random_u32() as usize % n,
            IrqRouting::Fixed(core) => core as usize,
        };
        let core = &self.cores[index];
        core.raise_tick(epoch);
        core.doorbell.signal(EVENT_IRQ);
    }
}

pub(crate) struct KernelShared {
    pub(crate) config: SystemConfig,
    pub(crate) hal: Arc<dyn HAL>,
    pub(crate) cores: Vec<Arc<CoreShared>>,
    pub(crate) timers: TimerQueue,
    pub(crate) kernel_process: Arc<Process>,
    processes: RwLock<BTreeMap<ProcessId, Arc<Process>>>,
    threads: RwLock<BTreeMap<ThreadId, Arc<Thread>>>,
    notifies: RwLock<BTreeMap<NotifyHandle, Arc<Notify>>>,
    next_process: AtomicU64,
    next_thread: AtomicU64,
    next_notify: AtomicU64,
    wake_cursor: AtomicUsize,
    syslog: Mutex<SysLog>,
    transitions: Mutex<TransitionLog>,
    shutting_down: AtomicBool,
    boot_time: u64,
}

impl KernelShared {
    pub(crate) fn new(config: SystemConfig, hal: Arc<dyn HAL>) -> Arc<Self> {
        let cores: Vec<Arc<CoreShared>> = (0..config.cores)
            .map(|index| Arc::new(CoreShared::new(index, config.ici_capacity)))
            .collect();

        let router = IrqRouter {
            cores: cores.clone(),
            routing: config.irq_routing,
            hal: hal.clone(),
            cursor: AtomicUsize::new(0),
        };
        let timers = TimerQueue::new(
            hal.clone(),
            config.timer_period_ms,
            Arc::new(move |epoch| router.raise(epoch)),
        );

        Arc::new(Self {
            boot_time: hal.now_nanos(),
            config,
            hal,
            cores,
            timers,
            kernel_process: Arc::new(Process {
                id: ProcessId(0),
                name: String::from("kernel"),
            }),
            processes: RwLock::new(BTreeMap::new()),
            threads: RwLock::new(BTreeMap::new()),
            notifies: RwLock::new(BTreeMap::new()),
            next_process: AtomicU64::new(1),
            next_thread: AtomicU64::new(1),
            next_notify: AtomicU64::new(1),
            wake_cursor: AtomicUsize::new(0),
            syslog: Mutex::new(SysLog::new()),
            transitions: Mutex::new(TransitionLog::new()),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Nanoseconds since boot
    pub(crate) fn now(&self) -> u64 {
        self.hal.now_nanos().saturating_sub(self.boot_time)
    }

    pub(crate) fn fatal(&self, msg: &str) -> ! {
        fatal(&*self.hal, msg)
    }

    pub(crate) fn core(&self, index: CoreId) -> Option<&Arc<CoreShared>> {
        self.cores.get(index as usize)
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Flag shutdown. Returns `false` if it was already flagged.
    pub(crate) fn begin_shutdown(&self) -> bool {
        !self.shutting_down.swap(true, Ordering::SeqCst)
    }

    // ========================================================================
    // Registries
    // ========================================================================

    pub(crate) fn register_process(&self, name: &str) -> ProcessId {
        let id = ProcessId(self.next_process.fetch_add(1, Ordering::Relaxed));
        self.processes.write().insert(
            id,
            Arc::new(Process {
                id,
                name: String::from(name),
            }),
        );
        id
    }

    pub(crate) fn process(&self, id: ProcessId) -> Option<Arc<Process>> {
        self.processes.read().get(&id).cloned()
    }

    /// Create and register a thread in Inception. No host thread is attached.
    pub(crate) fn create_thread(&self, process: Arc<Process>, name: &str) -> Arc<Thread> {
        let thread = Thread::new(
            self.next_thread.fetch_add(1, Ordering::Relaxed),
            name,
            process,
            self.config.quantum_nanos(),
        );
        self.threads.write().insert(thread.id(), thread.clone());
        thread
    }

    pub(crate) fn thread(&self, id: ThreadId) -> Option<Arc<Thread>> {
        self.threads.read().get(&id).cloned()
    }

    /// Drop a dead thread from the registry.
    pub(crate) fn retire(&self, id: ThreadId) {
        if self.threads.write().remove(&id).is_some() {
            log::trace!("thread {} retired", id);
        }
    }

    /// True if `id` was handed to a spawned thread that has since died.
    pub(crate) fn is_retired(&self, id: ThreadId) -> bool {
        id != 0
            && id < self.next_thread.load(Ordering::Relaxed)
            && !self.threads.read().contains_key(&id)
    }

    /// Threads that are not yet dead
    pub(crate) fn live_thread_count(&self) -> usize {
        self.threads.read().len()
    }

    pub(crate) fn create_notify(&self, block_state: ThreadState) -> Arc<Notify> {
        let handle = NotifyHandle(self.next_notify.fetch_add(1, Ordering::Relaxed));
        let notify = Arc::new(Notify::new(handle, block_state));
        self.notifies.write().insert(handle, notify.clone());
        notify
    }

    pub(crate) fn notify(&self, handle: NotifyHandle) -> Option<Arc<Notify>> {
        self.notifies.read().get(&handle).cloned()
    }

    pub(crate) fn all_notifies(&self) -> Vec<Arc<Notify>> {
        self.notifies.read().values().cloned().collect()
    }

    // ========================================================================
    // State transitions
    // ========================================================================

    /// Move `thread` to `to`, recording the transition.
    ///
    /// An edge outside the thread state machine means the scheduler's
    /// bookkeeping is corrupt, which is fatal.
    pub(crate) fn transition(&self, thread: &Thread, to: ThreadState, core: Option<CoreId>) {
        let from = thread.state();
        if !from.can_transition_to(to) {
            self.fatal(&format!(
                "thread {} ({}): illegal transition {:?} -> {:?}",
                thread.id(),
                thread.name(),
                from,
                to
            ));
        }
        thread.store_state(to);
        log::trace!("thread {} {:?} -> {:?} (core {:?})", thread.id(), from, to, core);
        self.record_transition(thread.id(), from, to, core);
    }

    /// Mark `thread` dead from whatever state it is in and retire it
    /// (shutdown path).
    pub(crate) fn force_dead(&self, thread: &Thread) {
        let from = thread.state();
        if from != ThreadState::Dead {
            thread.store_state(ThreadState::Dead);
            thread.set_owner(None);
            self.record_transition(thread.id(), from, ThreadState::Dead, None);
        }
        self.retire(thread.id());
    }

    fn record_transition(&self, thread: ThreadId, from: ThreadState, to: ThreadState, core: Option<CoreId>) {
        if self.config.audit {
            let now = self.now();
            self.transitions.lock().record(thread, from, to, core, now);
        }
    }

    // ========================================================================
    // Syscall audit
    // ========================================================================

    /// Record a syscall request and remember its event id on the thread.
    pub(crate) fn log_request(&self, thread: &Thread, core: CoreId, id: u32, args: [u64; 2]) {
        if self.config.audit {
            let now = self.now();
            let event = self.syslog.lock().log_request(thread.id(), core, id, args, now);
            thread.set_request(event);
        }
    }

    /// Store a syscall result into the thread's call slot and record it.
    ///
    /// `core` is the core completing the call, which for a released waiter
    /// may differ from the one that received the request.
    pub(crate) fn complete_call(&self, thread: &Thread, core: CoreId, status: SysStatus, value: u64) {
        thread.set_result(status, value);
        if self.config.audit {
            let now = self.now();
            self.syslog.lock().log_response(
                thread.id(),
                core,
                thread.request(),
                status as u32,
                value,
                now,
            );
        }
    }

    pub(crate) fn with_syslog<R>(&self, f: impl FnOnce(&SysLog) -> R) -> R {
        f(&self.syslog.lock())
    }

    pub(crate) fn with_transitions<R>(&self, f: impl FnOnce(&TransitionLog) -> R) -> R {
        f(&self.transitions.lock())
    }

    // ========================================================================
    // Placement
    // ========================================================================

    /// Core for a thread leaving the timer queue or entering the system.
    pub(crate) fn pick_core(&self) -> CoreId {
        let n = self.cores.len();
        let index = match self.config.wake_policy {
            WakePolicy::RoundRobin => self.wake_cursor.fetch_add(1, Ordering::Relaxed) % n,
            WakePolicy::Random => self.hal.random_u32() as usize % n,
            WakePolicy::LeastLoaded => self
                .cores
                .iter()
                .enumerate()
                .min_by_key(|(_, core)| core.load())
                .map(|(index, _)| index)
                .unwrap_or(0),
        };
        index as CoreId
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcore_hal::TestHal;

    fn kernel(config: SystemConfig) -> Arc<KernelShared> {
        KernelShared::new(config, Arc::new(TestHal::new()))
    }

    #[test]
    fn test_round_robin_placement() {
        let k = kernel(SystemConfig {
            cores: 3,
            ..SystemConfig::default()
        });
        let picks: Vec<CoreId> = (0..5).map(|_| k.pick_core()).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1]);
    }

    #[test]
    fn test_least_loaded_placement() {
        let k = kernel(SystemConfig {
            cores: 3,
            wake_policy: WakePolicy::LeastLoaded,
            ..SystemConfig::default()
        });
        k.cores[0].publish(&[1, 2, 3], 2);
        k.cores[1].publish(&[4], 0);
        k.cores[2].publish(&[5, 6], 1);
        assert_eq!(k.pick_core(), 1);
    }

    #[test]
    fn test_fixed_irq_routing_raises_one_core() {
        let hal = Arc::new(TestHal::new());
        let k = KernelShared::new(
            SystemConfig {
                cores: 2,
                irq_routing: IrqRouting::Fixed(1),
                ..SystemConfig::default()
            },
            hal.clone(),
        );
        let t = k.create_thread(k.kernel_process.clone(), "t");
        k.timers.insert(t, 5).unwrap();

        hal.fire_timers();
        hal.fire_timers();
        assert_eq!(k.cores[0].pending_ticks(), 0);
        assert_eq!(k.cores[1].pending_ticks(), 2);
        assert_eq!(k.cores[1].doorbell.peek() & EVENT_IRQ, EVENT_IRQ);
    }

    #[test]
    fn test_transition_recorded() {
        let k = kernel(SystemConfig::default());
        let t = k.create_thread(k.kernel_process.clone(), "t");
        k.transition(&t, ThreadState::OnRunList, Some(0));
        assert_eq!(t.state(), ThreadState::OnRunList);
        k.with_transitions(|log| {
            let history = log.history_of(t.id());
            assert_eq!(history.len(), 1);
            assert_eq!(history[0].from, ThreadState::Inception);
            assert_eq!(history[0].core, Some(0));
        });
    }

    #[test]
    fn test_force_dead_from_any_state() {
        let k = kernel(SystemConfig::default());
        let t = k.create_thread(k.kernel_process.clone(), "t");
        k.transition(&t, ThreadState::OnRunList, Some(0));
        k.transition(&t, ThreadState::Sleeping, None);
        assert_eq!(k.live_thread_count(), 1);
        k.force_dead(&t);
        assert_eq!(t.state(), ThreadState::Dead);
        assert_eq!(k.live_thread_count(), 0);
        assert!(k.thread(t.id()).is_none());
        assert!(k.is_retired(t.id()));
    }

    #[test]
    fn test_retired_ids_are_only_spawned_ids() {
        let k = kernel(SystemConfig::default());
        let t = k.create_thread(k.kernel_process.clone(), "t");
        assert!(!k.is_retired(t.id()));
        k.retire(t.id());
        assert!(k.is_retired(t.id()));

        // Never allocated, or an idle thread
        assert!(!k.is_retired(0));
        assert!(!k.is_retired(t.id() + 1));
        assert!(!k.is_retired(idle_thread_id(0)));
    }

    #[test]
    fn test_complete_call_logs_response() {
        let k = kernel(SystemConfig::default());
        let t = k.create_thread(k.kernel_process.clone(), "t");
        k.log_request(&t, 1, 4, [10, 0]);
        k.complete_call(&t, 2, SysStatus::Ok, 0);
        assert_eq!(t.take_result(), Some((SysStatus::Ok, 0)));
        k.with_syslog(|log| {
            assert_eq!(log.len(), 2);
            assert_eq!(log.events()[1].core, 2);
        });
    }

    #[test]
    fn test_audit_disabled_records_nothing() {
        let k = kernel(SystemConfig {
            audit: false,
            ..SystemConfig::default()
        });
        let t = k.create_thread(k.kernel_process.clone(), "t");
        k.transition(&t, ThreadState::OnRunList, Some(0));
        k.log_request(&t, 0, 4, [0, 0]);
        assert!(k.with_transitions(|log| log.is_empty()));
        assert!(k.with_syslog(|log| log.is_empty()));
    }
}
