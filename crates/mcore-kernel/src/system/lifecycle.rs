//! Boot, thread creation and shutdown
//!
//! This module contains the lifecycle steps behind `System`:
//! - `start_agents()` - Create one `CpuCore` per core and start its agent
//! - `spawn()` - Create a thread, its host thread, and queue it on a core
//! - `shutdown()` - Halt the cores and release every remaining thread

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use mcore_abi::ici::ICI_HALT;
use mcore_abi::SysStatus;
use mcore_hal::AgentHandle;

use crate::cpu::CpuCore;
use crate::error::KernelError;
use crate::ici::IciMessage;
use crate::kernel::KernelShared;
use crate::syscall::UserContext;
use crate::thread::{set_current_thread, Thread};
use crate::types::{CoreId, ProcessId, ThreadId};

/// User code run by a spawned thread
pub(in crate::system) type ThreadBody = Box<dyn FnOnce(&UserContext) + Send + 'static>;

/// Start the execution agent of every core.
///
/// A host that cannot create an agent thread is fatal.
pub(in crate::system) fn start_agents(kernel: &Arc<KernelShared>) -> Vec<AgentHandle> {
    (0..kernel.config.cores)
        .map(|index| {
            let core = CpuCore::new(kernel.clone(), index);
            let name = format!("mcore-core-{}", core.index());
            match kernel.hal.spawn_agent(&name, Box::new(move || core.run())) {
                Ok(handle) => handle,
                Err(e) => kernel.fatal(&format!("cannot start agent of core {}: {}", index, e)),
            }
        })
        .collect()
}

/// Create a thread running `body` and queue it on `core`.
///
/// The new thread travels the normal migration path: it is pushed to the
/// core's migration inbox in Inception and the core moves it to OnRunList.
pub(in crate::system) fn spawn(
    kernel: &Arc<KernelShared>,
    process: ProcessId,
    name: &str,
    core: CoreId,
    body: ThreadBody,
) -> Result<ThreadId, KernelError> {
    if kernel.is_shutting_down() {
        return Err(KernelError::ShutDown);
    }
    let process = kernel
        .process(process)
        .ok_or(KernelError::ProcessNotFound)?;
    if kernel.live_thread_count() >= kernel.config.max_threads {
        return Err(KernelError::ThreadLimit);
    }

    let thread = kernel.create_thread(process, name);
    let id = thread.id();
    let ctx = UserContext::new(thread.clone(), kernel.clone());
    let entry_thread = thread.clone();

    let host = match kernel
        .hal
        .spawn_thread(name, Box::new(move || run_thread(entry_thread, ctx, body)))
    {
        Ok(host) => host,
        Err(e) => kernel.fatal(&format!("cannot create host thread for {}: {}", name, e)),
    };
    thread.attach_host(host);

    log::debug!("spawned thread {} ({}) for core {}", id, name, core);
    kernel.migrate(thread, core, None);
    Ok(id)
}

/// Entry of every spawned host thread.
fn run_thread(thread: Arc<Thread>, ctx: UserContext, body: ThreadBody) {
    set_current_thread(Some(thread.clone()));

    if thread.wait_until_running() {
        if catch_unwind(AssertUnwindSafe(|| body(&ctx))).is_err() {
            log::error!("thread {} ({}) panicked", thread.id(), thread.name());
        }
        ctx.exit();
    }

    set_current_thread(None);
}

/// Halt every core, join the agents and release what is left.
pub(in crate::system) fn shutdown(kernel: &Arc<KernelShared>, agents: Vec<AgentHandle>) {
    if !kernel.begin_shutdown() {
        return;
    }
    log::info!("mcore shutting down");

    for index in 0..kernel.config.cores {
        kernel.send_ici(index, IciMessage::new(ICI_HALT, 0, None));
    }
    for agent in agents {
        if !agent.join() {
            log::error!("a core agent panicked");
        }
    }
    debug_assert!(kernel.cores.iter().all(|c| c.is_halted()));

    // Threads the agents could not see: asleep, parked, or in flight.
    let mut stranded = kernel.timers.drain();
    for notify in kernel.all_notifies() {
        stranded.extend(notify.drain_waiters());
    }
    for core in &kernel.cores {
        stranded.extend(core.migrations.drain());
        core.ici.drain();
    }

    for thread in &stranded {
        kernel.force_dead(thread);
        thread.release(SysStatus::Shutdown);
    }
    log::info!("mcore shut down, {} blocked threads released", stranded.len());
}
