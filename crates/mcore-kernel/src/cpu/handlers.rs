//! Syscall dispatch on the owning core.
//!
//! The calling thread is the run-list head and its gate reads
//! SyscallPending for the whole handler. Every handler stores the result and
//! finishes the call *before* the thread becomes visible anywhere another
//! core could resume it (timer queue, wait list, migration inbox).

use std::sync::atomic::Ordering;
use std::sync::Arc;

use mcore_abi::syscall::{
    self, SYS_SIGNAL_NOTIFY, SYS_SLEEP, SYS_THREAD_EXIT, SYS_WAIT_FOR_NOTIFY,
};
use mcore_abi::SysStatus;

use super::CpuCore;
use crate::notify::{SignalOutcome, WaitOutcome};
use crate::thread::Thread;
use crate::types::{NotifyHandle, ThreadState};

impl CpuCore {
    pub(super) fn handle_syscall(&mut self) {
        let thread = self.current().clone();
        if thread.is_idle() {
            self.kernel
                .fatal(&format!("core {}: syscall issued by the idle thread", self.index()));
        }

        let (id, args) = thread.pending_call();
        self.shared.counters.syscalls.fetch_add(1, Ordering::Relaxed);
        self.kernel.log_request(&thread, self.index, id, args);
        log::trace!(
            "core {}: thread {} {}({:#x}, {:#x})",
            self.index,
            thread.id(),
            syscall::name(id),
            args[0],
            args[1]
        );

        match id {
            SYS_SLEEP => self.sys_sleep(thread, args[0]),
            SYS_SIGNAL_NOTIFY => self.sys_signal_notify(&thread, NotifyHandle(args[0]), args[1]),
            SYS_WAIT_FOR_NOTIFY => self.sys_wait_for_notify(thread, NotifyHandle(args[0])),
            SYS_THREAD_EXIT => self.sys_thread_exit(thread),
            _ => {
                log::warn!("thread {}: unknown syscall {}", thread.id(), id);
                self.complete(&thread, SysStatus::InvalidCall, 0);
            }
        }
    }

    /// Store the result for the calling thread and close its call.
    fn complete(&self, thread: &Thread, status: SysStatus, value: u64) {
        self.kernel.complete_call(thread, self.index, status, value);
        thread.finish_call();
    }

    fn sys_sleep(&mut self, thread: Arc<Thread>, ms: u64) {
        if ms == 0 {
            if let Some(head) = self.run_list.pop_front() {
                self.run_list.push_back(head);
            }
            self.complete(&thread, SysStatus::Ok, 0);
            return;
        }

        let ticks = self.kernel.config.ticks_for(ms);
        self.run_list.pop_front();
        self.kernel
            .transition(&thread, ThreadState::Sleeping, Some(self.index));
        thread.set_owner(None);
        self.complete(&thread, SysStatus::Ok, 0);

        if let Err(e) = self.kernel.timers.insert(thread, ticks) {
            self.kernel
                .fatal(&format!("core {}: cannot arm sleep timer: {}", self.index, e));
        }
    }

    fn sys_signal_notify(&mut self, thread: &Thread, handle: NotifyHandle, data: u64) {
        let Some(notify) = self.kernel.notify(handle) else {
            log::warn!("thread {}: signal on unknown notify {}", thread.id(), handle.0);
            self.complete(thread, SysStatus::InvalidHandle, 0);
            return;
        };

        match notify.signal(data) {
            SignalOutcome::Accumulated(combined) => {
                self.complete(thread, SysStatus::Ok, combined);
            }
            SignalOutcome::Released { waiter, data } => {
                self.kernel
                    .complete_call(&waiter, self.index, SysStatus::Ok, data);
                self.wake(waiter);
                self.complete(thread, SysStatus::Ok, data);
            }
            SignalOutcome::Corrupt => self.kernel.fatal(&format!(
                "core {}: notify {} waiting with an empty wait list",
                self.index, handle.0
            )),
        }
    }

    fn sys_wait_for_notify(&mut self, thread: Arc<Thread>, handle: NotifyHandle) {
        let Some(notify) = self.kernel.notify(handle) else {
            log::warn!("thread {}: wait on unknown notify {}", thread.id(), handle.0);
            self.complete(&thread, SysStatus::InvalidHandle, 0);
            return;
        };

        self.run_list.pop_front();
        thread.finish_call();

        let kernel = &self.kernel;
        let index = self.index;
        let outcome = notify.wait(&thread, |t| {
            kernel.transition(t, notify.block_state(), Some(index));
            t.set_owner(None);
        });

        match outcome {
            WaitOutcome::Ready(data) => {
                self.kernel
                    .complete_call(&thread, self.index, SysStatus::Ok, data);
                self.run_list.push_front(thread);
            }
            WaitOutcome::Parked => {
                log::trace!("thread {} parked on notify {}", thread.id(), handle.0);
            }
        }
    }

    fn sys_thread_exit(&mut self, thread: Arc<Thread>) {
        self.run_list.pop_front();
        self.kernel
            .transition(&thread, ThreadState::Dying, Some(self.index));
        thread.set_owner(None);
        self.kernel
            .complete_call(&thread, self.index, SysStatus::Ok, 0);
        self.kernel
            .transition(&thread, ThreadState::Dead, Some(self.index));
        self.kernel.retire(thread.id());
        log::debug!("thread {} ({}) exited", thread.id(), thread.name());
        thread.release(SysStatus::Ok);
    }
}
