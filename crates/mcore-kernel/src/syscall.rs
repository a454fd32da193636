//! Thread-side syscall entry.
//!
//! A thread's body receives a [`UserContext`]; every syscall goes through
//! [`UserContext::sys_call`]:
//!
//! 1. Wait until the owning core has the thread running
//! 2. Stage id and arguments in the call slot
//! 3. CAS the gate Running -> SyscallPending (retry from 1 if the core
//!    preempted us first)
//! 4. Ring the owning core's doorbell
//! 5. Wait until the core (or a notify signaller) resumes us, then read the
//!    result

use std::sync::Arc;

use mcore_abi::syscall::{SYS_SIGNAL_NOTIFY, SYS_SLEEP, SYS_THREAD_EXIT, SYS_WAIT_FOR_NOTIFY};
use mcore_abi::SysStatus;

use crate::cpu::EVENT_SYSCALL;
use crate::error::KernelError;
use crate::kernel::KernelShared;
use crate::thread::Thread;
use crate::types::{CoreId, NotifyHandle, ThreadId};

/// Anything that can signal a notify: a thread (via syscall) or the kernel
/// front end.
pub trait Signaller {
    /// Signal `handle` with `data`; returns the combined or handed-off data.
    fn signal(&self, handle: NotifyHandle, data: u64) -> Result<u64, KernelError>;
}

/// Map a non-Ok syscall status to the API error.
pub(crate) fn status_error(status: SysStatus) -> KernelError {
    match status {
        SysStatus::InvalidHandle => KernelError::InvalidHandle,
        SysStatus::Shutdown => KernelError::ShutDown,
        SysStatus::InvalidCall | SysStatus::Ok => KernelError::InvalidState,
    }
}

/// Execution context handed to a thread body.
pub struct UserContext {
    thread: Arc<Thread>,
    kernel: Arc<KernelShared>,
}

impl UserContext {
    pub(crate) fn new(thread: Arc<Thread>, kernel: Arc<KernelShared>) -> Self {
        Self { thread, kernel }
    }

    pub fn thread(&self) -> &Arc<Thread> {
        &self.thread
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread.id()
    }

    /// Core currently running this thread
    pub fn core(&self) -> Option<CoreId> {
        self.thread.owner()
    }

    /// True once the thread has been released (exit or shutdown)
    pub fn is_released(&self) -> bool {
        self.thread.is_released()
    }

    /// Multiplexed syscall entry.
    ///
    /// Returns `(SysStatus::Shutdown, 0)` once the thread has been released.
    pub fn sys_call(&self, id: u32, arg1: u64, arg2: u64) -> (SysStatus, u64) {
        let thread = &self.thread;

        loop {
            if !thread.wait_until_running() {
                return thread.take_result().unwrap_or((SysStatus::Shutdown, 0));
            }
            thread.stage_call(id, [arg1, arg2]);
            if thread.try_post() {
                break;
            }
        }

        if let Some(result) = self.ring_owner() {
            return result;
        }

        thread.wait_until_running();
        thread.take_result().unwrap_or((SysStatus::Shutdown, 0))
    }

    /// Ring the owning core's doorbell for a posted call.
    ///
    /// Returns the final result instead when shutdown released the thread
    /// between the post and the owner lookup.
    fn ring_owner(&self) -> Option<(SysStatus, u64)> {
        let thread = &self.thread;
        // Cores never move a thread with a pending call; only shutdown clears the owner.
        match thread.owner().and_then(|core| self.kernel.core(core)) {
            Some(core) => {
                core.doorbell.signal(EVENT_SYSCALL);
                None
            }
            None if thread.is_released() => {
                Some(thread.take_result().unwrap_or((SysStatus::Shutdown, 0)))
            }
            None => self
                .kernel
                .fatal(&format!("thread {} posted a syscall while unowned", thread.id())),
        }
    }

    /// Sleep for `ms` milliseconds. `sleep(0)` yields to the next thread.
    pub fn sleep(&self, ms: u64) {
        self.sys_call(SYS_SLEEP, ms, 0);
    }

    /// Yield the rest of the quantum.
    pub fn yield_now(&self) {
        self.sleep(0);
    }

    pub fn signal_notify(&self, handle: NotifyHandle, data: u64) -> Result<u64, SysStatus> {
        match self.sys_call(SYS_SIGNAL_NOTIFY, handle.0, data) {
            (SysStatus::Ok, value) => Ok(value),
            (status, _) => Err(status),
        }
    }

    /// Block until `handle` is signalled; returns the consumed data word.
    pub fn wait_for_notify(&self, handle: NotifyHandle) -> Result<u64, SysStatus> {
        match self.sys_call(SYS_WAIT_FOR_NOTIFY, handle.0, 0) {
            (SysStatus::Ok, value) => Ok(value),
            (status, _) => Err(status),
        }
    }

    /// Terminate the thread. Returns immediately if it was already released.
    pub fn exit(&self) {
        if !self.thread.is_released() {
            self.sys_call(SYS_THREAD_EXIT, 0, 0);
        }
    }

    /// Voluntary preemption point for compute loops.
    ///
    /// Blocks while the owning core has the thread paused. Returns `false`
    /// once the thread has been released and the body should return.
    pub fn checkpoint(&self) -> bool {
        self.thread.wait_until_running()
    }
}

impl Signaller for UserContext {
    fn signal(&self, handle: NotifyHandle, data: u64) -> Result<u64, KernelError> {
        self.signal_notify(handle, data).map_err(status_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SystemConfig;
    use mcore_hal::TestHal;

    fn context() -> UserContext {
        let kernel = KernelShared::new(
            SystemConfig {
                cores: 2,
                ..SystemConfig::default()
            },
            Arc::new(TestHal::new()),
        );
        let thread = kernel.create_thread(kernel.kernel_process.clone(), "caller");
        UserContext::new(thread, kernel)
    }

    #[test]
    fn test_posted_call_rings_owner_doorbell() {
        let ctx = context();
        ctx.thread.set_owner(Some(1));
        assert_eq!(ctx.ring_owner(), None);
        assert_eq!(ctx.kernel.cores[1].doorbell.peek() & EVENT_SYSCALL, EVENT_SYSCALL);
        assert_eq!(ctx.kernel.cores[0].doorbell.peek() & EVENT_SYSCALL, 0);
    }

    #[test]
    fn test_released_while_posting_returns_shutdown() {
        let ctx = context();
        // Shutdown took the thread off its core after the call was posted
        ctx.thread.set_owner(None);
        ctx.thread.release(SysStatus::Shutdown);
        assert_eq!(ctx.ring_owner(), Some((SysStatus::Shutdown, 0)));
        assert!(ctx.is_released());
    }

    #[test]
    fn test_status_error_mapping() {
        assert_eq!(status_error(SysStatus::InvalidHandle), KernelError::InvalidHandle);
        assert_eq!(status_error(SysStatus::Shutdown), KernelError::ShutDown);
        assert_eq!(status_error(SysStatus::InvalidCall), KernelError::InvalidState);
    }
}
