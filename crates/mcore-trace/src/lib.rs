//! mcore Trace Layer
//!
//! The trace layer provides:
//! - **SysLog**: Audit trail of every syscall (request + response)
//! - **TransitionLog**: Hash-chained record of every thread state transition
//!
//! Both logs are bounded: once full, the oldest entries are dropped. Both are
//! plain data structures; the kernel wraps them in its own locks.

#![no_std]
extern crate alloc;

pub mod syslog;
pub mod transitions;
pub mod types;

pub use syslog::{SysEvent, SysEventType, SysLog};
pub use transitions::{Transition, TransitionLog};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_lifecycle_trace() {
        let mut syslog = SysLog::new();
        let mut transitions = TransitionLog::new();

        transitions.record(7, ThreadState::Inception, ThreadState::OnRunList, Some(0), 10);
        let req = syslog.log_request(7, 0, 4, [50, 0], 20);
        transitions.record(7, ThreadState::OnRunList, ThreadState::Sleeping, None, 21);
        syslog.log_response(7, 0, req, 0, 0, 22);

        assert_eq!(syslog.len(), 2);
        assert_eq!(transitions.history_of(7).len(), 2);
        assert!(transitions.verify_integrity());
    }
}
