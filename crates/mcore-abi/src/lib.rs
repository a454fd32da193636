//! ABI constants for the mcore scheduler
//!
//! This crate is the **single source of truth** for every number that
//! crosses the user/kernel or core/core boundary:
//!
//! - **Syscall ids** (Thread → owning core)
//! - **Status codes** (owning core → Thread, via the call slot)
//! - **ICI codes** (core → core)
//!
//! # Syscall Surface
//!
//! | Id | Call | arg1 | arg2 | value |
//! |----|------|------|------|-------|
//! | 1 | `THREAD_EXIT` | - | - | - |
//! | 2 | `SIGNAL_NOTIFY` | notify handle | data word | combined or handed-off data |
//! | 3 | `WAIT_FOR_NOTIFY` | notify handle | - | consumed data |
//! | 4 | `SLEEP` | milliseconds | - | - |

#![no_std]

// =============================================================================
// Syscall Ids
// =============================================================================

/// Syscall ids accepted by the multiplexed `sys_call` entry point.
pub mod syscall {
    /// Terminate the calling thread
    pub const SYS_THREAD_EXIT: u32 = 1;
    /// Signal a notify object with a data word
    pub const SYS_SIGNAL_NOTIFY: u32 = 2;
    /// Block until a notify object is signalled
    pub const SYS_WAIT_FOR_NOTIFY: u32 = 3;
    /// Sleep for a number of milliseconds (0 = requeue to tail)
    pub const SYS_SLEEP: u32 = 4;

    /// Human-readable syscall name, for logs.
    pub fn name(id: u32) -> &'static str {
        match id {
            SYS_THREAD_EXIT => "ThreadExit",
            SYS_SIGNAL_NOTIFY => "SignalNotify",
            SYS_WAIT_FOR_NOTIFY => "WaitForNotify",
            SYS_SLEEP => "Sleep",
            _ => "Unknown",
        }
    }
}

// =============================================================================
// Status Codes
// =============================================================================

/// Status word stored into the call slot alongside the result value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum SysStatus {
    /// Call completed
    Ok = 0,
    /// Notify handle does not name a live notify object
    InvalidHandle = 1,
    /// Syscall id not recognized
    InvalidCall = 2,
    /// The system shut down while the call was outstanding
    Shutdown = 3,
}

impl SysStatus {
    /// Convert from the raw status word.
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Ok),
            1 => Some(Self::InvalidHandle),
            2 => Some(Self::InvalidCall),
            3 => Some(Self::Shutdown),
            _ => None,
        }
    }

    /// True for `SysStatus::Ok`.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

// =============================================================================
// ICI Codes (core → core)
// =============================================================================

/// Inter-core interrupt codes.
///
/// | Range | Meaning |
/// |-------|---------|
/// | 0x00-0x0F | Reserved scheduler codes |
/// | 0x100+ | Free for user-defined messages (handled as no-ops by the core) |
pub mod ici {
    /// Threads are waiting in the target's migration inbox
    pub const ICI_MIGRATED_THREAD: u32 = 0x01;
    /// Wake the target core and run a reschedule pass
    pub const ICI_RESCHEDULE: u32 = 0x02;
    /// Stop the target core's execution agent
    pub const ICI_HALT: u32 = 0x03;
    /// Move the thread named by the payload off the run list (OnRunList → Suspended)
    pub const ICI_SUSPEND_THREAD: u32 = 0x04;
    /// Put the suspended thread named by the payload back on the run list
    pub const ICI_RESUME_THREAD: u32 = 0x05;

    /// First code available for user-defined messages
    pub const ICI_USER_BASE: u32 = 0x100;

    /// Human-readable ICI code name, for logs.
    pub fn name(code: u32) -> &'static str {
        match code {
            ICI_MIGRATED_THREAD => "MigratedThread",
            ICI_RESCHEDULE => "Reschedule",
            ICI_HALT => "Halt",
            ICI_SUSPEND_THREAD => "SuspendThread",
            ICI_RESUME_THREAD => "ResumeThread",
            c if c >= ICI_USER_BASE => "User",
            _ => "Reserved",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syscall_ids_match_surface() {
        assert_eq!(syscall::SYS_THREAD_EXIT, 1);
        assert_eq!(syscall::SYS_SIGNAL_NOTIFY, 2);
        assert_eq!(syscall::SYS_WAIT_FOR_NOTIFY, 3);
        assert_eq!(syscall::SYS_SLEEP, 4);
        assert_eq!(syscall::name(3), "WaitForNotify");
        assert_eq!(syscall::name(99), "Unknown");
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            SysStatus::Ok,
            SysStatus::InvalidHandle,
            SysStatus::InvalidCall,
            SysStatus::Shutdown,
        ] {
            assert_eq!(SysStatus::from_u32(status as u32), Some(status));
        }
        assert_eq!(SysStatus::from_u32(42), None);
        assert!(SysStatus::Ok.is_ok());
        assert!(!SysStatus::Shutdown.is_ok());
    }

    #[test]
    fn test_ici_names() {
        assert_eq!(ici::name(ici::ICI_MIGRATED_THREAD), "MigratedThread");
        assert_eq!(ici::name(ici::ICI_USER_BASE + 7), "User");
        assert_eq!(ici::name(0x0F), "Reserved");
    }
}
