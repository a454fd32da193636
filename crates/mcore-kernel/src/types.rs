//! Core identifier and handle types.

use serde::{Deserialize, Serialize};

pub use mcore_trace::{CoreId, ThreadId, ThreadState};

/// Process identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProcessId(pub u64);

/// Handle naming a notify object in syscall arguments
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NotifyHandle(pub u64);

/// Core index meaning "owned by no core"
pub(crate) const NO_CORE: u32 = u32::MAX;

/// Per-core scheduling counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreStats {
    /// Times a different thread became current
    pub context_switches: u64,
    /// ICI messages processed
    pub icis_handled: u64,
    /// Threads accepted from the migration inbox
    pub migrations_in: u64,
    /// Threads pushed to another core's migration inbox
    pub migrations_out: u64,
    /// Syscalls dispatched
    pub syscalls: u64,
    /// Timer ticks consumed
    pub ticks: u64,
    /// Quanta that expired with another thread ready
    pub preemptions: u64,
}
