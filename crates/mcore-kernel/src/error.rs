//! Kernel error types and the fatal path.

use core::fmt;

use mcore_hal::HAL;

/// Errors returned at the `System` API boundary.
///
/// Scheduling itself never returns errors: blocking conditions are handled by
/// suspending the caller, and broken invariants go through [`fatal`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KernelError {
    /// No process with that id is registered
    ProcessNotFound,
    /// No thread with that id exists
    ThreadNotFound,
    /// Notify handle does not name a live notify object
    InvalidHandle,
    /// Ring entry size or count out of range
    InvalidRingGeometry,
    /// Payload longer than the ring's entry size
    PayloadTooLarge,
    /// `max_threads` threads already exist
    ThreadLimit,
    /// Core index out of range
    InvalidCore,
    /// Thread is not in a state that allows the request
    InvalidState,
    /// Configuration rejected by `SystemConfig::validate`
    InvalidConfig,
    /// The system has shut down
    ShutDown,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::ProcessNotFound => write!(f, "process not found"),
            KernelError::ThreadNotFound => write!(f, "thread not found"),
            KernelError::InvalidHandle => write!(f, "invalid notify handle"),
            KernelError::InvalidRingGeometry => write!(f, "invalid ring geometry"),
            KernelError::PayloadTooLarge => write!(f, "payload larger than ring entry"),
            KernelError::ThreadLimit => write!(f, "thread limit reached"),
            KernelError::InvalidCore => write!(f, "core index out of range"),
            KernelError::InvalidState => write!(f, "thread in wrong state"),
            KernelError::InvalidConfig => write!(f, "invalid configuration"),
            KernelError::ShutDown => write!(f, "system shut down"),
        }
    }
}

impl std::error::Error for KernelError {}

/// End the whole simulated system.
///
/// Used for host-resource exhaustion and broken scheduler invariants. The
/// message goes to the logger and straight to the host console, since a
/// logger may not be installed.
#[cold]
pub fn fatal(hal: &dyn HAL, msg: &str) -> ! {
    log::error!("FATAL: {}", msg);
    hal.debug_write(&format!("[mcore] FATAL: {}", msg));
    std::process::abort()
}
