//! Host Abstraction Layer for mcore
//!
//! This crate defines the HAL trait that lets the scheduler core run on a
//! host operating system while it is validated, and later on bare metal,
//! by abstracting the primitives it consumes:
//!
//! - Host threads created suspended, resumed by unpark
//! - Agent threads (one per simulated core), joinable
//! - A monotonic clock
//! - A periodic timer whose callback raises a core's interrupt
//! - Entropy for random interrupt routing
//! - Debug output
//!
//! # Platform Implementations
//!
//! - **StdHal**: `std::thread` for threads, `Instant` for time, a sleeping
//!   host thread per armed timer
//! - **TestHal**: real threads, but a manual clock and manually fired timers,
//!   so time-dependent behaviour is deterministic in tests

mod event;
mod std_hal;
mod test_hal;
mod thread;

use std::fmt;

pub use event::{Event, EventSet};
pub use std_hal::StdHal;
pub use test_hal::TestHal;
pub use thread::{park_current, AgentHandle, HostThread};

/// Entry point run on a newly spawned host thread
pub type ThreadEntry = Box<dyn FnOnce() + Send + 'static>;

/// Callback invoked on every period of an armed timer
pub type TimerCallback = Box<dyn Fn() + Send + Sync + 'static>;

/// Identifier of an armed periodic timer
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub u64);

/// Hardware Abstraction Layer trait
///
/// Implementations provide host-specific functionality for:
/// - Thread management (create-suspended, affinity)
/// - Core agent threads
/// - Time measurement and periodic timers
/// - Entropy
/// - Debug output
///
/// Suspend/resume of a host thread is built by the kernel on top of
/// [`HostThread::unpark`] and [`park_current`]: a thread created here runs
/// its entry immediately, and the entry parks itself until resumed.
pub trait HAL: Send + Sync + 'static {
    // === Threads ===

    /// Create a host thread backing one schedulable thread.
    ///
    /// # Returns
    /// * `Ok(HostThread)` - Handle used to unpark the thread
    /// * `Err(HalError::ThreadSpawnFailed)` - The host refused to create it
    fn spawn_thread(&self, name: &str, entry: ThreadEntry) -> Result<HostThread, HalError>;

    /// Create the execution agent of a simulated core.
    ///
    /// Agents run for the lifetime of the system and are joined on shutdown.
    fn spawn_agent(&self, name: &str, entry: ThreadEntry) -> Result<AgentHandle, HalError>;

    /// Pin a host thread to a simulated core.
    ///
    /// On hosts without affinity control this only records the hint.
    fn set_affinity(&self, thread: &HostThread, core: usize) {
        thread.record_affinity(core);
    }

    // === Time ===

    /// Monotonic time in nanoseconds since the HAL was created
    fn now_nanos(&self) -> u64;

    /// Arm a periodic timer that invokes `tick` every `period_ms` milliseconds
    /// until disarmed.
    fn arm_periodic_timer(&self, period_ms: u64, tick: TimerCallback)
        -> Result<TimerId, HalError>;

    /// Stop a timer armed by `arm_periodic_timer`. Unknown ids are ignored.
    fn disarm_timer(&self, id: TimerId);

    // === Entropy & Debug ===

    /// Random 32-bit value (interrupt routing only, not cryptographic)
    fn random_u32(&self) -> u32;

    /// Write a debug message to the host console
    fn debug_write(&self, msg: &str);
}

/// HAL errors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HalError {
    /// Host refused to create a thread
    ThreadSpawnFailed,
    /// Host refused to arm a timer
    TimerUnavailable,
    /// Invalid argument (e.g. zero timer period)
    InvalidArgument,
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HalError::ThreadSpawnFailed => write!(f, "host thread creation failed"),
            HalError::TimerUnavailable => write!(f, "host timer unavailable"),
            HalError::InvalidArgument => write!(f, "invalid argument"),
        }
    }
}

impl std::error::Error for HalError {}
