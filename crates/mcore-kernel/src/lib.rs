//! mcore Kernel - Multi-Core Scheduler Core
//!
//! A host-simulated multi-core scheduler: every simulated core is an
//! execution agent on its own host thread, and every schedulable thread is
//! backed by a host thread that only runs while its core has resumed it.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                         mcore-kernel                           │
//! │                                                                │
//! │  System ──▶ KernelShared ◀── CpuCore (one agent per core)      │
//! │               │   │   │          │                             │
//! │       registries  │   TimerQueue │ run list (agent-private)    │
//! │               SysLog/Transitions │ ICI + migration inboxes     │
//! │                                  │ syscall handlers            │
//! │                                                                │
//! │  UserContext ── sys_call ──▶ owning core's doorbell            │
//! │  IpcRing ── RingBuffer + recv/space Notify                     │
//! └────────────────────────────────────────────────────────────────┘
//!           │ uses
//!           ▼
//!   mcore-hal (host threads, events, clock, timers)
//!   mcore-primitives (lock-free inbox, ring slot state machine)
//!   mcore-trace (SysLog, TransitionLog, ThreadState)
//! ```
//!
//! # Module Organization
//!
//! - `types` - Identifiers and per-core statistics
//! - `config` - `SystemConfig` and its JSON form
//! - `error` - `KernelError` and the fatal path
//! - `thread` - Threads, processes and the run gate
//! - `notify` - Wait/signal objects with an accumulable data word
//! - `timer` - Delta-sorted sleep queue
//! - `ici` - Inter-core interrupts and migration
//! - `cpu` - The per-core run engine and syscall handlers
//! - `syscall` - Thread-side syscall entry (`UserContext`)
//! - `ipc_ring` - SPSC ring with blocking endpoints
//! - `invariants` - Runtime-checkable scheduler invariants
//! - `system` - Boot, spawn, shutdown and introspection

#![deny(unsafe_code)]

pub mod config;
mod cpu;
pub mod error;
pub mod ici;
pub mod invariants;
pub mod ipc_ring;
mod kernel;
pub mod notify;
pub mod syscall;
pub mod system;
pub mod thread;
pub mod timer;
pub mod types;

pub use config::{ConfigError, IrqRouting, SystemConfig, WakePolicy};
pub use cpu::{CoreStatus, EVENT_ICI, EVENT_IRQ, EVENT_SYSCALL};
pub use error::{fatal, KernelError};
pub use ici::IciMessage;
pub use invariants::{check_exclusivity, InvariantViolation, Placement};
pub use ipc_ring::{IpcRing, RingEntry};
pub use notify::{Notify, NotifyState, SignalOutcome, WaitOutcome};
pub use syscall::{Signaller, UserContext};
pub use system::{System, SystemMetrics};
pub use thread::{current_thread, Process, Thread};
pub use timer::{DeltaQueue, TimerQueue};
pub use types::{CoreId, CoreStats, NotifyHandle, ProcessId, ThreadId, ThreadState};

pub use mcore_abi::SysStatus;
pub use mcore_primitives::RingError;
pub use mcore_trace::{SysEvent, SysEventType, Transition};
