//! Common types for the trace layer.

use serde::{Deserialize, Serialize};

/// Thread identifier (matches mcore-kernel's ThreadId)
pub type ThreadId = u64;

/// Logical core index
pub type CoreId = u32;

/// Event identifier (monotonic, unique within SysLog)
pub type EventId = u64;

/// Transition identifier (32-byte hash)
pub type TransitionId = [u8; 32];

/// Scheduling state of a thread.
///
/// ```text
/// Inception -> OnRunList <-> {WaitingOnNotify, Sleeping, SendBlocked, RecvBlocked}
///                  |                         |
///                  v                         v
///              Suspended                 Migrating -> OnRunList (any core)
///
/// OnRunList -> Dying -> Dead
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ThreadState {
    /// Created, not yet placed on any core
    Inception = 0,
    /// On a core's run list
    OnRunList = 1,
    /// Parked on a notify wait list
    WaitingOnNotify = 2,
    /// On the sleep timer queue
    Sleeping = 3,
    /// Waiting for space in a full ring
    SendBlocked = 4,
    /// Waiting for an item in an empty ring
    RecvBlocked = 5,
    /// In a migration inbox, owned by no core
    Migrating = 6,
    /// Removed from its run list by an administrative suspend
    Suspended = 7,
    /// Exit requested, being torn down by its core
    Dying = 8,
    /// Gone; its host thread has been released
    Dead = 9,
}

impl ThreadState {
    /// Convert from the raw state byte
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Inception),
            1 => Some(Self::OnRunList),
            2 => Some(Self::WaitingOnNotify),
            3 => Some(Self::Sleeping),
            4 => Some(Self::SendBlocked),
            5 => Some(Self::RecvBlocked),
            6 => Some(Self::Migrating),
            7 => Some(Self::Suspended),
            8 => Some(Self::Dying),
            9 => Some(Self::Dead),
            _ => None,
        }
    }

    /// True for the states in which a thread sits on a notify wait list
    pub fn is_blocked_on_notify(&self) -> bool {
        matches!(
            self,
            Self::WaitingOnNotify | Self::SendBlocked | Self::RecvBlocked
        )
    }

    /// True once the thread can never run again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Dead)
    }

    /// Whether `self -> next` is an edge of the thread state machine.
    pub fn can_transition_to(&self, next: ThreadState) -> bool {
        use ThreadState::*;
        match (*self, next) {
            (Inception, OnRunList) => true,
            (OnRunList, WaitingOnNotify | Sleeping | SendBlocked | RecvBlocked) => true,
            (OnRunList, Suspended | Dying) => true,
            (WaitingOnNotify | SendBlocked | RecvBlocked, OnRunList | Migrating) => true,
            (Sleeping, Migrating) => true,
            (Migrating, OnRunList) => true,
            (Suspended, OnRunList) => true,
            (Dying, Dead) => true,
            _ => false,
        }
    }
}
