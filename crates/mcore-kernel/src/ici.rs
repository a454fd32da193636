//! Inter-core interrupts and thread migration.
//!
//! Both travel through lock-free per-core inboxes (`mcore_primitives::Inbox`).
//! A migration is two pushes: the thread itself onto the target's migration
//! inbox, then an `ICI_MIGRATED_THREAD` message onto its ICI inbox. The
//! target drains both when it handles the ICI.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use mcore_abi::ici::{self, ICI_MIGRATED_THREAD};

use crate::cpu::EVENT_ICI;
use crate::kernel::KernelShared;
use crate::thread::Thread;
use crate::types::{CoreId, ThreadState};

/// One inter-core interrupt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IciMessage {
    pub code: u32,
    pub payload: u64,
    /// Sending core, `None` for the kernel front end
    pub from: Option<CoreId>,
}

impl IciMessage {
    pub fn new(code: u32, payload: u64, from: Option<CoreId>) -> Self {
        Self {
            code,
            payload,
            from,
        }
    }

    pub fn name(&self) -> &'static str {
        ici::name(self.code)
    }
}

impl KernelShared {
    /// Queue `msg` on `target` and ring its doorbell.
    ///
    /// A full inbox means the node arena is exhausted, which is fatal.
    pub(crate) fn send_ici(&self, target: CoreId, msg: IciMessage) {
        let Some(core) = self.core(target) else {
            self.fatal(&format!("ICI {} sent to missing core {}", msg.name(), target));
        };
        if core.ici.push(msg).is_err() {
            self.fatal(&format!("core {}: ICI inbox exhausted", target));
        }
        core.doorbell.signal(EVENT_ICI);
        log::trace!("ICI {} ({:#x}) -> core {}", msg.name(), msg.payload, target);
    }

    /// Hand `thread` to `target`.
    ///
    /// The thread must already be off every run list, wait list and the
    /// timer queue, in `Migrating` (or `Inception` for a new thread).
    pub(crate) fn migrate(&self, thread: Arc<Thread>, target: CoreId, from: Option<CoreId>) {
        debug_assert!(matches!(
            thread.state(),
            ThreadState::Migrating | ThreadState::Inception
        ));
        let Some(core) = self.core(target) else {
            self.fatal(&format!("thread {} migrated to missing core {}", thread.id(), target));
        };

        thread.set_owner(None);
        let id = thread.id();
        if core.migrations.push(thread).is_err() {
            self.fatal(&format!("core {}: migration inbox exhausted", target));
        }
        if let Some(source) = from.and_then(|c| self.core(c)) {
            source.counters.migrations_out.fetch_add(1, Ordering::Relaxed);
        }
        log::debug!("thread {} migrating {:?} -> core {}", id, from, target);

        self.send_ici(target, IciMessage::new(ICI_MIGRATED_THREAD, id, from));
    }
}
