//! Introspection over the shared kernel state
//!
//! - `collect()` - System-wide counters as a serializable snapshot
//! - `placement()` - Where every thread sits, for exclusivity checks

use serde::{Deserialize, Serialize};

use crate::invariants::Placement;
use crate::kernel::KernelShared;
use crate::types::CoreStats;

/// System-wide snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub uptime_nanos: u64,
    /// Threads not yet dead
    pub live_threads: usize,
    /// Threads on the timer queue
    pub sleeping: usize,
    /// Threads parked on a notify or ring
    pub blocked: usize,
    pub syslog_events: usize,
    pub transitions: usize,
    /// Per-core counters, by core index
    pub cores: Vec<CoreStats>,
}

impl SystemMetrics {
    /// Serialize to JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

pub(in crate::system) fn collect(kernel: &KernelShared) -> SystemMetrics {
    let blocked = kernel
        .all_notifies()
        .iter()
        .map(|n| n.waiter_ids().len())
        .sum();

    SystemMetrics {
        uptime_nanos: kernel.now(),
        live_threads: kernel.live_thread_count(),
        sleeping: kernel.timers.len(),
        blocked,
        syslog_events: kernel.with_syslog(|log| log.len()),
        transitions: kernel.with_transitions(|log| log.len()),
        cores: kernel.cores.iter().map(|c| c.snapshot()).collect(),
    }
}

pub(in crate::system) fn placement(kernel: &KernelShared) -> Placement {
    Placement {
        run_lists: kernel
            .cores
            .iter()
            .map(|c| (c.index, c.published_run_list()))
            .collect(),
        wait_lists: kernel
            .all_notifies()
            .iter()
            .map(|n| (n.handle(), n.waiter_ids()))
            .collect(),
        sleeping: kernel.timers.thread_ids(),
    }
}
