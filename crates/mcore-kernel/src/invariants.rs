//! Runtime-checkable scheduler invariants
//!
//! These are used for:
//! 1. Assertion checking after every agent step in debug builds
//! 2. Whole-system checks in integration tests
//!
//! # Invariants
//!
//! 1. **Idle Presence**: Every run list holds its core's idle thread exactly once
//! 2. **Idle Yields**: The idle thread is at the head only when it is alone
//! 3. **Current Is Head**: The core's current thread is the run-list head
//! 4. **Resident State**: Every non-idle resident is OnRunList and owned by the core
//! 5. **No Duplicates**: No thread appears twice in one run list
//! 6. **Exclusive Placement**: A thread is on at most one of {a run list, a
//!    notify wait list, the timer queue}

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use crate::thread::Thread;
use crate::types::{CoreId, NotifyHandle, ThreadId, ThreadState};

/// An invariant violation with details
#[derive(Clone, Debug)]
pub struct InvariantViolation {
    /// Name of the violated invariant
    pub invariant: &'static str,
    /// Description of what went wrong
    pub description: String,
}

/// Where every blocked or runnable thread currently sits
#[derive(Clone, Debug, Default)]
pub struct Placement {
    /// Published run list of each core, head first
    pub run_lists: Vec<(CoreId, Vec<ThreadId>)>,
    /// Parked waiters of each notify
    pub wait_lists: Vec<(NotifyHandle, Vec<ThreadId>)>,
    /// Timer queue contents in expiry order
    pub sleeping: Vec<ThreadId>,
}

/// Check invariants 1-5 on one core's run list.
///
/// Returns a list of violations (empty if all invariants hold).
pub fn check_core(
    core: CoreId,
    run_list: &VecDeque<Arc<Thread>>,
    current: ThreadId,
) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    let idle_count = run_list.iter().filter(|t| t.is_idle()).count();
    if idle_count != 1 {
        violations.push(InvariantViolation {
            invariant: "idle_presence",
            description: format!("core {} run list holds {} idle threads", core, idle_count),
        });
    }

    match run_list.front() {
        None => violations.push(InvariantViolation {
            invariant: "idle_presence",
            description: format!("core {} run list is empty", core),
        }),
        Some(head) => {
            if head.is_idle() && run_list.len() > 1 {
                violations.push(InvariantViolation {
                    invariant: "idle_yields",
                    description: format!(
                        "core {} runs idle with {} threads ready",
                        core,
                        run_list.len() - 1
                    ),
                });
            }
            if head.id() != current {
                violations.push(InvariantViolation {
                    invariant: "current_is_head",
                    description: format!(
                        "core {} current is {} but head is {}",
                        core,
                        current,
                        head.id()
                    ),
                });
            }
        }
    }

    let mut seen = BTreeMap::new();
    for thread in run_list {
        if seen.insert(thread.id(), ()).is_some() {
            violations.push(InvariantViolation {
                invariant: "no_duplicates",
                description: format!("thread {} appears twice on core {}", thread.id(), core),
            });
        }
        if thread.is_idle() {
            continue;
        }
        if thread.state() != ThreadState::OnRunList {
            violations.push(InvariantViolation {
                invariant: "resident_state",
                description: format!(
                    "thread {} on core {} run list is {:?}",
                    thread.id(),
                    core,
                    thread.state()
                ),
            });
        }
        if thread.owner() != Some(core) {
            violations.push(InvariantViolation {
                invariant: "resident_state",
                description: format!(
                    "thread {} on core {} run list is owned by {:?}",
                    thread.id(),
                    core,
                    thread.owner()
                ),
            });
        }
    }

    violations
}

/// Invariant 6: run-list / wait-list / timer-queue exclusivity
pub fn check_exclusivity(placement: &Placement) -> Vec<InvariantViolation> {
    let mut locations: BTreeMap<ThreadId, Vec<String>> = BTreeMap::new();

    for (core, ids) in &placement.run_lists {
        for id in ids {
            locations
                .entry(*id)
                .or_default()
                .push(format!("run list of core {}", core));
        }
    }
    for (handle, ids) in &placement.wait_lists {
        for id in ids {
            locations
                .entry(*id)
                .or_default()
                .push(format!("wait list of notify {}", handle.0));
        }
    }
    for id in &placement.sleeping {
        locations
            .entry(*id)
            .or_default()
            .push(String::from("timer queue"));
    }

    locations
        .into_iter()
        .filter(|(_, places)| places.len() > 1)
        .map(|(id, places)| InvariantViolation {
            invariant: "exclusive_placement",
            description: format!("thread {} is on {}", id, places.join(" and ")),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::Process;
    use crate::types::ProcessId;

    fn process() -> Arc<Process> {
        Arc::new(Process {
            id: ProcessId(1),
            name: String::from("test"),
        })
    }

    fn resident(id: ThreadId, core: CoreId) -> Arc<Thread> {
        let thread = Thread::new(id, "t", process(), 0);
        thread.store_state(ThreadState::OnRunList);
        thread.set_owner(Some(core));
        thread
    }

    #[test]
    fn test_healthy_run_list() {
        let idle = Thread::new_idle(100, 0, process());
        let list: VecDeque<_> = vec![resident(1, 0), resident(2, 0), idle].into();
        assert!(check_core(0, &list, 1).is_empty());
    }

    #[test]
    fn test_idle_only_run_list() {
        let idle = Thread::new_idle(100, 0, process());
        let list: VecDeque<_> = vec![idle].into();
        assert!(check_core(0, &list, 100).is_empty());
    }

    #[test]
    fn test_missing_idle_detected() {
        let list: VecDeque<_> = vec![resident(1, 0)].into();
        let violations = check_core(0, &list, 1);
        assert!(violations.iter().any(|v| v.invariant == "idle_presence"));
    }

    #[test]
    fn test_idle_at_head_with_ready_threads() {
        let idle = Thread::new_idle(100, 0, process());
        let list: VecDeque<_> = vec![idle, resident(1, 0)].into();
        let violations = check_core(0, &list, 100);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].invariant, "idle_yields");
    }

    #[test]
    fn test_foreign_resident_detected() {
        let idle = Thread::new_idle(100, 0, process());
        let list: VecDeque<_> = vec![resident(1, 3), idle].into();
        let violations = check_core(0, &list, 1);
        assert!(violations.iter().any(|v| v.invariant == "resident_state"));
    }

    #[test]
    fn test_duplicate_detected() {
        let idle = Thread::new_idle(100, 0, process());
        let t = resident(1, 0);
        let list: VecDeque<_> = vec![t.clone(), t, idle].into();
        let violations = check_core(0, &list, 1);
        assert!(violations.iter().any(|v| v.invariant == "no_duplicates"));
    }

    #[test]
    fn test_exclusivity() {
        let mut placement = Placement {
            run_lists: vec![(0, vec![1, 100]), (1, vec![2, 101])],
            wait_lists: vec![(NotifyHandle(1), vec![3])],
            sleeping: vec![4],
        };
        assert!(check_exclusivity(&placement).is_empty());

        placement.sleeping.push(2);
        let violations = check_exclusivity(&placement);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].description.contains("thread 2"));
    }
}
