//! Host thread handles shared by every HAL implementation.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::{HalError, ThreadEntry};

/// Affinity value meaning "not pinned"
const NO_AFFINITY: usize = usize::MAX;

static NEXT_HOST_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to a host thread that backs one schedulable thread.
///
/// Cloning the handle is cheap; all clones refer to the same host thread.
#[derive(Clone)]
pub struct HostThread {
    inner: Arc<HostThreadInner>,
}

struct HostThreadInner {
    id: u64,
    thread: thread::Thread,
    affinity: AtomicUsize,
}

impl HostThread {
    /// Host-unique id of this thread
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Name given at spawn time
    pub fn name(&self) -> Option<&str> {
        self.inner.thread.name()
    }

    /// Wake the thread if it is parked in [`park_current`].
    ///
    /// An unpark delivered before the thread parks is not lost.
    pub fn unpark(&self) {
        self.inner.thread.unpark();
    }

    /// Last core recorded by `HAL::set_affinity`
    pub fn affinity(&self) -> Option<usize> {
        match self.inner.affinity.load(Ordering::Relaxed) {
            NO_AFFINITY => None,
            core => Some(core),
        }
    }

    pub(crate) fn record_affinity(&self, core: usize) {
        self.inner.affinity.store(core, Ordering::Relaxed);
    }
}

impl core::fmt::Debug for HostThread {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HostThread")
            .field("id", &self.inner.id)
            .field("name", &self.inner.thread.name())
            .finish()
    }
}

/// Joinable handle to a core execution agent.
pub struct AgentHandle {
    join: JoinHandle<()>,
}

impl AgentHandle {
    /// Wait for the agent to return.
    ///
    /// Returns `false` if the agent panicked.
    pub fn join(self) -> bool {
        self.join.join().is_ok()
    }
}

/// Park the calling host thread until unparked.
///
/// May return spuriously; callers re-check their wake condition in a loop.
pub fn park_current() {
    thread::park();
}

pub(crate) fn spawn_host_thread(name: &str, entry: ThreadEntry) -> Result<HostThread, HalError> {
    let join = thread::Builder::new()
        .name(name.into())
        .spawn(entry)
        .map_err(|_| HalError::ThreadSpawnFailed)?;

    Ok(HostThread {
        inner: Arc::new(HostThreadInner {
            id: NEXT_HOST_ID.fetch_add(1, Ordering::Relaxed),
            thread: join.thread().clone(),
            affinity: AtomicUsize::new(NO_AFFINITY),
        }),
    })
}

pub(crate) fn spawn_agent_thread(name: &str, entry: ThreadEntry) -> Result<AgentHandle, HalError> {
    let join = thread::Builder::new()
        .name(name.into())
        .spawn(entry)
        .map_err(|_| HalError::ThreadSpawnFailed)?;
    Ok(AgentHandle { join })
}
