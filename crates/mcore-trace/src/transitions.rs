//! Transition Log
//!
//! Records every thread state transition. Each entry links to the previous
//! one via a hash chain, so a dumped log can be checked for gaps or edits.
//!
//! Entries are appended by whichever core agent performed the transition,
//! so the sequence is the global order in which the kernel serialized them
//! (under its log lock), not necessarily wall-clock order across cores.

use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

use crate::types::{CoreId, ThreadId, ThreadState, TransitionId};

/// One recorded state transition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transition {
    /// Hash of this entry (contents + prev)
    pub id: TransitionId,
    /// Hash of the previous entry
    pub prev: TransitionId,
    /// Sequence number (monotonic)
    pub seq: u64,
    /// Timestamp (nanos since boot)
    pub timestamp: u64,
    pub thread: ThreadId,
    pub from: ThreadState,
    pub to: ThreadState,
    /// Core that owns the thread after the transition, if any
    pub core: Option<CoreId>,
}

/// Default maximum number of transitions to keep in memory
pub const MAX_TRANSITIONS: usize = 100000;

/// Hash-chained, bounded log of thread state transitions.
pub struct TransitionLog {
    entries: Vec<Transition>,
    next_seq: u64,
    last_hash: TransitionId,
    capacity: usize,
}

impl TransitionLog {
    pub fn new() -> Self {
        Self::with_capacity(MAX_TRANSITIONS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            next_seq: 0,
            last_hash: [0u8; 32],
            capacity,
        }
    }

    /// Append a transition. Returns its hash.
    pub fn record(
        &mut self,
        thread: ThreadId,
        from: ThreadState,
        to: ThreadState,
        core: Option<CoreId>,
        timestamp: u64,
    ) -> TransitionId {
        let entry = Transition {
            id: [0u8; 32],
            prev: self.last_hash,
            seq: self.next_seq,
            timestamp,
            thread,
            from,
            to,
            core,
        };
        let id = Self::compute_hash(&entry);
        let entry = Transition { id, ..entry };

        self.last_hash = id;
        self.next_seq += 1;
        self.entries.push(entry);

        self.trim_if_needed();
        id
    }

    /// FNV-1a over the entry's fields, expanded to 32 bytes.
    fn compute_hash(entry: &Transition) -> TransitionId {
        let mut hasher = Fnv::new();
        hasher.write(&entry.prev);
        hasher.write(&entry.seq.to_le_bytes());
        hasher.write(&entry.timestamp.to_le_bytes());
        hasher.write(&entry.thread.to_le_bytes());
        hasher.write(&[entry.from as u8, entry.to as u8]);
        match entry.core {
            Some(core) => {
                hasher.write(&[1]);
                hasher.write(&core.to_le_bytes());
            }
            None => hasher.write(&[0]),
        }
        hasher.finish32()
    }

    /// Get all retained transitions.
    pub fn entries(&self) -> &[Transition] {
        &self.entries
    }

    /// Transitions of one thread, oldest first.
    pub fn history_of(&self, thread: ThreadId) -> Vec<&Transition> {
        self.entries.iter().filter(|t| t.thread == thread).collect()
    }

    /// Hash of the most recent transition.
    pub fn head(&self) -> TransitionId {
        self.last_hash
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Verify the hash chain over the retained entries.
    ///
    /// The first retained entry's `prev` is trusted, since older entries
    /// may have been trimmed.
    pub fn verify_integrity(&self) -> bool {
        let Some(first) = self.entries.first() else {
            return true;
        };
        let mut expected_prev = first.prev;

        for entry in &self.entries {
            if entry.prev != expected_prev || Self::compute_hash(entry) != entry.id {
                return false;
            }
            expected_prev = entry.id;
        }

        expected_prev == self.last_hash
    }

    fn trim_if_needed(&mut self) {
        if self.entries.len() > self.capacity {
            let drain_count = self.entries.len() - self.capacity;
            self.entries.drain(0..drain_count);
        }
    }
}

impl Default for TransitionLog {
    fn default() -> Self {
        Self::new()
    }
}

/// FNV-1a hasher.
struct Fnv(u64);

impl Fnv {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    fn new() -> Self {
        Self(Self::OFFSET_BASIS)
    }

    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.0 ^= *byte as u64;
            self.0 = self.0.wrapping_mul(Self::PRIME);
        }
    }

    fn finish32(&self) -> [u8; 32] {
        let mut result = [0u8; 32];
        let mut h = self.0;
        for chunk in result.chunks_mut(8) {
            chunk.copy_from_slice(&h.to_le_bytes());
            h = h.wrapping_mul(Self::PRIME);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ThreadState::*;

    #[test]
    fn test_record_and_history() {
        let mut log = TransitionLog::new();
        log.record(1, Inception, OnRunList, Some(0), 10);
        log.record(2, Inception, OnRunList, Some(1), 11);
        log.record(1, OnRunList, Sleeping, None, 12);

        let history = log.history_of(1);
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].from, OnRunList);
        assert_eq!(history[1].to, Sleeping);
        assert_eq!(history[1].core, None);
        assert_eq!(log.entries().last().map(|t| t.seq), Some(2));
    }

    #[test]
    fn test_integrity_detects_tampering() {
        let mut log = TransitionLog::new();
        for i in 0..5 {
            log.record(i, Inception, OnRunList, Some(0), i * 100);
        }
        assert!(log.verify_integrity());

        log.entries[2].to = Dead;
        assert!(!log.verify_integrity());
    }

    #[test]
    fn test_integrity_survives_trimming() {
        let mut log = TransitionLog::with_capacity(3);
        for i in 0..10 {
            log.record(i, Migrating, OnRunList, Some(2), i);
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.entries()[0].seq, 7);
        assert!(log.verify_integrity());
    }

    #[test]
    fn test_hash_determinism() {
        let mut a = TransitionLog::new();
        let mut b = TransitionLog::new();
        for i in 0..4 {
            assert_eq!(
                a.record(i, OnRunList, Dying, Some(1), 5),
                b.record(i, OnRunList, Dying, Some(1), 5)
            );
        }
        assert_eq!(a.head(), b.head());

        // The owning core is part of the hash
        let mut c = TransitionLog::new();
        let mut d = TransitionLog::new();
        assert_ne!(
            c.record(1, Migrating, OnRunList, Some(0), 0),
            d.record(1, Migrating, OnRunList, Some(1), 0)
        );
    }
}
