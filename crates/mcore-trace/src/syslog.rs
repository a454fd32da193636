//! System Event Log (SysLog)
//!
//! Records all syscalls (request + response) for audit trail.
//! This is separate from the TransitionLog - SysLog records what threads
//! asked for, the TransitionLog records what the scheduler did about it.

use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

use crate::types::{CoreId, EventId, ThreadId};

/// A system event (syscall request or response).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SysEvent {
    /// Unique event ID (monotonic)
    pub id: EventId,
    /// Thread that made the syscall
    pub thread: ThreadId,
    /// Core whose agent handled the syscall
    pub core: CoreId,
    /// Timestamp (nanos since boot)
    pub timestamp: u64,
    /// Event type (request or response)
    pub event_type: SysEventType,
}

/// Type of system event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SysEventType {
    /// Syscall request from a thread
    Request {
        /// Syscall number
        syscall_num: u32,
        /// Syscall arguments
        args: [u64; 2],
    },
    /// Syscall response to a thread
    Response {
        /// ID of the request this responds to
        request_id: EventId,
        /// Status word stored into the call slot
        status: u32,
        /// Result value stored into the call slot
        value: u64,
    },
}

/// Default maximum number of events to keep in memory
pub const MAX_SYSLOG_EVENTS: usize = 10000;

/// System event log for auditing.
///
/// Events are append-only with monotonic IDs. Once `capacity` is exceeded
/// the oldest events are discarded; IDs keep counting.
pub struct SysLog {
    /// Event entries (append-only)
    events: Vec<SysEvent>,
    /// Next event ID to assign
    next_id: EventId,
    capacity: usize,
}

impl SysLog {
    /// Create a new empty SysLog.
    pub fn new() -> Self {
        Self::with_capacity(MAX_SYSLOG_EVENTS)
    }

    /// Create a SysLog that keeps at most `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::new(),
            next_id: 0,
            capacity,
        }
    }

    /// Log a syscall request.
    ///
    /// Returns the event ID for correlating with the response.
    pub fn log_request(
        &mut self,
        thread: ThreadId,
        core: CoreId,
        syscall_num: u32,
        args: [u64; 2],
        timestamp: u64,
    ) -> EventId {
        self.push(
            thread,
            core,
            timestamp,
            SysEventType::Request { syscall_num, args },
        )
    }

    /// Log a syscall response.
    pub fn log_response(
        &mut self,
        thread: ThreadId,
        core: CoreId,
        request_id: EventId,
        status: u32,
        value: u64,
        timestamp: u64,
    ) {
        self.push(
            thread,
            core,
            timestamp,
            SysEventType::Response {
                request_id,
                status,
                value,
            },
        );
    }

    fn push(
        &mut self,
        thread: ThreadId,
        core: CoreId,
        timestamp: u64,
        event_type: SysEventType,
    ) -> EventId {
        let id = self.next_id;
        self.next_id += 1;

        self.events.push(SysEvent {
            id,
            thread,
            core,
            timestamp,
            event_type,
        });

        self.trim_if_needed();
        id
    }

    /// Get all events.
    pub fn events(&self) -> &[SysEvent] {
        &self.events
    }

    /// Requests issued by one thread, oldest first.
    pub fn requests_of(&self, thread: ThreadId) -> Vec<&SysEvent> {
        self.events
            .iter()
            .filter(|e| e.thread == thread && matches!(e.event_type, SysEventType::Request { .. }))
            .collect()
    }

    /// Get the number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Get the next event ID.
    pub fn next_id(&self) -> EventId {
        self.next_id
    }

    /// Trim old events if exceeding max capacity.
    fn trim_if_needed(&mut self) {
        if self.events.len() > self.capacity {
            let drain_count = self.events.len() - self.capacity;
            self.events.drain(0..drain_count);
        }
    }
}

impl Default for SysLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syslog_creation() {
        let log = SysLog::new();
        assert!(log.is_empty());
        assert_eq!(log.len(), 0);
        assert_eq!(log.next_id(), 0);
    }

    #[test]
    fn test_syslog_request_response() {
        let mut log = SysLog::new();

        let req_id = log.log_request(1, 2, 0x02, [5, 0b1010], 1000);
        assert_eq!(req_id, 0);

        log.log_response(1, 2, req_id, 0, 0b1010, 1100);
        assert_eq!(log.len(), 2);

        let events = log.events();
        assert_eq!(events[0].core, 2);
        assert_eq!(
            events[0].event_type,
            SysEventType::Request {
                syscall_num: 0x02,
                args: [5, 0b1010]
            }
        );
        assert_eq!(
            events[1].event_type,
            SysEventType::Response {
                request_id: 0,
                status: 0,
                value: 0b1010
            }
        );
    }

    #[test]
    fn test_syslog_trims_oldest() {
        let mut log = SysLog::with_capacity(4);
        for i in 0..10 {
            log.log_request(i, 0, 4, [0, 0], 0);
        }
        assert_eq!(log.len(), 4);
        assert_eq!(log.events()[0].id, 6);
        assert_eq!(log.next_id(), 10);
    }

    #[test]
    fn test_requests_of_filters_thread() {
        let mut log = SysLog::new();
        let req = log.log_request(1, 0, 4, [10, 0], 0);
        log.log_response(1, 0, req, 0, 0, 1);
        log.log_request(2, 0, 1, [0, 0], 2);

        assert_eq!(log.requests_of(1).len(), 1);
        assert_eq!(log.requests_of(2).len(), 1);
        assert!(log.requests_of(3).is_empty());
    }

    #[test]
    fn test_event_serializes() {
        let mut log = SysLog::new();
        log.log_request(9, 1, 3, [4, 0], 55);
        let json = serde_json::to_string(&log.events()[0]).unwrap();
        assert!(json.contains("\"thread\":9"));
        assert!(json.contains("Request"));
    }
}
