// Append-only event log.
//
// Every externally observable action a peer takes (learning or suspecting a
// member, resolving a client operation, applying a replica-side write) is
// recorded as an event. The harness driving the cluster consumes this log;
// integration tests assert against it.

use crate::common::Address;
use parking_lot::Mutex;
use serde::Serialize;

/// A single log record: who observed it and what happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    pub observer: Address,
    pub kind: EventKind,
}

/// The event vocabulary shared with the external harness.
///
/// KV events carry a `coordinator` flag distinguishing coordinator-side
/// resolutions from replica-side applications of the same transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum EventKind {
    NodeAdd {
        added: Address,
    },
    NodeRemove {
        removed: Address,
    },
    CreateSuccess {
        coordinator: bool,
        trans_id: u32,
        key: String,
        value: String,
    },
    CreateFail {
        coordinator: bool,
        trans_id: u32,
        key: String,
        value: String,
    },
    UpdateSuccess {
        coordinator: bool,
        trans_id: u32,
        key: String,
        value: String,
    },
    UpdateFail {
        coordinator: bool,
        trans_id: u32,
        key: String,
        value: String,
    },
    DeleteSuccess {
        coordinator: bool,
        trans_id: u32,
        key: String,
    },
    DeleteFail {
        coordinator: bool,
        trans_id: u32,
        key: String,
    },
    ReadSuccess {
        coordinator: bool,
        trans_id: u32,
        key: String,
        value: String,
    },
    ReadFail {
        coordinator: bool,
        trans_id: u32,
        key: String,
    },
}

/// Append-only sink for peer events.
pub trait EventLog: Send + Sync {
    fn append(&self, event: Event);
}

/// In-memory event log used by the simulation driver and the test suites.
#[derive(Default)]
pub struct MemoryEventLog {
    entries: Mutex<Vec<Event>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events in append order.
    pub fn events(&self) -> Vec<Event> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Count events satisfying a predicate.
    pub fn count_where<F>(&self, pred: F) -> usize
    where
        F: Fn(&Event) -> bool,
    {
        self.entries.lock().iter().filter(|e| pred(e)).count()
    }

    /// Serialize the log as one JSON object per line.
    pub fn to_json_lines(&self) -> String {
        let entries = self.entries.lock();
        let mut out = String::new();
        for event in entries.iter() {
            if let Ok(line) = serde_json::to_string(event) {
                out.push_str(&line);
                out.push('\n');
            }
        }
        out
    }
}

impl EventLog for MemoryEventLog {
    fn append(&self, event: Event) {
        self.entries.lock().push(event);
    }
}
