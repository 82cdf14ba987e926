use core::cell::RefCell;
use std::time::Instant;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use serde::Serialize;
use serde_json::json;

/// Number of ring slots; the oldest entry is overwritten once full.
pub const LOG_CAPACITY: usize = 100;
/// Longest stored message; anything longer is truncated on append.
pub const LOG_MESSAGE_MAX: usize = 256;

/// Transport event classes recorded in the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogKind {
    Connect,
    Disconnect,
    Rx,
    Tx,
    Subscribe,
}

/// One immutable ring entry. Timestamps are milliseconds of monotonic time
/// since the ring was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    #[serde(rename = "type")]
    pub kind: LogKind,
    pub timestamp_ms: u64,
    pub message: String,
}

struct RingInner {
    slots: Vec<LogEntry>,
    /// Next slot to write; equals `slots.len()` until the ring wraps.
    next: usize,
}

/// Fixed-capacity diagnostic log of transport events.
///
/// Append and snapshot both run under one short critical section so the
/// radio-stack callback context, the worker, and API callers can all touch
/// the ring without extra coordination.
pub struct EventLog {
    inner: Mutex<CriticalSectionRawMutex, RefCell<RingInner>>,
    epoch: Instant,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(RingInner {
                slots: Vec::with_capacity(LOG_CAPACITY),
                next: 0,
            })),
            epoch: Instant::now(),
        }
    }

    /// Milliseconds since this ring was created.
    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Record one event, truncating the message to [`LOG_MESSAGE_MAX`] and
    /// overwriting the oldest slot once the ring is full.
    pub fn append(&self, kind: LogKind, message: impl Into<String>) {
        let mut message = message.into();
        truncate_utf8(&mut message, LOG_MESSAGE_MAX);
        let entry = LogEntry {
            kind,
            timestamp_ms: self.now_ms(),
            message,
        };
        self.inner.lock(|cell| {
            let mut ring = cell.borrow_mut();
            if ring.slots.len() < LOG_CAPACITY {
                ring.slots.push(entry);
                ring.next = ring.slots.len() % LOG_CAPACITY;
            } else {
                let at = ring.next;
                ring.slots[at] = entry;
                ring.next = (at + 1) % LOG_CAPACITY;
            }
        });
    }

    /// Copy up to `min(count, max)` entries, oldest to newest. The critical
    /// section is held only for the duration of the copy.
    pub fn snapshot(&self, max: usize) -> Vec<LogEntry> {
        self.inner.lock(|cell| {
            let ring = cell.borrow();
            let count = ring.slots.len();
            let n = count.min(max);
            let oldest = if count < LOG_CAPACITY { 0 } else { ring.next };
            (0..n)
                .map(|i| ring.slots[(oldest + i) % count.max(1)].clone())
                .collect()
        })
    }

    /// Number of entries currently stored.
    pub fn count(&self) -> usize {
        self.inner.lock(|cell| cell.borrow().slots.len())
    }

    /// Drop every entry. Used when the channel starts a fresh session.
    pub fn reset(&self) {
        self.inner.lock(|cell| {
            let mut ring = cell.borrow_mut();
            ring.slots.clear();
            ring.next = 0;
        });
    }

    /// Render a snapshot as the diagnostic JSON document
    /// `{"logs": [...], "total_count": n}`.
    pub fn to_json(&self, max: usize) -> serde_json::Value {
        let entries = self.snapshot(max);
        json!({
            "logs": entries,
            "total_count": self.count(),
        })
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Truncate at a UTF-8 character boundary at or below `max` bytes.
fn truncate_utf8(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}
