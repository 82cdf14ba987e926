use core::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;

// Same parking requirement as the command worker: the device build must
// not busy-poll inside a FreeRTOS task.
#[cfg(feature = "esp32")]
use esp_idf_svc::hal::task::block_on;
#[cfg(not(feature = "esp32"))]
use embassy_futures::block_on;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::{Channel, TrySendError};
use embassy_time::{with_timeout, Duration};
use log::{debug, warn};

use crate::error::TransportError;
use crate::event_log::{EventLog, LogKind};
use crate::link_state::LinkState;
use crate::radio_stack::RadioStack;

/// Chunk payload limit, conservative under the legacy 23-byte minimum MTU.
pub const NOTIFY_CHUNK_MAX: usize = 20;
/// Depth of the notification queue.
pub const NOTIFY_QUEUE_DEPTH: usize = 10;
/// TX scratch capacity; reads of the TX characteristic echo this buffer.
pub const TX_SCRATCH_CAP: usize = 512;
/// Bytes of a message quoted in the Tx log entry.
const TX_PREVIEW_MAX: usize = 80;

/// Bounded wait for queue space, per chunk, on the producer side.
const ENQUEUE_WAIT: Duration = Duration::from_millis(100);
/// Drain receive timeout; also bounds how long `stop()` waits for the
/// drain thread to notice the shutdown flag.
const DRAIN_POLL: Duration = Duration::from_millis(10);

/// One queued chunk. Owns its bytes; dropped on every path after the send
/// attempt, successful or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NotifyWorkItem {
    pub(crate) conn: u16,
    pub(crate) attr: u16,
    pub(crate) chunk: Vec<u8>,
}

/// Producer/consumer pipeline between `notify()` callers and the single
/// drain context that may touch the raw notify primitive.
pub(crate) struct NotifyPipeline {
    queue: Channel<CriticalSectionRawMutex, NotifyWorkItem, NOTIFY_QUEUE_DEPTH>,
    /// Serializes whole-message enqueue so concurrent callers cannot
    /// interleave chunks.
    gate: StdMutex<()>,
    scratch: Mutex<CriticalSectionRawMutex, RefCell<Vec<u8>>>,
    drain_stop: AtomicBool,
}

impl NotifyPipeline {
    pub(crate) fn new() -> Self {
        Self {
            queue: Channel::new(),
            gate: StdMutex::new(()),
            scratch: Mutex::new(RefCell::new(Vec::with_capacity(NOTIFY_CHUNK_MAX))),
            drain_stop: AtomicBool::new(false),
        }
    }

    /// Split `message` into ordered ≤20-byte chunks and enqueue them all.
    ///
    /// Fails with `NotSubscribed` before any work is queued. A full queue
    /// gets one bounded wait per chunk; if space still does not open up the
    /// call fails with `QueueFull` and the caller may retry the entire
    /// message. Must not be called from the stack callback context.
    pub(crate) fn push_message(
        &self,
        link: &LinkState,
        log: &EventLog,
        message: &str,
    ) -> Result<(), TransportError> {
        let (conn, attr) = link.notify_target().ok_or(TransportError::NotSubscribed)?;
        if message.is_empty() {
            return Ok(());
        }

        let _gate = self.gate.lock().unwrap_or_else(|e| e.into_inner());
        log.append(
            LogKind::Tx,
            format!("TX ({} bytes): {}", message.len(), preview(message)),
        );

        for chunk in message.as_bytes().chunks(NOTIFY_CHUNK_MAX) {
            let item = NotifyWorkItem {
                conn,
                attr,
                chunk: chunk.to_vec(),
            };
            if let Err(TrySendError::Full(item)) = self.queue.try_send(item) {
                if block_on(with_timeout(ENQUEUE_WAIT, self.queue.send(item))).is_err() {
                    warn!("Notify queue full, dropping remainder of {} byte message", message.len());
                    return Err(TransportError::QueueFull);
                }
            }
        }
        Ok(())
    }

    /// Best-effort single notification from the stack callback context
    /// ("Queue busy" and friends). Never blocks: skips entirely when the
    /// producer gate is contended and stops at the first full-queue chunk.
    pub(crate) fn push_advisory(&self, link: &LinkState, log: &EventLog, message: &str) {
        let Some((conn, attr)) = link.notify_target() else {
            return;
        };
        let Ok(_gate) = self.gate.try_lock() else {
            debug!("Advisory notification skipped, producer gate contended");
            return;
        };
        log.append(
            LogKind::Tx,
            format!("TX ({} bytes): {}", message.len(), preview(message)),
        );
        for chunk in message.as_bytes().chunks(NOTIFY_CHUNK_MAX) {
            let item = NotifyWorkItem {
                conn,
                attr,
                chunk: chunk.to_vec(),
            };
            if self.queue.try_send(item).is_err() {
                debug!("Advisory notification dropped, queue full");
                break;
            }
        }
    }

    /// Drain loop body. Runs on the dedicated notify thread, the only
    /// context allowed to call [`RadioStack::notify_chunk`]. One item per
    /// iteration; the short receive timeout keeps the stack's own event
    /// processing responsive and bounds shutdown latency.
    pub(crate) fn run_drain(&self, stack: &dyn RadioStack, log: &EventLog) {
        loop {
            if self.drain_stop.load(Ordering::SeqCst) {
                break;
            }
            match block_on(with_timeout(DRAIN_POLL, self.queue.receive())) {
                Ok(item) => self.deliver(stack, log, item),
                Err(_) => continue,
            }
        }
        debug!("Notify drain loop exited");
    }

    fn deliver(&self, stack: &dyn RadioStack, log: &EventLog, item: NotifyWorkItem) {
        if let Err(err) = self.stage_chunk(&item.chunk) {
            warn!("Dropping notification chunk: {}", err);
            return;
        }
        match stack.notify_chunk(item.conn, item.attr, &item.chunk) {
            Ok(()) => {}
            Err(err) if err.is_advisory() => {
                debug!("Notify advisory from stack: {}", err);
            }
            Err(err) => {
                warn!("Notify failed, chunk dropped: {}", err);
                log.append(LogKind::Tx, format!("TX chunk dropped: {}", err));
            }
        }
    }

    /// Copy one chunk into the TX scratch so characteristic reads return
    /// the in-flight value. Critical section released before any I/O.
    fn stage_chunk(&self, chunk: &[u8]) -> Result<(), TransportError> {
        if chunk.len() > TX_SCRATCH_CAP {
            return Err(TransportError::ChunkTooLarge(chunk.len()));
        }
        self.scratch.lock(|cell| {
            let mut scratch = cell.borrow_mut();
            scratch.clear();
            scratch.extend_from_slice(chunk);
        });
        Ok(())
    }

    /// Most recently staged chunk, for TX characteristic reads.
    pub(crate) fn staged(&self) -> Option<Vec<u8>> {
        self.scratch.lock(|cell| {
            let scratch = cell.borrow();
            if scratch.is_empty() {
                None
            } else {
                Some(scratch.clone())
            }
        })
    }

    /// Clear shutdown state and stale work before a (re)start.
    pub(crate) fn reset_for_start(&self) {
        self.drain_stop.store(false, Ordering::SeqCst);
        self.purge();
        self.scratch.lock(|cell| cell.borrow_mut().clear());
    }

    /// Ask the drain loop to exit; it notices within one receive timeout.
    pub(crate) fn request_drain_stop(&self) {
        self.drain_stop.store(true, Ordering::SeqCst);
    }

    /// Discard queued work items.
    pub(crate) fn purge(&self) {
        while self.queue.try_receive().is_ok() {}
    }

    #[cfg(test)]
    pub(crate) fn try_pop(&self) -> Option<NotifyWorkItem> {
        self.queue.try_receive().ok()
    }

    #[cfg(test)]
    pub(crate) fn queued(&self) -> usize {
        self.queue.len()
    }
}

pub(crate) fn preview(message: &str) -> &str {
    let mut end = TX_PREVIEW_MAX.min(message.len());
    while end > 0 && !message.is_char_boundary(end) {
        end -= 1;
    }
    &message[..end]
}
