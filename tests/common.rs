//! Test fixtures shared by the integration suites: a recording radio stack
//! plus helpers that drive the GAP sequence a central would perform.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use wisp::{ChannelHooks, GapEvent, RadioStack, ServiceHandles, StackError};

/// Attribute identifier the recording stack reports for the TX
/// characteristic.
pub const TX_HANDLE: u16 = 0x002a;

/// In-memory [`RadioStack`]: records every call and hands the captured
/// hooks back to the test so it can inject GAP events.
#[derive(Default)]
pub struct RecordingStack {
    hooks: Mutex<Option<Arc<ChannelHooks>>>,
    pub sent: Mutex<Vec<Vec<u8>>>,
    pub bring_ups: AtomicUsize,
    pub tear_downs: AtomicUsize,
    pub adv_starts: AtomicUsize,
    pub adv_stops: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl RecordingStack {
    pub fn hooks(&self) -> Arc<ChannelHooks> {
        self.hooks
            .lock()
            .unwrap()
            .clone()
            .expect("bring_up captured the hooks")
    }

    /// Every notified chunk flattened into the byte stream a central
    /// would reassemble.
    pub fn sent_bytes(&self) -> Vec<u8> {
        self.sent.lock().unwrap().iter().flatten().copied().collect()
    }

    pub fn sent_string(&self) -> String {
        String::from_utf8(self.sent_bytes()).expect("notified chunks are UTF-8")
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

impl RadioStack for RecordingStack {
    fn bring_up(
        &self,
        _device_name: &str,
        hooks: Arc<ChannelHooks>,
    ) -> Result<ServiceHandles, StackError> {
        self.bring_ups.fetch_add(1, Ordering::SeqCst);
        *self.hooks.lock().unwrap() = Some(hooks);
        Ok(ServiceHandles {
            tx_handle: TX_HANDLE,
        })
    }

    fn tear_down(&self) {
        self.tear_downs.fetch_add(1, Ordering::SeqCst);
    }

    fn start_advertising(&self) -> Result<(), StackError> {
        self.adv_starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop_advertising(&self) -> Result<(), StackError> {
        self.adv_stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn notify_chunk(&self, _conn: u16, _attr: u16, chunk: &[u8]) -> Result<(), StackError> {
        self.sent.lock().unwrap().push(chunk.to_vec());
        Ok(())
    }

    fn disconnect(&self, _conn: u16) -> Result<(), StackError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Drive the GAP sequence a central performs right after `start`:
/// connect, then enable notifications on the TX characteristic.
pub fn connect_and_subscribe(stack: &RecordingStack) {
    let hooks = stack.hooks();
    hooks.gap_event(GapEvent::Connected { conn: 1 });
    hooks.gap_event(GapEvent::Subscribed {
        conn: 1,
        attr: TX_HANDLE,
        notify: true,
    });
}

/// Poll until `done` returns true or a two second deadline passes.
pub fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Like [`wait_for_stream`], then hold for a beat and re-check so a
/// spurious extra reply would still fail the test.
pub fn assert_stream_settles(stack: &RecordingStack, expected: &str) {
    wait_for_stream(stack, expected);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(stack.sent_string(), expected);
}

/// Wait until the reassembled notify stream equals `expected` exactly.
pub fn wait_for_stream(stack: &RecordingStack, expected: &str) {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let stream = stack.sent_string();
        if stream == expected {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "stream never reached expectation\n  expected: {:?}\n  actual:   {:?}",
            expected,
            stream
        );
        std::thread::sleep(Duration::from_millis(5));
    }
}
