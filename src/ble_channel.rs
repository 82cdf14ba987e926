use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::thread::JoinHandle;

use log::{debug, info, warn};

use crate::command_worker::{run_worker, CommandQueue};
use crate::config::ChannelConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{ResourceError, TransportError};
use crate::event_log::{EventLog, LogEntry, LogKind};
use crate::gatt_service::ChannelHooks;
use crate::link_state::{LinkPhase, LinkState};
use crate::notify_pipeline::NotifyPipeline;
use crate::radio_stack::{GapEvent, RadioStack};

/// Stack bytes for the command worker thread, which parses JSON and runs
/// the collaborators.
const WORKER_STACK_BYTES: usize = 8 * 1024;
/// Stack bytes for the notify drain thread.
const DRAIN_STACK_BYTES: usize = 4 * 1024;

/// State shared between the public API, the worker and drain threads, and
/// the radio-stack callbacks.
pub(crate) struct ChannelShared {
    pub(crate) link: LinkState,
    pub(crate) log: EventLog,
    pub(crate) commands: CommandQueue,
    pub(crate) notifies: NotifyPipeline,
    started: AtomicBool,
    /// Held for the lifetime of a session so GAP events can restart
    /// advertising; cleared at stop to drop the stack reference.
    stack: StdMutex<Option<Arc<dyn RadioStack>>>,
}

impl ChannelShared {
    pub(crate) fn new() -> Self {
        Self {
            link: LinkState::new(),
            log: EventLog::new(),
            commands: CommandQueue::new(),
            notifies: NotifyPipeline::new(),
            started: AtomicBool::new(false),
            stack: StdMutex::new(None),
        }
    }

    pub(crate) fn notify_text(&self, message: &str) -> Result<(), TransportError> {
        self.notifies.push_message(&self.link, &self.log, message)
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Lifecycle reducer for GAP events. Runs on the stack's callback
    /// context and must not block.
    pub(crate) fn apply_gap_event(&self, event: GapEvent) {
        match event {
            GapEvent::Connected { conn } => {
                info!("🔗 Central connected, handle {}", conn);
                self.link.on_connect(conn);
                self.log
                    .append(LogKind::Connect, format!("Connected, handle {}", conn));
            }
            GapEvent::ConnectFailed { status } => {
                warn!("Connection attempt failed, status {}", status);
                self.log
                    .append(LogKind::Connect, format!("Connect failed, status {}", status));
                self.restart_advertising();
            }
            GapEvent::Disconnected { conn, reason } => {
                if self.link.on_disconnect() {
                    info!("🔗 Central {} disconnected, reason {}", conn, reason);
                    self.log
                        .append(LogKind::Disconnect, format!("Disconnected, reason {}", reason));
                    self.restart_advertising();
                } else {
                    debug!("Duplicate disconnect for handle {} ignored", conn);
                }
            }
            GapEvent::Subscribed { conn, attr, notify } => {
                if attr != self.link.tx_handle() {
                    debug!("Subscription change on foreign attribute {:#06x} ignored", attr);
                    return;
                }
                self.link.set_subscribed(notify);
                let text = if notify {
                    "Notifications enabled"
                } else {
                    "Notifications disabled"
                };
                info!("🔔 {} by central {}", text, conn);
                self.log.append(LogKind::Subscribe, text);
            }
            GapEvent::AdvertiseComplete { reason } => {
                debug!("Advertising completed, reason {}", reason);
                if !self.link.is_connected() {
                    self.restart_advertising();
                }
            }
        }
    }

    /// Self-heal: put the device back into a connectable state. No-op once
    /// the channel is stopped.
    fn restart_advertising(&self) {
        if !self.is_started() {
            return;
        }
        let stack = self
            .stack
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let Some(stack) = stack else { return };
        match stack.start_advertising() {
            Ok(()) => info!("📡 Advertising restarted"),
            Err(err) if err.is_advisory() => debug!("Advertising restart: {}", err),
            Err(err) => warn!("Advertising restart failed: {}", err),
        }
    }
}

struct ChannelRuntime {
    worker: JoinHandle<()>,
    drain: JoinHandle<()>,
}

/// BLE command-and-telemetry channel: one GATT service with a write (RX)
/// and a notify (TX) characteristic, a queued command worker, and a chunked
/// notification pipeline.
///
/// All methods take `&self`; the channel is meant to live in an `Arc` and
/// be shared across tasks.
pub struct BleChannel {
    stack: Arc<dyn RadioStack>,
    shared: Arc<ChannelShared>,
    runtime: StdMutex<Option<ChannelRuntime>>,
}

impl BleChannel {
    /// Build a channel over `stack`. Nothing is registered or advertised
    /// until [`start`](Self::start).
    pub fn new(stack: Arc<dyn RadioStack>) -> Self {
        Self {
            stack,
            shared: Arc::new(ChannelShared::new()),
            runtime: StdMutex::new(None),
        }
    }

    /// Bring the channel up: fresh diagnostics ring, service registration,
    /// worker and drain threads, then advertising. Starting an already
    /// running channel is a logged no-op. Advertising failure is not fatal;
    /// everything else rolls back before returning the error.
    pub fn start(&self, config: ChannelConfig) -> Result<(), ResourceError> {
        let mut runtime = self.runtime.lock().unwrap_or_else(|e| e.into_inner());
        if runtime.is_some() {
            info!("BLE channel already running, start ignored");
            return Ok(());
        }
        info!("🚀 BLE channel starting as '{}'", config.device_name);

        self.shared.link.clear();
        self.shared.commands.reset_for_start();
        self.shared.notifies.reset_for_start();
        self.shared.log.reset();
        self.shared.log.append(LogKind::Connect, "BLE service starting");

        *self.shared.stack.lock().unwrap_or_else(|e| e.into_inner()) = Some(self.stack.clone());

        let hooks = Arc::new(ChannelHooks::new(self.shared.clone()));
        let handles = match self.stack.bring_up(&config.device_name, hooks) {
            Ok(handles) => handles,
            Err(err) => {
                self.clear_stack();
                return Err(ResourceError::ServiceRegistrationFailed(err.to_string()));
            }
        };
        self.shared.link.set_tx_handle(handles.tx_handle);
        info!("GATT service registered, TX handle {:#06x}", handles.tx_handle);

        let dispatcher = Dispatcher::new(self.shared.clone(), &config);
        let worker = {
            let shared = self.shared.clone();
            std::thread::Builder::new()
                .name("ble-cmd".into())
                .stack_size(WORKER_STACK_BYTES)
                .spawn(move || run_worker(&shared.commands, &dispatcher))
        };
        let worker = match worker {
            Ok(handle) => handle,
            Err(err) => {
                self.stack.tear_down();
                self.clear_stack();
                return Err(ResourceError::TaskCreateFailed(format!("ble-cmd: {}", err)));
            }
        };

        let drain = {
            let shared = self.shared.clone();
            let stack = self.stack.clone();
            std::thread::Builder::new()
                .name("ble-notify".into())
                .stack_size(DRAIN_STACK_BYTES)
                .spawn(move || shared.notifies.run_drain(stack.as_ref(), &shared.log))
        };
        let drain = match drain {
            Ok(handle) => handle,
            Err(err) => {
                self.shared.commands.signal_shutdown();
                if worker.join().is_err() {
                    warn!("Command worker panicked during aborted start");
                }
                self.stack.tear_down();
                self.clear_stack();
                return Err(ResourceError::TaskCreateFailed(format!("ble-notify: {}", err)));
            }
        };

        self.shared.started.store(true, Ordering::SeqCst);
        match self.stack.start_advertising() {
            Ok(()) => info!("📡 Advertising as '{}'", config.device_name),
            Err(err) if err.is_advisory() => debug!("Advertising start: {}", err),
            Err(err) => warn!("Advertising failed to start: {}", err),
        }

        *runtime = Some(ChannelRuntime { worker, drain });
        Ok(())
    }

    /// Tear the channel down: stop advertising, drop any live link, stop
    /// both threads, purge the queues, release the stack. Safe without a
    /// prior start; GAP events arriving mid-stop are absorbed.
    pub fn stop(&self) {
        let mut runtime = self.runtime.lock().unwrap_or_else(|e| e.into_inner());
        let Some(rt) = runtime.take() else {
            debug!("BLE channel not running, stop ignored");
            return;
        };
        info!("🛑 BLE channel stopping");
        self.shared.started.store(false, Ordering::SeqCst);

        match self.stack.stop_advertising() {
            Ok(()) => {}
            Err(err) if err.is_advisory() => debug!("Advertising stop: {}", err),
            Err(err) => warn!("Advertising stop failed: {}", err),
        }
        if let Some(conn) = self.shared.link.conn_handle() {
            match self.stack.disconnect(conn) {
                Ok(()) => {}
                Err(err) if err.is_advisory() => debug!("Disconnect of handle {}: {}", conn, err),
                Err(err) => warn!("Disconnect of handle {} failed: {}", conn, err),
            }
        }

        self.shared.commands.signal_shutdown();
        if rt.worker.join().is_err() {
            warn!("Command worker panicked");
        }
        self.shared.notifies.request_drain_stop();
        if rt.drain.join().is_err() {
            warn!("Notify drain panicked");
        }

        self.shared.commands.purge();
        self.shared.notifies.purge();
        self.shared.link.clear();
        self.stack.tear_down();
        self.clear_stack();
        info!("✅ BLE channel stopped");
    }

    fn clear_stack(&self) {
        *self.shared.stack.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Queue `message` for delivery as ordered ≤20-byte notification chunks.
    ///
    /// Fails with [`TransportError::NotSubscribed`] unless a central is
    /// connected with notifications enabled, and with
    /// [`TransportError::QueueFull`] if the notify queue stays saturated;
    /// the whole message may then be retried.
    pub fn notify(&self, message: &str) -> Result<(), TransportError> {
        self.shared.notify_text(message)
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_started()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.link.is_connected()
    }

    /// Running without a central connected.
    pub fn is_advertising(&self) -> bool {
        self.shared.is_started() && !self.shared.link.is_connected()
    }

    pub fn phase(&self) -> LinkPhase {
        self.shared.link.phase(self.shared.is_started())
    }

    /// Copy of the stored diagnostic entries, oldest first, at most `max`.
    pub fn log_snapshot(&self, max: usize) -> Vec<LogEntry> {
        self.shared.log.snapshot(max)
    }

    /// Number of stored diagnostic entries.
    pub fn log_count(&self) -> usize {
        self.shared.log.count()
    }

    /// Diagnostics as the JSON document `{"logs": [...], "total_count": n}`.
    pub fn log_json(&self, max: usize) -> serde_json::Value {
        self.shared.log.to_json(max)
    }
}

impl Drop for BleChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio_stack::{ServiceHandles, StackError};
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    const TX_HANDLE: u16 = 0x002a;

    #[derive(Default)]
    struct MockStack {
        hooks: StdMutex<Option<Arc<ChannelHooks>>>,
        bring_ups: AtomicUsize,
        tear_downs: AtomicUsize,
        adv_starts: AtomicUsize,
        adv_stops: AtomicUsize,
        disconnects: AtomicUsize,
        sent: StdMutex<Vec<Vec<u8>>>,
        fail_bring_up: bool,
    }

    impl MockStack {
        fn hooks(&self) -> Arc<ChannelHooks> {
            self.hooks.lock().unwrap().clone().expect("bring_up ran")
        }

        fn count(counter: &AtomicUsize) -> usize {
            counter.load(Ordering::SeqCst)
        }
    }

    impl RadioStack for MockStack {
        fn bring_up(
            &self,
            _name: &str,
            hooks: Arc<ChannelHooks>,
        ) -> Result<ServiceHandles, StackError> {
            self.bring_ups.fetch_add(1, Ordering::SeqCst);
            if self.fail_bring_up {
                return Err(StackError::Failed(3));
            }
            *self.hooks.lock().unwrap() = Some(hooks);
            Ok(ServiceHandles { tx_handle: TX_HANDLE })
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

    fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !done() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn start_is_idempotent_and_stop_releases_the_stack() {
        let stack = Arc::new(MockStack::default());
        let channel = BleChannel::new(stack.clone());

        channel.start(ChannelConfig::default()).unwrap();
        assert!(channel.is_running());
        assert!(channel.is_advertising());
        assert_eq!(channel.phase(), LinkPhase::Advertising);
        assert_eq!(MockStack::count(&stack.bring_ups), 1);
        assert_eq!(MockStack::count(&stack.adv_starts), 1);

        channel.start(ChannelConfig::default()).unwrap();
        assert_eq!(MockStack::count(&stack.bring_ups), 1);

        channel.stop();
        assert!(!channel.is_running());
        assert_eq!(channel.phase(), LinkPhase::Stopped);
        assert_eq!(MockStack::count(&stack.adv_stops), 1);
        assert_eq!(MockStack::count(&stack.tear_downs), 1);

        channel.stop();
        assert_eq!(MockStack::count(&stack.tear_downs), 1);
    }

    #[test]
    fn bring_up_failure_rolls_back_and_allows_retry() {
        let stack = Arc::new(MockStack {
            fail_bring_up: true,
            ..Default::default()
        });
        let channel = BleChannel::new(stack.clone());

        let err = channel.start(ChannelConfig::default()).unwrap_err();
        assert!(matches!(err, ResourceError::ServiceRegistrationFailed(_)));
        assert!(!channel.is_running());
        assert_eq!(MockStack::count(&stack.adv_starts), 0);

        // The channel stays usable for another attempt.
        let _ = channel.start(ChannelConfig::default());
        assert_eq!(MockStack::count(&stack.bring_ups), 2);
    }

    #[test]
    fn gap_events_drive_the_phase_and_self_heal_advertising() {
        let stack = Arc::new(MockStack::default());
        let channel = BleChannel::new(stack.clone());
        channel.start(ChannelConfig::default()).unwrap();
        let hooks = stack.hooks();

        hooks.gap_event(GapEvent::Connected { conn: 1 });
        assert!(channel.is_connected());
        assert_eq!(channel.phase(), LinkPhase::Connected);
        assert!(!channel.is_advertising());

        hooks.gap_event(GapEvent::Subscribed {
            conn: 1,
            attr: TX_HANDLE,
            notify: true,
        });
        assert_eq!(channel.phase(), LinkPhase::Subscribed);

        channel.notify("ping").unwrap();
        wait_until("notify delivery", || stack.sent.lock().unwrap().len() == 1);
        assert_eq!(stack.sent.lock().unwrap()[0], b"ping");

        hooks.gap_event(GapEvent::Disconnected { conn: 1, reason: 0x13 });
        assert_eq!(channel.phase(), LinkPhase::Advertising);
        assert_eq!(MockStack::count(&stack.adv_starts), 2);

        // A duplicate disconnect neither logs nor re-advertises again.
        hooks.gap_event(GapEvent::Disconnected { conn: 1, reason: 0x13 });
        assert_eq!(MockStack::count(&stack.adv_starts), 2);
        let disconnects = channel
            .log_snapshot(usize::MAX)
            .iter()
            .filter(|e| e.kind == LogKind::Disconnect)
            .count();
        assert_eq!(disconnects, 1);

        channel.stop();
    }

    #[test]
    fn subscription_on_a_foreign_attribute_is_ignored() {
        let stack = Arc::new(MockStack::default());
        let channel = BleChannel::new(stack.clone());
        channel.start(ChannelConfig::default()).unwrap();
        let hooks = stack.hooks();

        hooks.gap_event(GapEvent::Connected { conn: 1 });
        hooks.gap_event(GapEvent::Subscribed {
            conn: 1,
            attr: TX_HANDLE + 1,
            notify: true,
        });
        assert_eq!(channel.phase(), LinkPhase::Connected);
        assert_eq!(channel.notify("x").unwrap_err(), TransportError::NotSubscribed);

        channel.stop();
    }

    #[test]
    fn late_events_after_stop_do_not_restart_advertising() {
        let stack = Arc::new(MockStack::default());
        let channel = BleChannel::new(stack.clone());
        channel.start(ChannelConfig::default()).unwrap();
        let hooks = stack.hooks();
        hooks.gap_event(GapEvent::Connected { conn: 1 });

        channel.stop();
        assert_eq!(MockStack::count(&stack.adv_starts), 1);
        assert_eq!(MockStack::count(&stack.disconnects), 1);

        hooks.gap_event(GapEvent::Disconnected { conn: 1, reason: 0x08 });
        hooks.gap_event(GapEvent::AdvertiseComplete { reason: 0 });
        assert_eq!(MockStack::count(&stack.adv_starts), 1);
    }

    #[test]
    fn restart_resets_the_diagnostic_ring() {
        let stack = Arc::new(MockStack::default());
        let channel = BleChannel::new(stack.clone());

        channel.start(ChannelConfig::default()).unwrap();
        let entries = channel.log_snapshot(10);
        assert_eq!(entries[0].message, "BLE service starting");
        stack.hooks().gap_event(GapEvent::Connected { conn: 1 });
        assert_eq!(channel.log_snapshot(10).len(), 2);

        channel.stop();
        channel.start(ChannelConfig::default()).unwrap();
        let entries = channel.log_snapshot(10);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "BLE service starting");
        channel.stop();
    }
}
