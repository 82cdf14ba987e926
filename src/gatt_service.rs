use std::sync::Arc;

use log::{debug, info, warn};
use uuid::{uuid, Uuid};

use crate::ble_channel::ChannelShared;
use crate::command_worker::InboundCommand;
use crate::dispatcher::REPLY_QUEUE_BUSY;
use crate::event_log::LogKind;
use crate::notify_pipeline::preview;
use crate::radio_stack::GapEvent;

/// Primary channel service.
pub const SERVICE_UUID: Uuid = uuid!("b9a40001-2f63-4e1b-8d7a-5c3e9f21d04a");
/// RX characteristic (WRITE): peer-to-device command payloads.
pub const RX_CHAR_UUID: Uuid = uuid!("b9a40002-2f63-4e1b-8d7a-5c3e9f21d04a");
/// TX characteristic (READ + NOTIFY): device-to-peer replies.
pub const TX_CHAR_UUID: Uuid = uuid!("b9a40003-2f63-4e1b-8d7a-5c3e9f21d04a");

/// Callback surface handed to the radio stack.
///
/// Every method returns quickly from the stack's own event context: nothing
/// here blocks on I/O or waits for queue space. Lifecycle events may restart
/// advertising inline, which the stack contract permits.
pub struct ChannelHooks {
    shared: Arc<ChannelShared>,
}

impl ChannelHooks {
    pub(crate) fn new(shared: Arc<ChannelShared>) -> Self {
        Self { shared }
    }

    /// GAP or GATT lifecycle event reported by the stack.
    pub fn gap_event(&self, event: GapEvent) {
        self.shared.apply_gap_event(event);
    }

    /// Write to the RX characteristic. The payload is copied (and truncated
    /// to the command length limit) before this returns; a full command
    /// queue drops the write and answers with a best-effort advisory.
    pub fn inbound_write(&self, payload: &[u8]) {
        if payload.is_empty() {
            debug!("Ignoring zero-length RX write");
            return;
        }
        let text = String::from_utf8_lossy(payload);
        self.shared.log.append(
            LogKind::Rx,
            format!("RX ({} bytes): {}", payload.len(), preview(&text)),
        );
        info!("📥 RX write of {} bytes", payload.len());

        let command = InboundCommand::from_write(payload);
        if self.shared.commands.try_push(command).is_err() {
            warn!("Command queue full, dropping {} byte write", payload.len());
            self.shared
                .notifies
                .push_advisory(&self.shared.link, &self.shared.log, REPLY_QUEUE_BUSY);
        }
    }

    /// Read of the TX characteristic: the most recently staged notify chunk,
    /// or nothing before the first notification of a session.
    pub fn outbound_read(&self) -> Option<Vec<u8>> {
        self.shared.notifies.staged()
    }
}
