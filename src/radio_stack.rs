use std::fmt;
use std::sync::Arc;

use crate::gatt_service::ChannelHooks;

/// GAP-level events reported by the radio stack, one tagged union dispatched
/// through [`ChannelHooks::gap_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapEvent {
    /// A central completed the connection procedure.
    Connected { conn: u16 },
    /// The connection procedure failed before a link existed.
    ConnectFailed { status: i32 },
    /// The link dropped; `reason` is the stack's HCI reason code.
    Disconnected { conn: u16, reason: i32 },
    /// The CCCD of characteristic `attr` changed; `notify` is the new state.
    Subscribed { conn: u16, attr: u16, notify: bool },
    /// Advertising ended on its own (timeout or connect); `reason` is the
    /// stack's completion code.
    AdvertiseComplete { reason: i32 },
}

/// Outcome of a raw stack call that did not succeed.
///
/// `Advisory` covers the expected races of a self-healing lifecycle (start
/// advertising while already advertising, disconnect a link that is already
/// gone). Those are logged at debug severity and never escalate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackError {
    Advisory(i32),
    Failed(i32),
}

impl StackError {
    pub fn code(&self) -> i32 {
        match self {
            StackError::Advisory(code) | StackError::Failed(code) => *code,
        }
    }

    pub fn is_advisory(&self) -> bool {
        matches!(self, StackError::Advisory(_))
    }
}

impl fmt::Display for StackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackError::Advisory(code) => write!(f, "stack advisory (code {})", code),
            StackError::Failed(code) => write!(f, "stack call failed (code {})", code),
        }
    }
}

impl std::error::Error for StackError {}

/// Attribute handles assigned when the GATT service is registered.
#[derive(Debug, Clone, Copy)]
pub struct ServiceHandles {
    pub tx_handle: u16,
}

/// The seam between the channel core and the concrete BLE stack.
///
/// The device build implements this over NimBLE (`nimble_stack`); the test
/// suite uses a recording mock. Contract:
///
/// - `bring_up` registers the service/characteristics, installs `hooks` as
///   the event sink, and adopts `device_name` for advertising; it is paired
///   with `tear_down`.
/// - Events delivered through the hooks come from the stack's own callback
///   context; every hook entry point returns without blocking.
/// - Advertising control is callable from any context, including the stack's
///   own event callbacks.
/// - `notify_chunk` is invoked exclusively from the channel's drain context,
///   never concurrently with itself.
pub trait RadioStack: Send + Sync {
    fn bring_up(
        &self,
        device_name: &str,
        hooks: Arc<ChannelHooks>,
    ) -> Result<ServiceHandles, StackError>;

    fn tear_down(&self);

    fn start_advertising(&self) -> Result<(), StackError>;

    fn stop_advertising(&self) -> Result<(), StackError>;

    fn notify_chunk(&self, conn: u16, attr: u16, chunk: &[u8]) -> Result<(), StackError>;

    fn disconnect(&self, conn: u16) -> Result<(), StackError>;
}
