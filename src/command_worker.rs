// On device this must park the task instead of busy-polling, or the idle
// task starves and trips the task watchdog.
#[cfg(feature = "esp32")]
use esp_idf_svc::hal::task::block_on;
#[cfg(not(feature = "esp32"))]
use embassy_futures::block_on;
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use embassy_sync::signal::Signal;
use log::debug;
use serde_json::Value;

use crate::dispatcher::Dispatcher;
use crate::error::ProtocolError;

/// Longest accepted inbound command; extra bytes are dropped by the
/// truncating copy in the write callback.
pub const CMD_MAX_LEN: usize = 255;
/// Depth of the command queue.
pub const CMD_QUEUE_DEPTH: usize = 6;

/// One raw inbound write, owned by the queue until the worker consumes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InboundCommand {
    pub(crate) payload: Vec<u8>,
}

impl InboundCommand {
    /// Truncating copy of the characteristic write.
    pub(crate) fn from_write(data: &[u8]) -> Self {
        let len = data.len().min(CMD_MAX_LEN);
        Self {
            payload: data[..len].to_vec(),
        }
    }
}

/// A parsed, classified command.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum DeviceCommand {
    Scan,
    ConnectWifi {
        ssid: String,
        password: String,
        token: String,
        is_production: bool,
    },
    ReadSensors,
    /// Device-command form: the payload is forwarded verbatim.
    GenericAction { raw: String },
}

/// Bounded handoff between the write callback and the worker, plus the
/// shutdown signal that makes `stop()` deterministic.
pub(crate) struct CommandQueue {
    queue: Channel<CriticalSectionRawMutex, InboundCommand, CMD_QUEUE_DEPTH>,
    shutdown: Signal<CriticalSectionRawMutex, ()>,
}

impl CommandQueue {
    pub(crate) fn new() -> Self {
        Self {
            queue: Channel::new(),
            shutdown: Signal::new(),
        }
    }

    /// Non-blocking enqueue for the write callback. Returns the command
    /// back on a full queue so the caller can apply the drop policy.
    pub(crate) fn try_push(&self, cmd: InboundCommand) -> Result<(), InboundCommand> {
        self.queue.try_send(cmd).map_err(|TrySendError::Full(cmd)| cmd)
    }

    pub(crate) fn signal_shutdown(&self) {
        self.shutdown.signal(());
    }

    pub(crate) fn reset_for_start(&self) {
        self.shutdown.reset();
        self.purge();
    }

    pub(crate) fn purge(&self) {
        while self.queue.try_receive().is_ok() {}
    }

    #[cfg(test)]
    pub(crate) fn queued(&self) -> usize {
        self.queue.len()
    }

    #[cfg(test)]
    pub(crate) fn try_pop(&self) -> Option<InboundCommand> {
        self.queue.try_receive().ok()
    }
}

/// Worker loop body: block on the queue, parse, hand off to the
/// dispatcher. Runs until the shutdown signal fires.
pub(crate) fn run_worker(commands: &CommandQueue, dispatcher: &Dispatcher) {
    debug!("Command worker running");
    loop {
        match block_on(select(commands.shutdown.wait(), commands.queue.receive())) {
            Either::First(()) => break,
            Either::Second(cmd) => match parse_command(&cmd.payload) {
                Ok(command) => dispatcher.execute(command),
                Err(err) => dispatcher.reject(&err),
            },
        }
    }
    debug!("Command worker exited");
}

/// Parse a raw payload into a [`DeviceCommand`].
///
/// Classification: a top-level array, or an object whose `"Action"` value
/// (capital A) is a string, is the device-command form and passes through
/// verbatim. An object with a lowercase `"action"` string is channel
/// native, matched case-insensitively; a non-string `"Action"` falls
/// through to that lookup. Everything else is unknown.
pub(crate) fn parse_command(payload: &[u8]) -> Result<DeviceCommand, ProtocolError> {
    let value: Value = serde_json::from_slice(payload)
        .map_err(|err| ProtocolError::MalformedJson(err.to_string()))?;

    let obj = match &value {
        Value::Array(_) => {
            return Ok(DeviceCommand::GenericAction {
                raw: String::from_utf8_lossy(payload).into_owned(),
            })
        }
        Value::Object(obj) => obj,
        _ => return Err(ProtocolError::UnknownAction("<not an object>".into())),
    };

    if matches!(obj.get("Action"), Some(Value::String(_))) {
        return Ok(DeviceCommand::GenericAction {
            raw: String::from_utf8_lossy(payload).into_owned(),
        });
    }

    let action = match obj.get("action").and_then(Value::as_str) {
        Some(action) => action,
        None => return Err(ProtocolError::UnknownAction("<missing action>".into())),
    };

    if action.eq_ignore_ascii_case("SCAN") {
        Ok(DeviceCommand::Scan)
    } else if action.eq_ignore_ascii_case("CONNECT_WIFI") {
        let ssid = require_str(obj, "ssid")?;
        let password = require_str(obj, "password")?;
        let token = require_str(obj, "user_token")?;
        Ok(DeviceCommand::ConnectWifi {
            ssid,
            password,
            token,
            is_production: parse_is_production(obj.get("is_production")),
        })
    } else if action.eq_ignore_ascii_case("READ_SENSORS") {
        Ok(DeviceCommand::ReadSensors)
    } else {
        Err(ProtocolError::UnknownAction(action.to_string()))
    }
}

fn require_str(
    obj: &serde_json::Map<String, Value>,
    field: &'static str,
) -> Result<String, ProtocolError> {
    obj.get(field)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or(ProtocolError::MissingField(field))
}

/// Boolean, or the strings "true" (any case) / "1"; anything else is false.
fn parse_is_production(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true") || s == "1",
        _ => false,
    }
}
