mod ble_channel;
mod collaborators;
mod command_worker;
mod config;
mod dispatcher;
mod error;
mod event_log;
mod gatt_service;
mod link_state;
mod notify_pipeline;
mod radio_stack;

#[cfg(feature = "esp32")]
pub mod nimble_stack;
#[cfg(feature = "esp32")]
pub mod wifi_station;

pub use ble_channel::BleChannel;
pub use collaborators::{
    AccessPoint, DeviceCommandHandler, Measurement, SensorCollaborator, SensorReading,
    SensorSnapshot, WifiAuth, WifiCollaborator,
};
pub use command_worker::{CMD_MAX_LEN, CMD_QUEUE_DEPTH};
pub use config::{ChannelConfig, DEFAULT_DEVICE_NAME};
pub use error::{ProtocolError, ResourceError, TransportError};
pub use event_log::{LogEntry, LogKind, LOG_CAPACITY, LOG_MESSAGE_MAX};
pub use gatt_service::{ChannelHooks, RX_CHAR_UUID, SERVICE_UUID, TX_CHAR_UUID};
pub use link_state::LinkPhase;
pub use notify_pipeline::{NOTIFY_CHUNK_MAX, NOTIFY_QUEUE_DEPTH};
pub use radio_stack::{GapEvent, RadioStack, ServiceHandles, StackError};
