use std::sync::Arc;

use crate::collaborators::{DeviceCommandHandler, SensorCollaborator, WifiCollaborator};

/// Advertised device name used when the config does not set one.
pub const DEFAULT_DEVICE_NAME: &str = "wisp-setup";

/// Per-session configuration handed to [`crate::BleChannel::start`].
///
/// Collaborators are optional: each command that needs a missing one answers
/// the peer with its documented failure string instead.
#[derive(Clone)]
pub struct ChannelConfig {
    /// Name carried in the advertisement and scan response.
    pub device_name: String,
    pub wifi: Option<Arc<dyn WifiCollaborator>>,
    pub sensors: Option<Arc<dyn SensorCollaborator>>,
    pub device_commands: Option<Arc<dyn DeviceCommandHandler>>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            wifi: None,
            sensors: None,
            device_commands: None,
        }
    }
}
