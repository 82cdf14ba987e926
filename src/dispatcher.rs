use std::sync::Arc;

use log::{info, warn};
use serde_json::{json, Map, Value};

use crate::ble_channel::ChannelShared;
use crate::collaborators::{
    AccessPoint, DeviceCommandHandler, SensorCollaborator, SensorSnapshot, WifiCollaborator,
};
use crate::command_worker::DeviceCommand;
use crate::config::ChannelConfig;
use crate::error::ProtocolError;

/// Reply sent by the write callback when the command queue is full.
pub(crate) const REPLY_QUEUE_BUSY: &str = "Queue busy";

const REPLY_BAD_JSON: &str = "Bad JSON format";
const REPLY_UNKNOWN_ACTION: &str = "Unknown action";
const REPLY_MISSING_FIELDS: &str = "Missing ssid/password/token";
const REPLY_WIFI_FAILED: &str = "Wi-Fi connection failed";
const REPLY_EXECUTED: &str = "Command executed";
const REPLY_NO_DEVICE_HANDLER: &str = "Device command handler not available";

const WIFI_LIST_START: &str = "WIFI_LIST_START";
const WIFI_LIST_END: &str = "WIFI_LIST_END";
const SENSOR_DATA_START: &str = "SENSOR_DATA_START";
const SENSOR_DATA_END: &str = "SENSOR_DATA_END";
const SENSOR_DATA_ERROR: &str = "SENSOR_DATA_ERROR: sensors unavailable";

/// Access points reported per scan; extras are dropped.
const MAX_SCAN_RESULTS: usize = 20;

/// Executes classified commands against the collaborators and streams the
/// replies back through the notification pipeline. Runs on the worker task.
pub(crate) struct Dispatcher {
    shared: Arc<ChannelShared>,
    wifi: Option<Arc<dyn WifiCollaborator>>,
    sensors: Option<Arc<dyn SensorCollaborator>>,
    device_commands: Option<Arc<dyn DeviceCommandHandler>>,
}

impl Dispatcher {
    pub(crate) fn new(shared: Arc<ChannelShared>, config: &ChannelConfig) -> Self {
        Self {
            shared,
            wifi: config.wifi.clone(),
            sensors: config.sensors.clone(),
            device_commands: config.device_commands.clone(),
        }
    }

    /// Map a rejected payload to its documented peer-facing reply.
    pub(crate) fn reject(&self, err: &ProtocolError) {
        warn!("Rejected command: {}", err);
        let reply = match err {
            ProtocolError::MalformedJson(_) => REPLY_BAD_JSON,
            ProtocolError::UnknownAction(_) => REPLY_UNKNOWN_ACTION,
            ProtocolError::MissingField(_) => REPLY_MISSING_FIELDS,
        };
        self.notify_reply(reply);
    }

    pub(crate) fn execute(&self, command: DeviceCommand) {
        match command {
            DeviceCommand::Scan => self.handle_scan(),
            DeviceCommand::ConnectWifi {
                ssid,
                password,
                token,
                is_production,
            } => self.handle_connect_wifi(&ssid, &password, &token, is_production),
            DeviceCommand::ReadSensors => self.handle_read_sensors(),
            DeviceCommand::GenericAction { raw } => self.handle_device_command(&raw),
        }
    }

    /// SCAN: always exactly one START and one END; the payload between them
    /// is `[]` whenever the scan cannot produce results.
    fn handle_scan(&self) {
        info!("📶 Wi-Fi scan requested over BLE");
        self.notify_reply(WIFI_LIST_START);
        let aps = match &self.wifi {
            Some(wifi) => match wifi.scan() {
                Ok(aps) => aps,
                Err(err) => {
                    warn!("Wi-Fi scan failed: {:#}", err);
                    Vec::new()
                }
            },
            None => {
                warn!("No Wi-Fi collaborator configured, reporting empty scan");
                Vec::new()
            }
        };
        self.notify_payload(&scan_results_json(&aps).to_string());
        self.notify_reply(WIFI_LIST_END);
    }

    fn handle_connect_wifi(&self, ssid: &str, password: &str, token: &str, is_production: bool) {
        info!(
            "🔌 CONNECT_WIFI for SSID '{}' (production: {})",
            ssid, is_production
        );
        self.notify_reply(&format!("Connecting to {}...", ssid));
        let connected = match &self.wifi {
            Some(wifi) => wifi.connect(ssid, password, token, is_production),
            None => {
                warn!("No Wi-Fi collaborator configured, reporting connect failure");
                false
            }
        };
        if connected {
            info!("✅ Wi-Fi connected to '{}'", ssid);
            self.notify_reply(&format!("Connected to {}", ssid));
        } else {
            warn!("❌ Wi-Fi connection to '{}' failed", ssid);
            self.notify_reply(REPLY_WIFI_FAILED);
        }
    }

    /// READ_SENSORS: START/payload/END with a collaborator, or exactly one
    /// error-class reply without the sentinel pair.
    fn handle_read_sensors(&self) {
        let Some(sensors) = &self.sensors else {
            warn!("Sensor snapshot requested but no collaborator configured");
            self.notify_reply(SENSOR_DATA_ERROR);
            return;
        };
        info!("🌡 Sensor snapshot requested over BLE");
        self.notify_reply(SENSOR_DATA_START);
        let snapshot = sensors.latest_snapshot();
        self.notify_payload(&snapshot_json(&snapshot).to_string());
        self.notify_reply(SENSOR_DATA_END);
    }

    fn handle_device_command(&self, raw: &str) {
        let Some(handler) = &self.device_commands else {
            warn!("Device command received but no handler configured");
            self.notify_reply(REPLY_NO_DEVICE_HANDLER);
            return;
        };
        match handler.handle(raw) {
            Ok(()) => self.notify_reply(REPLY_EXECUTED),
            Err(err) => self.notify_reply(&format!("Command failed: {}", err)),
        }
    }

    fn notify_reply(&self, message: &str) {
        if let Err(err) = self.shared.notify_text(message) {
            warn!("Reply not delivered: {}", err);
        }
    }

    fn notify_payload(&self, payload: &str) {
        if let Err(err) = self.shared.notify_text(payload) {
            warn!("Payload of {} bytes not delivered: {}", payload.len(), err);
        }
    }
}

/// JSON array of scan results: hidden (empty-SSID) entries are skipped and
/// at most [`MAX_SCAN_RESULTS`] are kept.
fn scan_results_json(aps: &[AccessPoint]) -> Value {
    let entries: Vec<Value> = aps
        .iter()
        .filter(|ap| !ap.ssid.is_empty())
        .take(MAX_SCAN_RESULTS)
        .map(|ap| {
            json!({
                "ssid": ap.ssid,
                "mac": ap.mac_string(),
                "rssi": ap.rssi,
                "auth": ap.auth.as_str(),
            })
        })
        .collect();
    Value::Array(entries)
}

/// Snapshot document keyed by sensor name, each reading carrying its
/// measurements plus the real/synthetic tag.
fn snapshot_json(snapshot: &SensorSnapshot) -> Value {
    let mut sensors = Map::new();
    for reading in &snapshot.readings {
        let mut fields = Map::new();
        for measurement in &reading.measurements {
            fields.insert(measurement.name.clone(), json!(measurement.value));
        }
        fields.insert("synthetic".into(), json!(reading.synthetic));
        sensors.insert(reading.sensor.clone(), Value::Object(fields));
    }
    json!({
        "timestamp_ms": snapshot.timestamp_ms,
        "sensors": sensors,
    })
}
