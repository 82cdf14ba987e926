use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use log::info;

use wisp::nimble_stack::NimbleStack;
use wisp::wifi_station::WifiStation;
use wisp::{
    BleChannel, ChannelConfig, DeviceCommandHandler, Measurement, SensorCollaborator,
    SensorReading, SensorSnapshot, DEFAULT_DEVICE_NAME,
};

/// Sensor collaborator for boards without the sensor pack fitted. Readings
/// drift slowly so consecutive snapshots stay plausible, and every reading
/// carries the synthetic tag.
struct SyntheticSensors {
    epoch: Instant,
}

impl SyntheticSensors {
    fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl SensorCollaborator for SyntheticSensors {
    fn latest_snapshot(&self) -> SensorSnapshot {
        let elapsed = self.epoch.elapsed();
        let wobble = (elapsed.as_secs_f64() / 60.0).sin();
        SensorSnapshot {
            timestamp_ms: elapsed.as_millis() as u64,
            readings: vec![
                SensorReading {
                    sensor: "sht4x".into(),
                    measurements: vec![
                        Measurement::new("temperature_c", 21.0 + 2.0 * wobble),
                        Measurement::new("humidity_pct", 45.0 + 5.0 * wobble),
                    ],
                    synthetic: true,
                },
                SensorReading {
                    sensor: "bmp390".into(),
                    measurements: vec![Measurement::new("pressure_hpa", 1013.2 + 1.5 * wobble)],
                    synthetic: true,
                },
            ],
        }
    }
}

/// Device commands accepted over the channel's generic-action form.
struct AppCommands;

impl DeviceCommandHandler for AppCommands {
    fn handle(&self, raw_json: &str) -> Result<()> {
        let value: serde_json::Value = serde_json::from_str(raw_json)?;
        let action = value
            .get("Action")
            .or_else(|| value.get("action"))
            .and_then(|v| v.as_str())
            .unwrap_or("");
        match action {
            "Ping" => Ok(()),
            "Reboot" => {
                info!("Reboot requested over BLE");
                // Give the acknowledgement time to leave the notify queue.
                thread::spawn(|| {
                    thread::sleep(Duration::from_millis(500));
                    unsafe {
                        esp_idf_svc::sys::esp_restart();
                    }
                });
                Ok(())
            }
            other => bail!("unsupported action '{}'", other),
        }
    }
}

/// Advertised name, made unique per unit by the last two MAC octets.
fn device_name() -> String {
    let mut mac = [0u8; 6];
    unsafe {
        esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr());
    }
    format!("{}-{:02x}{:02x}", DEFAULT_DEVICE_NAME, mac[4], mac[5])
}

fn main() -> Result<()> {
    // It is necessary to call this function once. Otherwise some patches to the runtime
    // implemented by esp-idf-sys might not link properly. See https://github.com/esp-rs/esp-idf-template/issues/71
    esp_idf_svc::sys::link_patches();

    // Bind the log crate to the ESP Logging facilities
    esp_idf_svc::log::EspLogger::initialize_default();

    info!("🚀 Wisp firmware starting");

    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    let wifi = Arc::new(WifiStation::new(peripherals.modem, sys_loop, nvs)?);
    let sensors = Arc::new(SyntheticSensors::new());

    let channel = BleChannel::new(Arc::new(NimbleStack::new()));
    channel.start(ChannelConfig {
        device_name: device_name(),
        wifi: Some(wifi),
        sensors: Some(sensors),
        device_commands: Some(Arc::new(AppCommands)),
    })?;

    loop {
        thread::sleep(Duration::from_secs(30));
        info!(
            "Heartbeat: phase {:?}, {} diagnostic entries",
            channel.phase(),
            channel.log_count()
        );
    }
}
