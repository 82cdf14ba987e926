//! READ_SENSORS over the wire: sentinel-framed snapshot documents and the
//! single-reply error path when no sensor source is wired in.

mod common;

use std::sync::Arc;

use common::{assert_stream_settles, connect_and_subscribe, wait_until, RecordingStack};
use serde_json::Value;
use wisp::{
    BleChannel, ChannelConfig, Measurement, SensorCollaborator, SensorReading, SensorSnapshot,
};

struct BenchSensors;

impl SensorCollaborator for BenchSensors {
    fn latest_snapshot(&self) -> SensorSnapshot {
        SensorSnapshot {
            timestamp_ms: 86_400_000,
            readings: vec![
                SensorReading {
                    sensor: "sht45".into(),
                    measurements: vec![
                        Measurement::new("temperature_c", 22.25),
                        Measurement::new("humidity_pct", 41.0),
                    ],
                    synthetic: false,
                },
                SensorReading {
                    sensor: "bmp390".into(),
                    measurements: vec![Measurement::new("pressure_hpa", 1012.6)],
                    synthetic: true,
                },
            ],
        }
    }
}

#[test]
fn snapshot_streams_between_sentinels() {
    let stack = Arc::new(RecordingStack::default());
    let channel = BleChannel::new(stack.clone());
    channel
        .start(ChannelConfig {
            sensors: Some(Arc::new(BenchSensors)),
            ..Default::default()
        })
        .expect("start");
    connect_and_subscribe(&stack);

    stack.hooks().inbound_write(br#"{"action":"READ_SENSORS"}"#);
    wait_until("sensor stream to finish", || {
        stack.sent_string().ends_with("SENSOR_DATA_END")
    });

    let stream = stack.sent_string();
    let body = stream
        .strip_prefix("SENSOR_DATA_START")
        .and_then(|s| s.strip_suffix("SENSOR_DATA_END"))
        .expect("sentinel pair present");
    let parsed: Value = serde_json::from_str(body).expect("payload is JSON");
    assert_eq!(parsed["timestamp_ms"], 86_400_000u64);
    assert_eq!(parsed["sensors"]["sht45"]["temperature_c"], 22.25);
    assert_eq!(parsed["sensors"]["sht45"]["synthetic"], false);
    assert_eq!(parsed["sensors"]["bmp390"]["pressure_hpa"], 1012.6);
    assert_eq!(parsed["sensors"]["bmp390"]["synthetic"], true);

    channel.stop();
}

#[test]
fn missing_sensor_source_is_one_error_reply() {
    let stack = Arc::new(RecordingStack::default());
    let channel = BleChannel::new(stack.clone());
    channel.start(ChannelConfig::default()).expect("start");
    connect_and_subscribe(&stack);

    stack.hooks().inbound_write(br#"{"action":"READ_SENSORS"}"#);
    assert_stream_settles(&stack, "SENSOR_DATA_ERROR: sensors unavailable");

    channel.stop();
}
