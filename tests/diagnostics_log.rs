//! Diagnostic ring behavior across a full command round trip, as an app
//! would read it for a support dump.

mod common;

use std::sync::Arc;

use common::{assert_stream_settles, connect_and_subscribe, RecordingStack};
use wisp::{BleChannel, ChannelConfig, LogKind};

#[test]
fn round_trip_leaves_a_readable_trace() {
    let stack = Arc::new(RecordingStack::default());
    let channel = BleChannel::new(stack.clone());
    channel.start(ChannelConfig::default()).expect("start");
    connect_and_subscribe(&stack);

    stack.hooks().inbound_write(br#"{"action":"SCAN"}"#);
    assert_stream_settles(&stack, "WIFI_LIST_START[]WIFI_LIST_END");

    let log = channel.log_snapshot(usize::MAX);
    let kinds: Vec<LogKind> = log.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            LogKind::Connect,   // session marker
            LogKind::Connect,   // central connected
            LogKind::Subscribe, // notifications enabled
            LogKind::Rx,        // inbound SCAN
            LogKind::Tx,        // WIFI_LIST_START
            LogKind::Tx,        // []
            LogKind::Tx,        // WIFI_LIST_END
        ]
    );
    assert_eq!(log[0].message, "BLE service starting");
    assert_eq!(log[1].message, "Connected, handle 1");
    assert_eq!(log[2].message, "Notifications enabled");
    assert_eq!(log[3].message, r#"RX (17 bytes): {"action":"SCAN"}"#);
    assert_eq!(log[4].message, "TX (15 bytes): WIFI_LIST_START");
    assert_eq!(log[5].message, "TX (2 bytes): []");
    assert_eq!(log[6].message, "TX (13 bytes): WIFI_LIST_END");
    assert!(log.windows(2).all(|w| w[0].timestamp_ms <= w[1].timestamp_ms));

    assert_eq!(channel.log_count(), 7);
    let dump = channel.log_json(50);
    assert_eq!(dump["total_count"], 7);
    assert_eq!(dump["logs"].as_array().map(Vec::len), Some(7));
    assert_eq!(dump["logs"][3]["type"], "RX");

    // A capped read returns the oldest entries in order.
    let capped = channel.log_snapshot(2);
    assert_eq!(capped.len(), 2);
    assert_eq!(capped[0].message, "BLE service starting");
    assert_eq!(capped[1].message, "Connected, handle 1");

    channel.stop();
}
