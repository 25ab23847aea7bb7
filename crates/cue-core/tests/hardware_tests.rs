//! Hardware integration tests for cue-core
//!
//! These tests require a powered Bluetooth adapter and should be run with:
//! ```
//! cargo test --package cue-core --test hardware_tests -- --ignored --nocapture
//! ```
//!
//! Tests that need a sensor read its address from `CUE_SENSOR`:
//! ```
//! CUE_SENSOR="00:A0:50:CF:66:D7" cargo test --package cue-core --test hardware_tests -- --ignored --nocapture
//! ```
//! Press the sensor's button while the test is scanning.

use std::env;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::timeout;

use cue_core::uuids::AUDIO_LEVEL;
use cue_core::{BtleRadio, EngineConfig, Radio, RadioEvent, RadioState, Sensor, SensorId};

/// Default timeout for BLE operations
const BLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Get the sensor under test from the environment
fn get_sensor() -> Option<SensorId> {
    env::var("CUE_SENSOR")
        .ok()
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse().ok())
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_adapter_is_powered() {
    let radio = BtleRadio::first_adapter()
        .await
        .expect("no Bluetooth adapter");
    assert_eq!(radio.state().await, RadioState::PoweredOn);
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_scan_reports_discoveries() {
    let radio = BtleRadio::first_adapter()
        .await
        .expect("no Bluetooth adapter");
    let mut events = radio.events().await.expect("event stream");
    radio.start_scan().await.expect("start scan");

    let mut seen = 0;
    let _ = timeout(Duration::from_secs(10), async {
        while let Some(event) = events.next().await {
            if let RadioEvent::Discovered(discovery) = event {
                println!(
                    "  - {} ({}) rssi {:?} trigger {}",
                    discovery.local_name.as_deref().unwrap_or("Unknown"),
                    discovery.address,
                    discovery.rssi,
                    discovery.trigger()
                );
                seen += 1;
            }
        }
    })
    .await;

    radio.stop_scan().await.expect("stop scan");
    println!("Scan reported {} advertisements", seen);
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_connect_and_read_audio_level() {
    let Some(target) = get_sensor() else {
        println!("CUE_SENSOR not set, skipping");
        return;
    };
    let radio = BtleRadio::first_adapter()
        .await
        .expect("no Bluetooth adapter");
    let mut events = radio.events().await.expect("event stream");
    radio.start_scan().await.expect("start scan");

    let discovery = timeout(BLE_TIMEOUT, async {
        while let Some(event) = events.next().await {
            if let RadioEvent::Discovered(discovery) = event {
                if discovery.sensor_id().as_ref() == Some(&target) {
                    return Some(discovery);
                }
            }
        }
        None
    })
    .await
    .expect("sensor not seen in time")
    .expect("event stream ended");
    radio.stop_scan().await.expect("stop scan");

    let sensor = Sensor::from_discovery(&discovery, &EngineConfig::default()).unwrap();
    sensor.connect().await.expect("connect");
    let level = sensor
        .read_characteristic(AUDIO_LEVEL)
        .await
        .expect("read audio level");
    println!("Audio level: {:?}", level);
    sensor.disconnect().await.expect("disconnect");
}
