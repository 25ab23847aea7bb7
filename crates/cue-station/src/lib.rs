//! home-cue base station.
//!
//! Wires the discovery engine from `cue-core` to the outside world:
//! - Publishes sensor events to an MQTT broker
//! - Accepts control commands over a local WebSocket
//! - Persists the known-sensor registry to a JSON file
//! - Reboots the host when the radio stack wedges
//!
//! # Configuration
//!
//! The station reads `~/.config/home-cue/station.toml`:
//!
//! ```toml
//! [station]
//! device_uuid = "a1b2c3"          # or RESIN_DEVICE_UUID
//! device_uuid_prefix = ""         # or DEVICE_UUID_PREFIX
//!
//! [ble]
//! connect_timeout_secs = 10
//! pairing_window_secs = 30
//!
//! [registry]
//! path = "/data/sensors.json"
//! persist_hook = "sync"
//!
//! [control]
//! bind = "0.0.0.0:3050"
//! max_bind_attempts = 10
//!
//! [mqtt]
//! broker = "mqtts://broker.example.com"
//! topic_root = "/devices/{station}/events"
//!
//! [reboot]
//! command = "systemctl reboot"
//! ```
//!
//! # Control Channel
//!
//! - `WS /` - JSON frames `{ "action": "PAIRING_MODE" }`, replies on the
//!   same connection

pub mod announce;
pub mod config;
pub mod reboot;
pub mod ws;

#[cfg(feature = "mqtt")]
pub mod mqtt;

pub use announce::LogPublisher;
pub use config::{
    BleConfig, Config, ConfigError, ControlConfig, MqttConfig, RebootConfig, RegistryConfig,
    StationConfig, ValidationError,
};
pub use ws::{ControlHub, ControlState};
