//! BLE discovery and session engine for the home-cue base station.
//!
//! This crate owns the single shared radio of the station: it scans for
//! home-cue sensors, decides per advertisement whether a sensor matters in
//! the current mode, opens and closes links under watchdogs, and runs the
//! calibration protocol against a connected sensor.
//!
//! # Features
//!
//! - **Scan control**: one active scan at a time, dispatched to a pluggable strategy
//! - **Strategies**: listening (default), pairing and calibration
//! - **Sensor sessions**: connect/disconnect state machine with timeout recovery
//! - **Known-sensor registry**: paired ids, persisted after every mutation
//! - **Calibration**: timed audio probes averaged into a trigger threshold
//! - **Mode controller**: control commands in, domain events out
//!
//! # Modes
//!
//! | Mode | Strategy | Acts on |
//! |------|----------|---------|
//! | Idle | listening | known sensors, audio or button trigger |
//! | Pairing | pairing | unknown sensors, button trigger |
//! | Calibrating | calibration | one known sensor, button trigger |
//! | Connecting | calibration | any known sensor, button trigger |
//!
//! # Platform Differences
//!
//! Sensors are identified by their Bluetooth address. On macOS, where
//! CoreBluetooth hides the address, the stack's peripheral UUID is used
//! instead, so a registry built on one Mac does not carry over to another
//! machine.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use cue_core::{
//!     BtleRadio, EngineConfig, EventDispatcher, JsonFileStore, KnownSensorRegistry,
//!     ModeController, StrategyContext,
//! };
//! use cue_core::mock::{MockControlChannel, MockPublisher};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let radio = Arc::new(BtleRadio::first_adapter().await?);
//!     let registry = KnownSensorRegistry::open(JsonFileStore::new("sensors.json")).await?;
//!     let ctx = StrategyContext {
//!         config: EngineConfig::default(),
//!         registry: Arc::new(registry),
//!         events: EventDispatcher::default(),
//!     };
//!     let controller = ModeController::new(radio, ctx, Arc::new(MockControlChannel::new()));
//!
//!     let cancel = CancellationToken::new();
//!     controller.spawn_relay(Arc::new(MockPublisher::new()), cancel.clone());
//!     controller.run(cancel).await?;
//!     Ok(())
//! }
//! ```

pub mod btle;
pub mod calibration;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod mock;
pub mod publish;
pub mod radio;
pub mod registry;
pub mod scanner;
pub mod sensor;
pub mod strategy;

pub use btle::{BtlePeripheral, BtleRadio};
pub use calibration::{CalibrationOutcome, ProbePlan, mean_threshold, run_probes};
pub use config::EngineConfig;
pub use controller::{Mode, ModeController};
pub use error::{Error, LinkEdge, Result};
pub use events::{EventDispatcher, EventReceiver, EventSender, SensorEvent};
pub use publish::{ClientAddress, ControlChannel, Publisher, topic_payload};
pub use radio::{
    Characteristic, Discovery, LinkState, Radio, RadioEvent, RadioPeripheral, RadioState,
};
pub use registry::{JsonFileStore, KnownSensorRegistry, MemoryStore, RegistryStore};
pub use scanner::{DiscoveredCallback, PoweredOnHook, Scanner};
pub use sensor::{ConnectionState, Sensor};
pub use strategy::{
    CalibrationStrategy, ListeningStrategy, PairingStrategy, ScanStrategy, StrategyContext,
    StrategyKind,
};

// Re-export from cue-types
pub use cue_types::uuid as uuids;
pub use cue_types::{Command, Reply, SensorId, ServiceData, Topic, Trigger};
