//! Trait abstractions over the host radio stack.
//!
//! The engine never talks to btleplug directly. It sees a [`Radio`] that can
//! scan and emits [`RadioEvent`]s, and [`RadioPeripheral`] handles carried by
//! each [`Discovery`]. [`crate::btle`] implements them on real hardware and
//! [`crate::mock`] implements them for tests.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use cue_types::{SensorId, ServiceData, Trigger};

use crate::error::Result;

/// Power state of the radio adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioState {
    /// State not reported yet.
    Unknown,
    /// Adapter is powered and can scan.
    PoweredOn,
    /// Adapter is off or unavailable.
    PoweredOff,
}

/// Link state as reported by the hardware for one peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No link.
    Disconnected,
    /// Link establishment in progress.
    Connecting,
    /// Link is up.
    Connected,
    /// Link teardown in progress.
    Disconnecting,
}

/// Handle to a discovered GATT characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Characteristic {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// UUID of the service that owns it.
    pub service_uuid: Uuid,
}

/// Operations on one peripheral handle.
#[async_trait]
pub trait RadioPeripheral: Send + Sync + fmt::Debug {
    /// Hardware address as reported by the stack.
    fn address(&self) -> String;

    /// Current link state.
    async fn link_state(&self) -> LinkState;

    /// Issue a connect request.
    async fn connect(&self) -> Result<()>;

    /// Issue a disconnect request.
    async fn disconnect(&self) -> Result<()>;

    /// Discover every characteristic the peripheral exposes.
    async fn discover_characteristics(&self) -> Result<Vec<Characteristic>>;

    /// Read a characteristic value.
    async fn read(&self, characteristic: &Characteristic) -> Result<Vec<u8>>;

    /// Write a characteristic value with response.
    async fn write(&self, characteristic: &Characteristic, data: &[u8]) -> Result<()>;
}

/// One advertisement seen while scanning.
#[derive(Debug, Clone)]
pub struct Discovery {
    /// Advertised local name.
    pub local_name: Option<String>,
    /// Service-data entries in advertisement order.
    pub service_data: Vec<ServiceData>,
    /// Received signal strength.
    pub rssi: Option<i16>,
    /// Hardware address, or the stack's peripheral id when the address is hidden.
    pub address: String,
    /// Handle used to connect.
    pub peripheral: Arc<dyn RadioPeripheral>,
}

impl Discovery {
    /// The sensor id this advertisement maps to, if the address is usable.
    pub fn sensor_id(&self) -> Option<SensorId> {
        SensorId::from_address(&self.address).ok()
    }

    /// Decoded trigger of this advertisement.
    pub fn trigger(&self) -> Trigger {
        Trigger::from_service_data(&self.service_data)
    }
}

/// Events produced by a [`Radio`].
#[derive(Debug, Clone)]
pub enum RadioEvent {
    /// The adapter's power state changed.
    StateChanged(RadioState),
    /// An advertisement was received.
    Discovered(Discovery),
}

/// The single shared scanning resource.
#[async_trait]
pub trait Radio: Send + Sync {
    /// Current power state.
    async fn state(&self) -> RadioState;

    /// Start a hardware scan.
    async fn start_scan(&self) -> Result<()>;

    /// Stop the hardware scan. Resolves once the stack confirms.
    async fn stop_scan(&self) -> Result<()>;

    /// Stream of radio events. May be taken once.
    async fn events(&self) -> Result<BoxStream<'static, RadioEvent>>;
}
