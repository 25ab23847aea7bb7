//! btleplug backend for [`Radio`] and [`RadioPeripheral`].
//!
//! Uses the first adapter reported by the platform manager. Adapter events
//! are translated as they arrive: discovery, update and service-data events
//! become [`RadioEvent::Discovered`] carrying the peripheral's current
//! properties, state updates become [`RadioEvent::StateChanged`].

use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use futures::stream::BoxStream;
use tracing::{debug, trace, warn};

use cue_types::ServiceData;
use cue_types::uuids::service_token;

use crate::error::{Error, Result};
use crate::radio::{
    Characteristic, Discovery, LinkState, Radio, RadioEvent, RadioPeripheral, RadioState,
};

/// Format a peripheral ID as a string.
///
/// On macOS, peripheral IDs are UUIDs. On other platforms they wrap the
/// Bluetooth address.
pub fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// Address used to identify a peripheral.
///
/// On macOS where addresses are reported as 00:00:00:00:00:00, uses the
/// peripheral ID instead.
pub fn create_identifier(address: &str, peripheral_id: &PeripheralId) -> String {
    if address == "00:00:00:00:00:00" {
        format_peripheral_id(peripheral_id)
    } else {
        address.to_string()
    }
}

fn radio_state(state: CentralState) -> RadioState {
    match state {
        CentralState::PoweredOn => RadioState::PoweredOn,
        CentralState::PoweredOff => RadioState::PoweredOff,
        _ => RadioState::Unknown,
    }
}

/// A host Bluetooth adapter.
#[derive(Debug, Clone)]
pub struct BtleRadio {
    adapter: Adapter,
}

impl BtleRadio {
    /// Wrap an adapter.
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }

    /// Open the first available adapter.
    pub async fn first_adapter() -> Result<Self> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        let adapter = adapters.into_iter().next().ok_or(Error::RadioNotReady)?;
        match adapter.adapter_info().await {
            Ok(info) => debug!("Using adapter {}", info),
            Err(e) => debug!("Adapter info unavailable: {}", e),
        }
        Ok(Self::new(adapter))
    }
}

async fn discovery(adapter: &Adapter, id: &PeripheralId) -> Result<Option<Discovery>> {
    let peripheral = adapter.peripheral(id).await?;
    let Some(properties) = peripheral.properties().await? else {
        return Ok(None);
    };

    let address = create_identifier(&properties.address.to_string(), &peripheral.id());
    let mut entries: Vec<_> = properties.service_data.into_iter().collect();
    entries.sort_by_key(|(uuid, _)| *uuid);
    let service_data = entries
        .into_iter()
        .map(|(uuid, data)| ServiceData::new(service_token(&uuid), data))
        .collect();

    Ok(Some(Discovery {
        local_name: properties.local_name,
        service_data,
        rssi: properties.rssi,
        address: address.clone(),
        peripheral: Arc::new(BtlePeripheral {
            peripheral,
            address,
        }),
    }))
}

async fn translate(adapter: &Adapter, event: CentralEvent) -> Option<RadioEvent> {
    match event {
        CentralEvent::StateUpdate(state) => Some(RadioEvent::StateChanged(radio_state(state))),
        CentralEvent::DeviceDiscovered(id)
        | CentralEvent::DeviceUpdated(id)
        | CentralEvent::ServiceDataAdvertisement { id, .. } => {
            match discovery(adapter, &id).await {
                Ok(found) => found.map(RadioEvent::Discovered),
                Err(e) => {
                    trace!(peripheral = %format_peripheral_id(&id), "No properties: {}", e);
                    None
                }
            }
        }
        _ => None,
    }
}

#[async_trait]
impl Radio for BtleRadio {
    async fn state(&self) -> RadioState {
        match self.adapter.adapter_state().await {
            Ok(state) => radio_state(state),
            Err(e) => {
                warn!("Failed to query adapter state: {}", e);
                RadioState::Unknown
            }
        }
    }

    async fn start_scan(&self) -> Result<()> {
        self.adapter.start_scan(ScanFilter::default()).await?;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn events(&self) -> Result<BoxStream<'static, RadioEvent>> {
        let events = self.adapter.events().await?;
        let adapter = self.adapter.clone();
        Ok(events
            .filter_map(move |event| {
                let adapter = adapter.clone();
                async move { translate(&adapter, event).await }
            })
            .boxed())
    }
}

/// A peripheral seen by a [`BtleRadio`].
#[derive(Debug, Clone)]
pub struct BtlePeripheral {
    peripheral: Peripheral,
    address: String,
}

impl BtlePeripheral {
    fn find(&self, characteristic: &Characteristic) -> Result<btleplug::api::Characteristic> {
        let characteristics = self.peripheral.characteristics();
        let available = characteristics.len();
        characteristics
            .into_iter()
            .find(|c| c.uuid == characteristic.uuid && c.service_uuid == characteristic.service_uuid)
            .ok_or_else(|| Error::characteristic_not_found(characteristic.uuid.to_string(), available))
    }
}

#[async_trait]
impl RadioPeripheral for BtlePeripheral {
    fn address(&self) -> String {
        self.address.clone()
    }

    async fn link_state(&self) -> LinkState {
        match self.peripheral.is_connected().await {
            Ok(true) => LinkState::Connected,
            Ok(false) => LinkState::Disconnected,
            Err(e) => {
                trace!(address = %self.address, "Link state unavailable: {}", e);
                LinkState::Disconnected
            }
        }
    }

    async fn connect(&self) -> Result<()> {
        self.peripheral.connect().await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }

    async fn discover_characteristics(&self) -> Result<Vec<Characteristic>> {
        self.peripheral.discover_services().await?;
        Ok(self
            .peripheral
            .characteristics()
            .into_iter()
            .map(|c| Characteristic {
                uuid: c.uuid,
                service_uuid: c.service_uuid,
            })
            .collect())
    }

    async fn read(&self, characteristic: &Characteristic) -> Result<Vec<u8>> {
        let characteristic = self.find(characteristic)?;
        Ok(self.peripheral.read(&characteristic).await?)
    }

    async fn write(&self, characteristic: &Characteristic, data: &[u8]) -> Result<()> {
        let characteristic = self.find(characteristic)?;
        self.peripheral
            .write(&characteristic, data, WriteType::WithResponse)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_radio_state_mapping() {
        assert_eq!(radio_state(CentralState::PoweredOn), RadioState::PoweredOn);
        assert_eq!(radio_state(CentralState::PoweredOff), RadioState::PoweredOff);
        assert_eq!(radio_state(CentralState::Unknown), RadioState::Unknown);
    }
}
