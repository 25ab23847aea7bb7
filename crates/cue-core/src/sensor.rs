//! Sensor session: one discovered peripheral and its link lifecycle.
//!
//! A [`Sensor`] owns the connect/disconnect state machine of one peripheral,
//! lazily resolves characteristic handles and classifies the trigger of the
//! advertisement it was created from.
//!
//! ```text
//!   Disconnected ──connect──▶ Connecting ──link up──▶ Connected
//!        ▲                        │                      │
//!        │                     watchdog             disconnect
//!        │                        ▼                      ▼
//!        └──────────────────── Error ──────────────▶ Disconnecting
//!        └───────────────────────────────────────────────┘
//! ```
//!
//! Every connect and disconnect is guarded by a watchdog built from
//! [`tokio::time::timeout`]; the hardware link state is sampled while
//! waiting because link events from the stack are not reliable on their own.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use cue_types::{SensorId, ServiceData, Trigger};

use crate::config::EngineConfig;
use crate::error::{Error, LinkEdge, Result};
use crate::radio::{Characteristic, Discovery, LinkState, RadioPeripheral};

/// Connection state of a sensor session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No link.
    Disconnected,
    /// Connect requested, waiting for the link.
    Connecting,
    /// Link is up.
    Connected,
    /// Disconnect requested, waiting for teardown.
    Disconnecting,
    /// A watchdog fired or the stack rejected a request.
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
struct SessionState {
    connection: ConnectionState,
    rssi: Option<i16>,
    service_data: Vec<ServiceData>,
    characteristics: HashMap<Uuid, Characteristic>,
    /// Fired by a disconnect request that arrives while connecting.
    pending_connect: Option<CancellationToken>,
}

/// One physical sensor.
pub struct Sensor {
    id: SensorId,
    name: Option<String>,
    peripheral: Arc<dyn RadioPeripheral>,
    connect_timeout: Duration,
    disconnect_timeout: Duration,
    link_poll_interval: Duration,
    state: RwLock<SessionState>,
}

impl fmt::Debug for Sensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sensor")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

impl Sensor {
    /// Create a session from an advertisement.
    ///
    /// Returns `None` if the advertisement carries no usable address.
    pub fn from_discovery(discovery: &Discovery, config: &EngineConfig) -> Option<Self> {
        let id = discovery.sensor_id()?;
        Some(Self {
            id,
            name: discovery.local_name.clone(),
            peripheral: Arc::clone(&discovery.peripheral),
            connect_timeout: config.connect_timeout,
            disconnect_timeout: config.disconnect_timeout,
            link_poll_interval: config.link_poll_interval,
            state: RwLock::new(SessionState {
                connection: ConnectionState::Disconnected,
                rssi: discovery.rssi,
                service_data: discovery.service_data.clone(),
                characteristics: HashMap::new(),
                pending_connect: None,
            }),
        })
    }

    /// Stable sensor id.
    pub fn id(&self) -> &SensorId {
        &self.id
    }

    /// Advertised local name.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Last observed signal strength.
    pub async fn rssi(&self) -> Option<i16> {
        self.state.read().await.rssi
    }

    /// Current connection state.
    pub async fn state(&self) -> ConnectionState {
        self.state.read().await.connection
    }

    /// Refresh the advertisement-derived fields from a newer discovery.
    pub async fn update_advertisement(&self, discovery: &Discovery) {
        let mut state = self.state.write().await;
        if discovery.rssi.is_some() {
            state.rssi = discovery.rssi;
        }
        state.service_data = discovery.service_data.clone();
    }

    /// The trigger encoded in the last advertisement.
    pub async fn trigger(&self) -> Trigger {
        Trigger::from_service_data(&self.state.read().await.service_data)
    }

    /// Whether the last advertisement was caused by `trigger`.
    pub async fn was_triggered_by(&self, trigger: Trigger) -> bool {
        self.trigger().await == trigger
    }

    async fn set_state(&self, connection: ConnectionState) {
        self.state.write().await.connection = connection;
    }

    /// Wait until the hardware reports `target`.
    async fn wait_for_link(&self, target: LinkState) {
        loop {
            if self.peripheral.link_state().await == target {
                return;
            }
            sleep(self.link_poll_interval).await;
        }
    }

    /// Open the link.
    ///
    /// No-op if the sensor is already connected or connecting. If the link is
    /// not up within the connect timeout the session moves to
    /// [`ConnectionState::Error`] and [`Error::ConnectionTimeout`] is returned.
    /// A [`disconnect`](Self::disconnect) issued meanwhile abandons the
    /// attempt with [`Error::Cancelled`] and leaves the state to the teardown.
    #[tracing::instrument(level = "info", skip(self), fields(sensor = %self.id))]
    pub async fn connect(&self) -> Result<()> {
        let cancelled = {
            let mut state = self.state.write().await;
            match state.connection {
                ConnectionState::Connected | ConnectionState::Connecting => {
                    debug!("Already {}", state.connection);
                    return Ok(());
                }
                _ => {
                    let token = CancellationToken::new();
                    state.connection = ConnectionState::Connecting;
                    state.pending_connect = Some(token.clone());
                    token
                }
            }
        };

        info!("Connecting...");
        let attempt = async {
            self.peripheral.connect().await?;
            self.wait_for_link(LinkState::Connected).await;
            Ok::<(), Error>(())
        };
        let outcome = tokio::select! {
            biased;
            _ = cancelled.cancelled() => None,
            outcome = timeout(self.connect_timeout, attempt) => Some(outcome),
        };

        let mut state = self.state.write().await;
        // Checked under the lock so a racing disconnect always wins.
        let Some(outcome) = outcome.filter(|_| !cancelled.is_cancelled()) else {
            info!("Connect abandoned by disconnect request");
            return Err(Error::Cancelled);
        };
        state.pending_connect = None;
        match outcome {
            Ok(Ok(())) => {
                state.connection = ConnectionState::Connected;
                info!("Connected");
                Ok(())
            }
            Ok(Err(e)) => {
                state.connection = ConnectionState::Error;
                warn!("Connect failed: {}", e);
                Err(e)
            }
            Err(_) => {
                state.connection = ConnectionState::Error;
                warn!("Connect watchdog fired after {:?}", self.connect_timeout);
                Err(Error::connection_timeout(
                    LinkEdge::Connect,
                    self.connect_timeout,
                ))
            }
        }
    }

    /// Close the link.
    ///
    /// No-op if already disconnected or disconnecting. A connect still in
    /// progress is abandoned. The characteristic cache is cleared whatever
    /// the outcome.
    #[tracing::instrument(level = "info", skip(self), fields(sensor = %self.id))]
    pub async fn disconnect(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            match state.connection {
                ConnectionState::Disconnected | ConnectionState::Disconnecting => {
                    debug!("Already {}", state.connection);
                    return Ok(());
                }
                _ => state.connection = ConnectionState::Disconnecting,
            }
            if let Some(pending) = state.pending_connect.take() {
                pending.cancel();
            }
        }

        info!("Disconnecting...");
        let attempt = async {
            self.peripheral.disconnect().await?;
            self.wait_for_link(LinkState::Disconnected).await;
            Ok::<(), Error>(())
        };
        let outcome = timeout(self.disconnect_timeout, attempt).await;

        let mut state = self.state.write().await;
        state.characteristics.clear();
        match outcome {
            Ok(Ok(())) => {
                state.connection = ConnectionState::Disconnected;
                info!("Disconnected");
                Ok(())
            }
            Ok(Err(e)) => {
                state.connection = ConnectionState::Error;
                warn!("Disconnect failed: {}", e);
                Err(e)
            }
            Err(_) => {
                state.connection = ConnectionState::Error;
                warn!("Disconnect watchdog fired after {:?}", self.disconnect_timeout);
                Err(Error::connection_timeout(
                    LinkEdge::Disconnect,
                    self.disconnect_timeout,
                ))
            }
        }
    }

    /// Connect and immediately disconnect to acknowledge the sensor.
    ///
    /// Always leaves the session [`ConnectionState::Disconnected`]. A connect
    /// failure is returned after the teardown; a disconnect failure is only
    /// logged.
    #[tracing::instrument(level = "debug", skip(self), fields(sensor = %self.id))]
    pub async fn touch(&self) -> Result<()> {
        let connected = self.connect().await;
        if let Err(e) = self.disconnect().await {
            warn!("Ignoring disconnect failure after touch: {}", e);
        }
        self.set_state(ConnectionState::Disconnected).await;
        connected
    }

    async fn resolve(&self, uuid: Uuid) -> Result<Characteristic> {
        {
            let state = self.state.read().await;
            if state.connection != ConnectionState::Connected {
                return Err(Error::NotConnected);
            }
            if let Some(characteristic) = state.characteristics.get(&uuid) {
                return Ok(*characteristic);
            }
        }

        debug!("Discovering characteristics for {}", uuid);
        let discovered = self.peripheral.discover_characteristics().await?;
        let available = discovered.len();

        let mut state = self.state.write().await;
        for characteristic in discovered {
            state
                .characteristics
                .insert(characteristic.uuid, characteristic);
        }
        state
            .characteristics
            .get(&uuid)
            .copied()
            .ok_or_else(|| Error::characteristic_not_found(uuid.to_string(), available))
    }

    /// Read a characteristic by UUID.
    pub async fn read_characteristic(&self, uuid: Uuid) -> Result<Vec<u8>> {
        let characteristic = self.resolve(uuid).await?;
        self.peripheral.read(&characteristic).await
    }

    /// Write one unsigned byte to a characteristic.
    pub async fn write_value(&self, value: u8, uuid: Uuid) -> Result<()> {
        let characteristic = self.resolve(uuid).await?;
        self.peripheral.write(&characteristic, &[value]).await
    }
}
