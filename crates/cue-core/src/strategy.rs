//! Scan strategies.
//!
//! A strategy decides, for every discovery the scanner dispatches to it,
//! whether to ignore the peripheral, touch it, or connect and hold it. The
//! three strategies share a [`StrategyBase`] that applies the product-name,
//! registry and trigger filters and tracks the one sensor the strategy has
//! connected.
//!
//! | Strategy | Registry | Trigger | Action |
//! |----------|----------|---------|--------|
//! | [`ListeningStrategy`] | known | audio or button | touch, heartbeat, audio notification |
//! | [`PairingStrategy`] | unknown | button | remember, touch, new sensor |
//! | [`CalibrationStrategy`] | known | button | connect and hold |

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use cue_types::{SensorId, Trigger};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::events::{EventDispatcher, SensorEvent};
use crate::radio::Discovery;
use crate::registry::KnownSensorRegistry;
use crate::scanner::Scanner;
use crate::sensor::Sensor;

/// Which strategy is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// Default strategy: acknowledge known sensors.
    Listening,
    /// Accept a new sensor.
    Pairing,
    /// Connect a known sensor and hold the link.
    Calibration,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Listening => write!(f, "listening"),
            StrategyKind::Pairing => write!(f, "pairing"),
            StrategyKind::Calibration => write!(f, "calibration"),
        }
    }
}

/// Shared collaborators of every strategy.
#[derive(Debug, Clone)]
pub struct StrategyContext {
    /// Engine configuration.
    pub config: EngineConfig,
    /// Paired sensors.
    pub registry: Arc<KnownSensorRegistry>,
    /// Where domain events go.
    pub events: EventDispatcher,
}

/// A discovery filter and handler.
#[async_trait]
pub trait ScanStrategy: Send + Sync {
    /// Which strategy this is.
    fn kind(&self) -> StrategyKind;

    /// Handle one discovery.
    ///
    /// `Ok(None)` means the peripheral is not interesting. `Ok(Some(_))` means
    /// the event was fully handled, including any scan stop and resume. Only
    /// a fatal error is returned as `Err`.
    async fn on_discover(&self, scanner: &Scanner, discovery: Discovery)
    -> Result<Option<Arc<Sensor>>>;

    /// The sensor this strategy currently holds connected, if any.
    async fn connected_sensor(&self) -> Option<Arc<Sensor>>;

    /// Disconnect the held sensor. Returns its id if there was one.
    async fn disconnect_sensor(&self) -> Result<Option<SensorId>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Membership {
    Known,
    Unknown,
}

/// Filtering and connected-slot bookkeeping shared by the strategies.
#[derive(Debug)]
pub struct StrategyBase {
    ctx: StrategyContext,
    connected: Mutex<Option<Arc<Sensor>>>,
}

impl StrategyBase {
    fn new(ctx: StrategyContext) -> Self {
        Self {
            ctx,
            connected: Mutex::new(None),
        }
    }

    /// Whether the advertised name is the expected product name.
    pub fn matches_product(&self, discovery: &Discovery) -> bool {
        discovery.local_name.as_deref() == Some(self.ctx.config.product_name.as_str())
    }

    async fn accept(
        &self,
        discovery: &Discovery,
        membership: Membership,
        wanted: impl Fn(Trigger) -> bool + Send,
    ) -> Option<Arc<Sensor>> {
        if !self.matches_product(discovery) {
            return None;
        }
        let id = discovery.sensor_id()?;
        let known = self.ctx.registry.knows(&id).await;
        match membership {
            Membership::Known if !known => return None,
            Membership::Unknown if known => return None,
            _ => {}
        }
        let trigger = discovery.trigger();
        if !wanted(trigger) {
            debug!(sensor = %id, %trigger, "Trigger not accepted");
            return None;
        }
        Sensor::from_discovery(discovery, &self.ctx.config).map(Arc::new)
    }

    /// Take the connected slot for `sensor`, disconnecting whoever held it.
    async fn hold(&self, sensor: &Arc<Sensor>) {
        let previous = self.connected.lock().await.replace(Arc::clone(sensor));
        if let Some(previous) = previous.filter(|p| !Arc::ptr_eq(p, sensor)) {
            if let Err(e) = previous.disconnect().await {
                warn!(sensor = %previous.id(), "Ignoring disconnect failure of previous sensor: {}", e);
            }
        }
    }

    async fn release(&self, sensor: &Arc<Sensor>) {
        let mut slot = self.connected.lock().await;
        if slot.as_ref().is_some_and(|held| Arc::ptr_eq(held, sensor)) {
            *slot = None;
        }
    }

    async fn pause(&self, scanner: &Scanner) {
        if let Err(e) = scanner.stop_scanning().await {
            warn!("Failed to stop scanning: {}", e);
        }
    }

    async fn connected_sensor(&self) -> Option<Arc<Sensor>> {
        self.connected.lock().await.clone()
    }

    async fn disconnect_sensor(&self) -> Result<Option<SensorId>> {
        let Some(sensor) = self.connected.lock().await.take() else {
            return Ok(None);
        };
        sensor.disconnect().await?;
        Ok(Some(sensor.id().clone()))
    }

    fn emit(&self, event: SensorEvent) {
        self.ctx.events.send(event);
    }
}

/// Default strategy: acknowledge known sensors and report audio triggers.
#[derive(Debug)]
pub struct ListeningStrategy {
    base: StrategyBase,
}

impl ListeningStrategy {
    /// Create the strategy.
    pub fn new(ctx: StrategyContext) -> Self {
        Self {
            base: StrategyBase::new(ctx),
        }
    }
}

#[async_trait]
impl ScanStrategy for ListeningStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Listening
    }

    async fn on_discover(
        &self,
        scanner: &Scanner,
        discovery: Discovery,
    ) -> Result<Option<Arc<Sensor>>> {
        let Some(sensor) = self
            .base
            .accept(&discovery, Membership::Known, |t| t.is_recognized())
            .await
        else {
            return Ok(None);
        };
        let trigger = sensor.trigger().await;
        info!(sensor = %sensor.id(), %trigger, "Known sensor checked in");

        self.base.pause(scanner).await;
        self.base.hold(&sensor).await;
        let touched = sensor.touch().await;
        self.base.release(&sensor).await;

        // Emitted from the advertisement whatever the touch outcome.
        self.base.emit(SensorEvent::Heartbeat {
            id: sensor.id().clone(),
            rssi: sensor.rssi().await,
            battery_level: None,
        });
        if trigger == Trigger::Audio {
            self.base.emit(SensorEvent::AudioTrigger {
                id: sensor.id().clone(),
            });
        }
        match touched {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!(sensor = %sensor.id(), "Touch failed: {}", e),
        }

        if let Err(e) = scanner.resume_scanning().await {
            warn!("Failed to resume scanning: {}", e);
        }
        Ok(Some(sensor))
    }

    async fn connected_sensor(&self) -> Option<Arc<Sensor>> {
        self.base.connected_sensor().await
    }

    async fn disconnect_sensor(&self) -> Result<Option<SensorId>> {
        self.base.disconnect_sensor().await
    }
}

/// Accept the next unknown sensor announcing itself with its button.
#[derive(Debug)]
pub struct PairingStrategy {
    base: StrategyBase,
}

impl PairingStrategy {
    /// Create the strategy.
    pub fn new(ctx: StrategyContext) -> Self {
        Self {
            base: StrategyBase::new(ctx),
        }
    }
}

#[async_trait]
impl ScanStrategy for PairingStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Pairing
    }

    async fn on_discover(
        &self,
        scanner: &Scanner,
        discovery: Discovery,
    ) -> Result<Option<Arc<Sensor>>> {
        let Some(sensor) = self
            .base
            .accept(&discovery, Membership::Unknown, |t| t == Trigger::Button)
            .await
        else {
            return Ok(None);
        };
        let id = sensor.id().clone();

        match self.base.ctx.registry.remember(id.clone()).await {
            Ok(true) => info!(sensor = %id, "Paired new sensor"),
            // Lost a race with another delivery of the same advertisement.
            Ok(false) => return Ok(None),
            Err(e) => warn!(sensor = %id, "Paired sensor but failed to persist: {}", e),
        }

        self.base.pause(scanner).await;
        self.base.hold(&sensor).await;
        let touched = sensor.touch().await;
        self.base.release(&sensor).await;

        self.base.emit(SensorEvent::NewSensor { id: id.clone() });
        match touched {
            Ok(()) => self.base.emit(SensorEvent::Heartbeat {
                id: id.clone(),
                rssi: sensor.rssi().await,
                battery_level: None,
            }),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!(sensor = %id, "Touch after pairing failed: {}", e),
        }

        if let Err(e) = scanner.scan_default().await {
            warn!("Failed to resume listening: {}", e);
        }
        Ok(Some(sensor))
    }

    async fn connected_sensor(&self) -> Option<Arc<Sensor>> {
        self.base.connected_sensor().await
    }

    async fn disconnect_sensor(&self) -> Result<Option<SensorId>> {
        self.base.disconnect_sensor().await
    }
}

/// Connect a known sensor whose button is pressed and keep the link open.
#[derive(Debug)]
pub struct CalibrationStrategy {
    base: StrategyBase,
}

impl CalibrationStrategy {
    /// Create the strategy.
    pub fn new(ctx: StrategyContext) -> Self {
        Self {
            base: StrategyBase::new(ctx),
        }
    }
}

#[async_trait]
impl ScanStrategy for CalibrationStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Calibration
    }

    async fn on_discover(
        &self,
        scanner: &Scanner,
        discovery: Discovery,
    ) -> Result<Option<Arc<Sensor>>> {
        let Some(sensor) = self
            .base
            .accept(&discovery, Membership::Known, |t| t == Trigger::Button)
            .await
        else {
            return Ok(None);
        };

        self.base.pause(scanner).await;
        self.base.hold(&sensor).await;

        match sensor.connect().await {
            Ok(()) => {
                info!(sensor = %sensor.id(), "Holding sensor for calibration");
                self.base.emit(SensorEvent::Connected {
                    id: sensor.id().clone(),
                });
                Ok(Some(sensor))
            }
            Err(e) => {
                self.base.release(&sensor).await;
                if e.is_fatal() {
                    return Err(e);
                }
                if matches!(e, Error::Cancelled) {
                    // Released by a mode change, which owns the scan state.
                    info!(sensor = %sensor.id(), "Calibration connect abandoned");
                    return Ok(None);
                }
                warn!(sensor = %sensor.id(), "Calibration connect failed: {}", e);
                if let Err(e) = sensor.disconnect().await {
                    warn!("Ignoring disconnect failure: {}", e);
                }
                if let Err(e) = scanner.resume_scanning().await {
                    warn!("Failed to resume scanning: {}", e);
                }
                Ok(None)
            }
        }
    }

    async fn connected_sensor(&self) -> Option<Arc<Sensor>> {
        self.base.connected_sensor().await
    }

    async fn disconnect_sensor(&self) -> Result<Option<SensorId>> {
        self.base.disconnect_sensor().await
    }
}
