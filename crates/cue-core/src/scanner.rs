//! Radio scan controller.
//!
//! The [`Scanner`] owns the single scanning resource. It starts and stops the
//! hardware scan, keeps the active [`ScanStrategy`], and runs the worker loop
//! that dispatches radio events in arrival order.
//!
//! Discoveries are only dispatched while the scanner considers itself
//! scanning. Strategies stop scanning before they connect, so no second
//! discovery can be handled while one is in flight.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use cue_types::SensorId;

use crate::error::Result;
use crate::events::SensorEvent;
use crate::radio::{Discovery, Radio, RadioEvent, RadioState};
use crate::strategy::{ScanStrategy, StrategyKind};

/// Called with a [`SensorEvent::Discovered`] for every sensor a strategy accepted.
pub type DiscoveredCallback = Arc<dyn Fn(SensorEvent) + Send + Sync>;

/// Called whenever the radio becomes powered.
pub type PoweredOnHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct ScanState {
    scanning: bool,
    strategy: Arc<dyn ScanStrategy>,
    on_discovered: Option<DiscoveredCallback>,
    address_filter: Option<Vec<SensorId>>,
}

/// The radio scan controller.
pub struct Scanner {
    radio: Arc<dyn Radio>,
    default_strategy: Arc<dyn ScanStrategy>,
    state: Mutex<ScanState>,
    radio_state: Mutex<RadioState>,
    powered_on: Mutex<Option<PoweredOnHook>>,
    verbose: AtomicBool,
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("default_strategy", &self.default_strategy.kind())
            .field("verbose", &self.verbose.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Scanner {
    /// Create a scanner with `default_strategy` active and scanning off.
    pub fn new(radio: Arc<dyn Radio>, default_strategy: Arc<dyn ScanStrategy>) -> Self {
        Self {
            radio,
            state: Mutex::new(ScanState {
                scanning: false,
                strategy: Arc::clone(&default_strategy),
                on_discovered: None,
                address_filter: None,
            }),
            default_strategy,
            radio_state: Mutex::new(RadioState::Unknown),
            powered_on: Mutex::new(None),
            verbose: AtomicBool::new(false),
        }
    }

    /// Whether a scan is active.
    pub async fn is_scanning(&self) -> bool {
        self.state.lock().await.scanning
    }

    /// Kind of the active strategy.
    pub async fn strategy_kind(&self) -> StrategyKind {
        self.state.lock().await.strategy.kind()
    }

    /// Switch strategy and make sure the radio is scanning.
    ///
    /// If a scan is already running it continues with the new strategy; the
    /// hardware scan is not restarted. Returns `Ok(false)` when the radio is
    /// not powered on: the request is denied and scanning is flagged off.
    pub async fn scan(
        &self,
        strategy: Arc<dyn ScanStrategy>,
        on_discovered: Option<DiscoveredCallback>,
        address_filter: Option<Vec<SensorId>>,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        info!(strategy = %strategy.kind(), "Scan requested");
        state.strategy = strategy;
        state.on_discovered = on_discovered;
        state.address_filter = address_filter;
        self.start_locked(&mut state).await
    }

    /// Return to the default strategy, keeping the discovery callback.
    pub async fn scan_default(&self) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.strategy = Arc::clone(&self.default_strategy);
        state.address_filter = None;
        self.start_locked(&mut state).await
    }

    /// Restart scanning with whatever strategy is active.
    pub async fn resume_scanning(&self) -> Result<bool> {
        let mut state = self.state.lock().await;
        self.start_locked(&mut state).await
    }

    async fn start_locked(&self, state: &mut ScanState) -> Result<bool> {
        if self.radio.state().await != RadioState::PoweredOn {
            warn!("Radio not powered on, scan denied");
            state.scanning = false;
            return Ok(false);
        }
        if state.scanning {
            debug!("Already scanning, continuing");
            return Ok(true);
        }
        self.radio.start_scan().await?;
        state.scanning = true;
        debug!("Scan started");
        Ok(true)
    }

    /// Stop the hardware scan; resolves once the radio confirms.
    pub async fn stop_scanning(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.scanning {
            return Ok(());
        }
        state.scanning = false;
        self.radio.stop_scan().await?;
        debug!("Scan stopped");
        Ok(())
    }

    /// Register the hook fired each time the radio becomes powered.
    pub async fn powered_on(&self, hook: PoweredOnHook) {
        *self.powered_on.lock().await = Some(hook);
    }

    /// Flip verbose discovery logging; returns the new setting.
    pub fn toggle_verbose(&self) -> bool {
        let verbose = !self.verbose.fetch_xor(true, Ordering::Relaxed);
        info!("Verbose discovery logging {}", if verbose { "on" } else { "off" });
        verbose
    }

    /// Whether verbose discovery logging is on.
    pub fn is_verbose(&self) -> bool {
        self.verbose.load(Ordering::Relaxed)
    }

    /// Worker loop: dispatch radio events until cancelled.
    ///
    /// Returns `Err` only for a fatal error raised by a strategy.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut events = self.radio.events().await?;
        let initial = self.radio.state().await;
        self.on_state(initial).await;

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Scanner stopping");
                    return Ok(());
                }
                event = events.next() => event,
            };
            let Some(event) = event else {
                warn!("Radio event stream ended");
                return Ok(());
            };
            match event {
                RadioEvent::StateChanged(state) => self.on_state(state).await,
                RadioEvent::Discovered(discovery) => self.dispatch(discovery).await?,
            }
        }
    }

    async fn on_state(&self, state: RadioState) {
        let previous = std::mem::replace(&mut *self.radio_state.lock().await, state);
        if previous == state {
            return;
        }
        info!(?previous, ?state, "Radio state changed");

        if state != RadioState::PoweredOn {
            self.state.lock().await.scanning = false;
            return;
        }
        let hook = self.powered_on.lock().await.clone();
        if let Some(hook) = hook {
            hook().await;
        }
    }

    async fn dispatch(&self, discovery: Discovery) -> Result<()> {
        let (strategy, on_discovered) = {
            let state = self.state.lock().await;
            if !state.scanning {
                trace!(address = %discovery.address, "Dropping discovery while not scanning");
                return Ok(());
            }
            if let Some(filter) = &state.address_filter {
                let wanted = discovery
                    .sensor_id()
                    .is_some_and(|id| filter.contains(&id));
                if !wanted {
                    return Ok(());
                }
            }
            (Arc::clone(&state.strategy), state.on_discovered.clone())
        };

        let rssi = discovery.rssi;
        let trigger = discovery.trigger();
        if self.is_verbose() {
            info!(
                name = ?discovery.local_name,
                address = %discovery.address,
                rssi = ?rssi,
                %trigger,
                "Discovered"
            );
        } else {
            trace!(
                name = ?discovery.local_name,
                address = %discovery.address,
                rssi = ?discovery.rssi,
                "Discovered"
            );
        }

        match strategy.on_discover(self, discovery).await {
            Ok(Some(sensor)) => {
                if let Some(callback) = on_discovered {
                    callback(SensorEvent::Discovered {
                        id: sensor.id().clone(),
                        rssi,
                        trigger,
                    });
                }
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(strategy = %strategy.kind(), "Strategy failed: {}", e);
                Ok(())
            }
        }
    }
}
