//! Engine tuning knobs.

use std::time::Duration;

use cue_types::PRODUCT_NAME;

/// Default watchdog window for a connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default watchdog window for a disconnect attempt.
pub const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default sampling interval of the link-state watchdog.
pub const DEFAULT_LINK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Default delay before each calibration probe.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(5);

/// Default length of the pairing window.
pub const DEFAULT_PAIRING_WINDOW: Duration = Duration::from_secs(30);

/// Configuration for the discovery and session engine.
///
/// # Example
///
/// ```
/// use cue_core::EngineConfig;
/// use std::time::Duration;
///
/// let config = EngineConfig::default()
///     .connect_timeout(Duration::from_secs(15))
///     .pairing_window(Duration::from_secs(60));
/// assert_eq!(config.product_name, "home-cue");
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Advertised local name a peripheral must carry to be considered.
    pub product_name: String,
    /// Watchdog window for connect.
    pub connect_timeout: Duration,
    /// Watchdog window for disconnect.
    pub disconnect_timeout: Duration,
    /// How often the watchdog samples the hardware link state.
    pub link_poll_interval: Duration,
    /// Delay before each calibration probe.
    pub probe_interval: Duration,
    /// How long pairing mode stays armed without a new sensor.
    pub pairing_window: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            product_name: PRODUCT_NAME.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            disconnect_timeout: DEFAULT_DISCONNECT_TIMEOUT,
            link_poll_interval: DEFAULT_LINK_POLL_INTERVAL,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            pairing_window: DEFAULT_PAIRING_WINDOW,
        }
    }
}

impl EngineConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the expected product name.
    #[must_use]
    pub fn product_name(mut self, name: impl Into<String>) -> Self {
        self.product_name = name.into();
        self
    }

    /// Set the connect watchdog window.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the disconnect watchdog window.
    #[must_use]
    pub fn disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout = timeout;
        self
    }

    /// Set the link-state sampling interval.
    #[must_use]
    pub fn link_poll_interval(mut self, interval: Duration) -> Self {
        self.link_poll_interval = interval;
        self
    }

    /// Set the delay before each calibration probe.
    #[must_use]
    pub fn probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Set the pairing window.
    #[must_use]
    pub fn pairing_window(mut self, window: Duration) -> Self {
        self.pairing_window = window;
        self
    }
}
