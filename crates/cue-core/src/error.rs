//! Error types for cue-core.
//!
//! # Propagation
//!
//! Most failures are handled where they happen: a strategy that cannot read a
//! characteristic or loses its link disconnects the sensor and resumes
//! scanning. The exception is a hung connect attempt.
//!
//! | Error | Handling |
//! |-------|----------|
//! | [`Error::ConnectionTimeout`] on connect | Propagated out of the scan worker, process-fatal |
//! | [`Error::ConnectionTimeout`] on disconnect | Logged, scanning continues |
//! | [`Error::CharacteristicNotFound`] | Aborts the current protocol step |
//! | [`Error::RegistryPersist`] | Logged; in-memory registry is kept |
//! | [`Error::RadioNotReady`] | Scan request denied |
//!
//! Use [`Error::is_fatal`] to tell the two timeout cases apart.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Which edge of the link lifecycle an operation was driving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEdge {
    /// Disconnected to connected.
    Connect,
    /// Connected to disconnected.
    Disconnect,
}

impl fmt::Display for LinkEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkEdge::Connect => write!(f, "connect"),
            LinkEdge::Disconnect => write!(f, "disconnect"),
        }
    }
}

/// Errors raised by the discovery and session engine.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error from the host radio stack.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// The link watchdog fired before the radio confirmed the transition.
    #[error("Sensor {operation} timed out after {duration:?}")]
    ConnectionTimeout {
        /// The edge that hung.
        operation: LinkEdge,
        /// The watchdog window.
        duration: Duration,
    },

    /// The sensor does not expose a characteristic, even after discovery.
    #[error("Characteristic not found: {uuid} ({available} characteristics discovered)")]
    CharacteristicNotFound {
        /// The UUID that was requested.
        uuid: String,
        /// How many characteristics the sensor did expose.
        available: usize,
    },

    /// Characteristic I/O attempted without an open link.
    #[error("Sensor is not connected")]
    NotConnected,

    /// The known-sensor registry could not be written to durable storage.
    #[error("Failed to persist known sensors: {0}")]
    RegistryPersist(String),

    /// Scan requested while the radio is not powered on.
    #[error("Radio is not powered on")]
    RadioNotReady,

    /// Data received from a sensor or a store could not be interpreted.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// An upstream publish failed.
    #[error("Publish failed: {0}")]
    Publish(String),

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a link watchdog timeout.
    pub fn connection_timeout(operation: LinkEdge, duration: Duration) -> Self {
        Self::ConnectionTimeout {
            operation,
            duration,
        }
    }

    /// Create a characteristic not found error.
    pub fn characteristic_not_found(uuid: impl Into<String>, available: usize) -> Self {
        Self::CharacteristicNotFound {
            uuid: uuid.into(),
            available,
        }
    }

    /// Create a registry persistence error.
    pub fn registry_persist(message: impl Into<String>) -> Self {
        Self::RegistryPersist(message.into())
    }

    /// Whether this error means the radio stack is wedged.
    ///
    /// Only a connect attempt that never resolved qualifies; the station
    /// answers it with a reboot.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConnectionTimeout {
                operation: LinkEdge::Connect,
                ..
            }
        )
    }
}

impl From<cue_types::ParseError> for Error {
    fn from(err: cue_types::ParseError) -> Self {
        Error::InvalidData(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidData(err.to_string())
    }
}

/// Result type alias using cue-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::connection_timeout(LinkEdge::Connect, Duration::from_secs(10));
        assert_eq!(err.to_string(), "Sensor connect timed out after 10s");

        let err = Error::characteristic_not_found("c0e50001", 3);
        assert!(err.to_string().contains("c0e50001"));
        assert!(err.to_string().contains("3 characteristics"));

        let err = Error::NotConnected;
        assert_eq!(err.to_string(), "Sensor is not connected");

        let err = Error::registry_persist("disk full");
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_only_connect_timeout_is_fatal() {
        assert!(Error::connection_timeout(LinkEdge::Connect, Duration::from_secs(1)).is_fatal());
        assert!(
            !Error::connection_timeout(LinkEdge::Disconnect, Duration::from_secs(1)).is_fatal()
        );
        assert!(!Error::NotConnected.is_fatal());
        assert!(!Error::RadioNotReady.is_fatal());
        assert!(!Error::characteristic_not_found("x", 0).is_fatal());
    }

    #[test]
    fn test_btleplug_error_conversion() {
        fn _assert_from_impl<T: From<btleplug::Error>>() {}
        _assert_from_impl::<Error>();
    }

    #[test]
    fn test_parse_error_conversion() {
        let parse = "".parse::<cue_types::SensorId>().unwrap_err();
        let err: Error = parse.into();
        assert!(matches!(err, Error::InvalidData(_)));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }
}
