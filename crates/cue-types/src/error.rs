//! Error types for data parsing in cue-types.

use thiserror::Error;

/// Errors that can occur when parsing sensor or control-channel data.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in cue-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The sensor identifier is empty or contains characters that are not
    /// part of a hardware address.
    #[error("Invalid sensor id: '{0}'")]
    InvalidSensorId(String),

    /// A control-channel frame could not be decoded into a command.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// An unknown pub/sub topic name.
    #[error("Unknown topic: '{0}'")]
    UnknownTopic(String),
}

/// Result type alias using cue-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
