//! Messages exchanged over the local control channel.
//!
//! Every frame is a JSON object with an `action` and an optional
//! `payload`:
//!
//! ```json
//! { "action": "CALIBRATION_MODE", "payload": { "sensorId": "00a050cf66d7" } }
//! ```
//!
//! The lowercase action names used by the first mobile app release
//! (`pairing`, `calibration`, `disconnect`) are still accepted.

use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::types::SensorId;

/// A command received from a control-channel client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// Accept the next unknown sensor whose button is pressed.
    #[serde(alias = "pairing")]
    PairingMode,
    /// Connect to a known sensor and hold the link for probing.
    #[serde(alias = "calibration", rename_all = "camelCase")]
    CalibrationMode {
        /// Sensor the client wants to calibrate.
        sensor_id: SensorId,
    },
    /// Run the probe sequence on the held calibration sensor.
    #[serde(rename_all = "camelCase")]
    CalibrationProbe {
        /// Index reported with the first probe.
        #[serde(default = "first_probe_index")]
        probe_index: u32,
        /// Number of probes to take.
        probe_count: u32,
        /// Control-channel address that should receive probe replies.
        #[serde(default)]
        address: Option<String>,
    },
    /// Abort calibration and return to listening.
    CalibrationEnd,
    /// Replace the known-sensor registry.
    SyncSensors {
        /// Every sensor that belongs to this station.
        sensors: Vec<SensorId>,
    },
    /// Return to the default listening scan.
    ListeningMode,
    /// Drop the link to whatever sensor is currently connected.
    #[serde(alias = "disconnect")]
    DisconnectSensor,
    /// Clear the known-sensor registry.
    ForgetSensors,
    /// Toggle verbose discovery logging.
    Debug,
    /// Stop scanning and go idle.
    Stop,
    /// Diagnostic: connect to the next known sensor and hold the link.
    Connect,
}

fn first_probe_index() -> u32 {
    1
}

impl Command {
    /// Parse a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self, ParseError> {
        serde_json::from_str(text).map_err(|e| ParseError::InvalidCommand(e.to_string()))
    }

    /// The wire name of this command, for logging.
    pub fn action(&self) -> &'static str {
        match self {
            Command::PairingMode => "PAIRING_MODE",
            Command::CalibrationMode { .. } => "CALIBRATION_MODE",
            Command::CalibrationProbe { .. } => "CALIBRATION_PROBE",
            Command::CalibrationEnd => "CALIBRATION_END",
            Command::SyncSensors { .. } => "SYNC_SENSORS",
            Command::ListeningMode => "LISTENING_MODE",
            Command::DisconnectSensor => "DISCONNECT_SENSOR",
            Command::ForgetSensors => "FORGET_SENSORS",
            Command::Debug => "DEBUG",
            Command::Stop => "STOP",
            Command::Connect => "CONNECT",
        }
    }
}

/// A reply sent back to one control-channel client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reply {
    /// The calibration sensor is connected and ready for probing.
    #[serde(rename_all = "camelCase")]
    CalibrationMode {
        /// The connected sensor.
        sensor_id: SensorId,
    },
    /// One audio level probe.
    #[serde(rename_all = "camelCase")]
    CalibrationProbe {
        /// Audio level, unsigned byte.
        reading: u8,
        /// Position of this probe in the run.
        probe_index: u32,
        /// The probed sensor.
        sensor_id: SensorId,
    },
    /// A protocol-level failure the client should know about.
    Error {
        /// Human readable description.
        message: String,
    },
}

impl Reply {
    /// Shorthand for an error reply.
    pub fn error(message: impl Into<String>) -> Self {
        Reply::Error {
            message: message.into(),
        }
    }

    /// Encode as a JSON text frame.
    pub fn to_json(&self) -> String {
        // Serializing these variants cannot fail: every field is a string or integer.
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{\"action\":\"ERROR\"}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> SensorId {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_unit_commands() {
        assert_eq!(
            Command::from_json(r#"{"action":"PAIRING_MODE"}"#).unwrap(),
            Command::PairingMode
        );
        assert_eq!(
            Command::from_json(r#"{"action":"STOP"}"#).unwrap(),
            Command::Stop
        );
        assert_eq!(
            Command::from_json(r#"{"action":"FORGET_SENSORS"}"#).unwrap(),
            Command::ForgetSensors
        );
    }

    #[test]
    fn test_parse_legacy_action_names() {
        assert_eq!(
            Command::from_json(r#"{"action":"pairing"}"#).unwrap(),
            Command::PairingMode
        );
        assert_eq!(
            Command::from_json(r#"{"action":"disconnect"}"#).unwrap(),
            Command::DisconnectSensor
        );
    }

    #[test]
    fn test_parse_calibration_mode() {
        let cmd = Command::from_json(
            r#"{"action":"CALIBRATION_MODE","payload":{"sensorId":"00:A0:50:CF:66:D7"}}"#,
        )
        .unwrap();
        assert_eq!(
            cmd,
            Command::CalibrationMode {
                sensor_id: id("00a050cf66d7")
            }
        );
    }

    #[test]
    fn test_parse_calibration_probe_defaults() {
        let cmd =
            Command::from_json(r#"{"action":"CALIBRATION_PROBE","payload":{"probeCount":3}}"#)
                .unwrap();
        assert_eq!(
            cmd,
            Command::CalibrationProbe {
                probe_index: 1,
                probe_count: 3,
                address: None
            }
        );
    }

    #[test]
    fn test_parse_sync_sensors() {
        let cmd = Command::from_json(
            r#"{"action":"SYNC_SENSORS","payload":{"sensors":["00a050cf66d7","00a050596aa0"]}}"#,
        )
        .unwrap();
        match cmd {
            Command::SyncSensors { sensors } => assert_eq!(sensors.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Command::from_json("not json").is_err());
        assert!(Command::from_json(r#"{"action":"SELF_DESTRUCT"}"#).is_err());
        let err = Command::from_json(r#"{"action":"SYNC_SENSORS","payload":{"sensors":[""]}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("Invalid command"));
    }

    #[test]
    fn test_reply_encoding() {
        let reply = Reply::CalibrationProbe {
            reading: 42,
            probe_index: 2,
            sensor_id: id("00a050cf66d7"),
        };
        let json: serde_json::Value = serde_json::from_str(&reply.to_json()).unwrap();
        assert_eq!(json["action"], "CALIBRATION_PROBE");
        assert_eq!(json["payload"]["reading"], 42);
        assert_eq!(json["payload"]["probeIndex"], 2);
        assert_eq!(json["payload"]["sensorId"], "00a050cf66d7");

        let json: serde_json::Value =
            serde_json::from_str(&Reply::error("boom").to_json()).unwrap();
        assert_eq!(json["action"], "ERROR");
        assert_eq!(json["payload"]["message"], "boom");
    }
}
