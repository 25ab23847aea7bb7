//! Seams to the transports around the engine.
//!
//! The engine publishes to an upstream pub/sub broker through [`Publisher`]
//! and answers control-channel clients through [`ControlChannel`]. The
//! station binary provides MQTT and WebSocket implementations.

use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;
use serde_json::{Value, json};

use cue_types::{Reply, Topic};

use crate::error::Result;
use crate::events::SensorEvent;

/// Upstream publish capability.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish one JSON payload to a topic.
    async fn publish(&self, topic: Topic, payload: Value) -> Result<()>;
}

/// Address of one control-channel connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientAddress(String);

impl ClientAddress {
    /// Wrap an address string.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// The address as text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<SocketAddr> for ClientAddress {
    fn from(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }
}

impl From<String> for ClientAddress {
    fn from(addr: String) -> Self {
        Self(addr)
    }
}

impl fmt::Display for ClientAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reply-to-address capability of the control channel.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Send a reply to one connected client.
    async fn reply(&self, to: &ClientAddress, reply: Reply) -> Result<()>;
}

/// Map a sensor event to the topic and payload it is published under.
///
/// Events that only matter locally return `None`.
pub fn topic_payload(event: &SensorEvent) -> Option<(Topic, Value)> {
    match event {
        SensorEvent::NewSensor { id } => Some((Topic::NewSensor, json!({ "id": id }))),
        SensorEvent::AudioTrigger { id } => Some((Topic::Notification, json!({ "id": id }))),
        SensorEvent::Heartbeat {
            id,
            rssi,
            battery_level,
        } => Some((
            Topic::Heartbeat,
            json!({
                "id": id,
                "signal_strength": rssi,
                "battery_level": battery_level,
            }),
        )),
        SensorEvent::CalibrationFinished { id, threshold } => Some((
            Topic::Calibration,
            json!({ "id": id, "threshold": threshold }),
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cue_types::SensorId;

    fn id() -> SensorId {
        "00a050596aa0".parse().unwrap()
    }

    #[test]
    fn test_topic_mapping() {
        let (topic, payload) = topic_payload(&SensorEvent::NewSensor { id: id() }).unwrap();
        assert_eq!(topic, Topic::NewSensor);
        assert_eq!(payload, json!({ "id": "00a050596aa0" }));

        let (topic, _) = topic_payload(&SensorEvent::AudioTrigger { id: id() }).unwrap();
        assert_eq!(topic, Topic::Notification);

        let (topic, payload) = topic_payload(&SensorEvent::Heartbeat {
            id: id(),
            rssi: Some(-70),
            battery_level: None,
        })
        .unwrap();
        assert_eq!(topic, Topic::Heartbeat);
        assert_eq!(payload["signal_strength"], -70);
        assert!(payload["battery_level"].is_null());

        let (topic, payload) = topic_payload(&SensorEvent::CalibrationFinished {
            id: id(),
            threshold: 12,
        })
        .unwrap();
        assert_eq!(topic, Topic::Calibration);
        assert_eq!(payload["threshold"], 12);
    }

    #[test]
    fn test_local_events_are_not_published() {
        assert!(topic_payload(&SensorEvent::Connected { id: id() }).is_none());
        assert!(topic_payload(&SensorEvent::Disconnected { id: id() }).is_none());
    }

    #[test]
    fn test_client_address() {
        let addr: SocketAddr = "192.168.1.20:51234".parse().unwrap();
        let client = ClientAddress::from(addr);
        assert_eq!(client.as_str(), "192.168.1.20:51234");
        assert_eq!(client, ClientAddress::new("192.168.1.20:51234"));
    }
}
