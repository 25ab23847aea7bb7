//! Domain events emitted by the engine.
//!
//! Strategies and the calibration protocol report what happened through an
//! [`EventDispatcher`]; the mode controller relays the events upstream and
//! reacts to some of them (a new sensor closes the pairing window, a
//! connected calibration sensor is announced to the requesting client).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use cue_types::{SensorId, Trigger};

/// Events emitted while scanning and operating sensors.
///
/// All events are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum SensorEvent {
    /// A strategy accepted a discovery.
    Discovered {
        id: SensorId,
        rssi: Option<i16>,
        trigger: Trigger,
    },
    /// A known sensor checked in.
    Heartbeat {
        id: SensorId,
        rssi: Option<i16>,
        battery_level: Option<u8>,
    },
    /// A known sensor heard something.
    AudioTrigger { id: SensorId },
    /// A sensor was paired.
    NewSensor { id: SensorId },
    /// A sensor link is being held open.
    Connected { id: SensorId },
    /// A held sensor link was closed.
    Disconnected { id: SensorId },
    /// A calibration run wrote a new threshold.
    CalibrationFinished { id: SensorId, threshold: u8 },
}

impl SensorEvent {
    /// The sensor this event is about.
    pub fn sensor_id(&self) -> &SensorId {
        match self {
            SensorEvent::Discovered { id, .. }
            | SensorEvent::Heartbeat { id, .. }
            | SensorEvent::AudioTrigger { id }
            | SensorEvent::NewSensor { id }
            | SensorEvent::Connected { id }
            | SensorEvent::Disconnected { id }
            | SensorEvent::CalibrationFinished { id, .. } => id,
        }
    }
}

/// Sender for sensor events.
pub type EventSender = broadcast::Sender<SensorEvent>;

/// Receiver for sensor events.
pub type EventReceiver = broadcast::Receiver<SensorEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: SensorEvent) {
        // No receivers is fine.
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> SensorId {
        "00a050cf66d7".parse().unwrap()
    }

    #[tokio::test]
    async fn test_dispatcher_fans_out() {
        let dispatcher = EventDispatcher::default();
        let mut a = dispatcher.subscribe();
        let mut b = dispatcher.subscribe();
        assert_eq!(dispatcher.receiver_count(), 2);

        dispatcher.send(SensorEvent::NewSensor { id: id() });
        assert_eq!(a.recv().await.unwrap(), SensorEvent::NewSensor { id: id() });
        assert_eq!(b.recv().await.unwrap(), SensorEvent::NewSensor { id: id() });
    }

    #[test]
    fn test_send_without_receivers() {
        let dispatcher = EventDispatcher::new(4);
        dispatcher.send(SensorEvent::AudioTrigger { id: id() });
    }

    #[test]
    fn test_event_serialization() {
        let event = SensorEvent::Heartbeat {
            id: id(),
            rssi: Some(-61),
            battery_level: None,
        };
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "heartbeat");
        assert_eq!(json["id"], "00a050cf66d7");
        assert_eq!(json["rssi"], -61);

        let event = SensorEvent::Discovered {
            id: id(),
            rssi: None,
            trigger: Trigger::Button,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["trigger"], "button");
        assert_eq!(event.sensor_id(), &id());
    }
}
