//! MQTT publisher for station events.
//!
//! Every event is published as a JSON payload to `{topic_root}/{topic}`,
//! where the topic root defaults to `/devices/{station}/events`:
//!
//! - `.../initialize` - Station came online (`base_station_UUID`)
//! - `.../update-websocket` - Control channel address
//! - `.../new-sensor` - A sensor was paired
//! - `.../notification` - A known sensor triggered
//! - `.../heartbeat` - Signal strength of a touched sensor
//! - `.../calibration` - New trigger threshold
//!
//! # Example Configuration
//!
//! ```toml
//! [mqtt]
//! enabled = true
//! broker = "mqtts://broker.example.com"
//! username = "station"
//! password = "secret"
//! qos = 1
//! ```
//!
//! # Reconnection
//!
//! The client reconnects on its own when the connection drops. Connection
//! errors are logged and never stop the station.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cue_core::{Error, Publisher, Result, Topic};

use crate::config::MqttConfig;

/// Publishes station events to an MQTT broker.
#[derive(Debug, Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    topic_root: String,
    qos: QoS,
}

impl MqttPublisher {
    /// Connect to the configured broker.
    ///
    /// Spawns the client event loop, which runs until `cancel` fires.
    pub fn connect(
        config: &MqttConfig,
        station_id: &str,
        cancel: CancellationToken,
    ) -> std::result::Result<Self, MqttError> {
        let (host, port, use_tls) =
            parse_broker_url(&config.broker).map_err(MqttError::InvalidBroker)?;

        let client_id = config.client_id.as_deref().unwrap_or(station_id);
        let mut mqtt_options = MqttOptions::new(client_id, host, port);
        mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            mqtt_options.set_credentials(username, password);
        }
        if use_tls {
            mqtt_options.set_transport(rumqttc::Transport::tls_with_default_config());
        }

        let (client, mut eventloop) = AsyncClient::new(mqtt_options, 100);
        let topic_root = config.topic_root_for(station_id);
        info!(
            "MQTT publisher connecting to {} under '{}'",
            config.broker, topic_root
        );

        tokio::spawn(async move {
            loop {
                let polled = tokio::select! {
                    _ = cancel.cancelled() => break,
                    polled = eventloop.poll() => polled,
                };
                match polled {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        info!("MQTT connected: {:?}", ack);
                    }
                    Ok(Event::Incoming(Packet::PubAck(ack))) => {
                        debug!("MQTT publish acknowledged: {}", ack.pkid);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("MQTT connection error: {}. Reconnecting...", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
            debug!("MQTT event loop stopped");
        });

        Ok(Self {
            client,
            topic_root,
            qos: qos_level(config.qos),
        })
    }

    /// Full topic name for `topic`.
    pub fn topic_for(&self, topic: Topic) -> String {
        full_topic(&self.topic_root, topic)
    }

    /// Disconnect from the broker.
    pub async fn disconnect(&self) {
        if let Err(e) = self.client.disconnect().await {
            debug!("Error disconnecting MQTT client: {}", e);
        }
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, topic: Topic, payload: Value) -> Result<()> {
        let body = serde_json::to_vec(&payload).map_err(|e| Error::Publish(e.to_string()))?;
        let name = self.topic_for(topic);
        self.client
            .publish(&name, self.qos, false, body)
            .await
            .map_err(|e| Error::Publish(e.to_string()))?;
        debug!(topic = %name, "Published event");
        Ok(())
    }
}

/// MQTT setup errors.
#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    #[error("Invalid MQTT broker URL: {0}")]
    InvalidBroker(String),
}

fn qos_level(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

fn full_topic(root: &str, topic: Topic) -> String {
    format!("{}/{}", root, sanitize_topic_segment(topic.as_str()))
}

/// Parse an MQTT broker URL into (host, port, use_tls).
fn parse_broker_url(url: &str) -> std::result::Result<(String, u16, bool), String> {
    let (scheme, rest) = if let Some(stripped) = url.strip_prefix("mqtt://") {
        ("mqtt", stripped)
    } else if let Some(stripped) = url.strip_prefix("mqtts://") {
        ("mqtts", stripped)
    } else {
        return Err("Invalid scheme: URL must start with mqtt:// or mqtts://".to_string());
    };

    let use_tls = scheme == "mqtts";
    let default_port = if use_tls { 8883 } else { 1883 };
    let rest = rest.trim_end_matches('/');

    let (host, port) = if let Some((h, p)) = rest.rsplit_once(':') {
        let port = p
            .parse::<u16>()
            .map_err(|_| format!("Invalid port: {}", p))?;
        (h.to_string(), port)
    } else {
        (rest.to_string(), default_port)
    };

    if host.is_empty() {
        return Err("Host cannot be empty".to_string());
    }

    Ok((host, port, use_tls))
}

/// MQTT topics cannot contain '#' or '+' wildcards.
fn sanitize_topic_segment(s: &str) -> String {
    s.replace(['#', '+', ' ', '/'], "_")
}
