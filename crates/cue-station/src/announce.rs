//! Startup announcements and the offline publisher.

use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use cue_core::{Publisher, Result, Topic};

/// Payload of the `initialize` event.
pub fn initialize_payload(station_id: &str) -> Value {
    json!({ "base_station_UUID": station_id })
}

/// Payload of the `update-websocket` event.
pub fn websocket_payload(addr: SocketAddr) -> Value {
    json!({
        "base_station_port": addr.port(),
        "base_station_address": addr.ip().to_string(),
    })
}

/// Address clients should use to reach a listener bound to `bound`.
///
/// A wildcard bind is replaced by the address of the interface that routes
/// to the outside world. No packet is sent.
pub async fn advertised_address(bound: SocketAddr) -> SocketAddr {
    if !bound.ip().is_unspecified() {
        return bound;
    }
    match outbound_ip(bound.ip()).await {
        Ok(ip) => SocketAddr::new(ip, bound.port()),
        Err(e) => {
            debug!("Could not determine outbound interface: {}", e);
            bound
        }
    }
}

async fn outbound_ip(family: IpAddr) -> std::io::Result<IpAddr> {
    let (local, probe) = match family {
        IpAddr::V4(_) => ("0.0.0.0:0", "192.0.2.1:9"),
        IpAddr::V6(_) => ("[::]:0", "[2001:db8::1]:9"),
    };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(probe).await?;
    Ok(socket.local_addr()?.ip())
}

/// Publish the startup events.
pub async fn announce(publisher: &dyn Publisher, topic: Topic, payload: Value) {
    match publisher.publish(topic, payload).await {
        Ok(()) => info!(%topic, "Announced"),
        Err(e) => warn!(%topic, "Failed to announce: {}", e),
    }
}

/// Publisher used when MQTT is disabled: events only go to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPublisher;

#[async_trait]
impl Publisher for LogPublisher {
    async fn publish(&self, topic: Topic, payload: Value) -> Result<()> {
        info!(%topic, %payload, "Event");
        Ok(())
    }
}
