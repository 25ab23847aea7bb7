//! WebSocket control channel.
//!
//! Clients connect to `/` and exchange JSON frames of the form
//! `{ "action": "...", "payload": {...} }`. Each connection is known by its
//! peer socket address; replies from the engine are routed back through
//! [`ControlHub`].

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    extract::{
        ConnectInfo, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

use cue_core::{ClientAddress, Command, ControlChannel, Error, ModeController, Reply, Result};

/// Connected control-channel clients.
#[derive(Debug, Default)]
pub struct ControlHub {
    clients: RwLock<HashMap<ClientAddress, mpsc::UnboundedSender<Reply>>>,
}

impl ControlHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and return the queue of replies addressed to it.
    pub async fn register(&self, client: ClientAddress) -> mpsc::UnboundedReceiver<Reply> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.clients.write().await.insert(client.clone(), tx).is_some() {
            debug!(%client, "Replaced stale connection");
        }
        rx
    }

    /// Forget a connection.
    pub async fn unregister(&self, client: &ClientAddress) {
        self.clients.write().await.remove(client);
    }

    /// Whether `client` is connected.
    pub async fn is_connected(&self, client: &ClientAddress) -> bool {
        self.clients.read().await.contains_key(client)
    }

    /// Number of connected clients.
    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Whether no client is connected.
    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }

    /// Decide who receives the probe replies of a `CALIBRATION_PROBE`.
    ///
    /// An explicit `address` wins only when it names a connected client;
    /// otherwise the sender gets them.
    pub async fn route(&self, from: &ClientAddress, command: Command) -> Command {
        match command {
            Command::CalibrationProbe {
                probe_index,
                probe_count,
                address: Some(address),
            } => {
                let target = ClientAddress::new(address);
                let address = if self.is_connected(&target).await {
                    Some(target.to_string())
                } else {
                    debug!(%from, %target, "Probe reply address not connected, replying to sender");
                    None
                };
                Command::CalibrationProbe {
                    probe_index,
                    probe_count,
                    address,
                }
            }
            other => other,
        }
    }
}

#[async_trait]
impl ControlChannel for ControlHub {
    async fn reply(&self, to: &ClientAddress, reply: Reply) -> Result<()> {
        let clients = self.clients.read().await;
        let sender = clients
            .get(to)
            .ok_or_else(|| Error::Publish(format!("control client {} is not connected", to)))?;
        sender
            .send(reply)
            .map_err(|_| Error::Publish(format!("control client {} went away", to)))
    }
}

/// State shared by all control connections.
#[derive(Clone)]
pub struct ControlState {
    /// Reply routing.
    pub hub: Arc<ControlHub>,
    /// Engine that executes the commands.
    pub controller: Arc<ModeController>,
}

/// Create the control channel router.
pub fn router(state: ControlState) -> Router {
    Router::new().route("/", get(ws_handler)).with_state(state)
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<ControlState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, ClientAddress::from(peer), state))
}

/// Decode one text frame.
///
/// Frames that are not a known command produce the `ERROR` reply to send
/// back.
pub fn parse_frame(text: &str) -> std::result::Result<Command, Reply> {
    Command::from_json(text).map_err(|e| Reply::error(e.to_string()))
}

async fn handle_socket(socket: WebSocket, client: ClientAddress, state: ControlState) {
    let (mut sender, mut receiver) = socket.split();
    let mut outbox = state.hub.register(client.clone()).await;

    info!(%client, "Control client connected");

    let mut send_task = tokio::spawn(async move {
        while let Some(reply) = outbox.recv().await {
            if sender
                .send(Message::Text(reply.to_json().into()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    let recv_state = state.clone();
    let recv_client = client.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Text(text)) => match parse_frame(text.as_str()) {
                    Ok(command) => {
                        let command = recv_state.hub.route(&recv_client, command).await;
                        recv_state.controller.handle(&recv_client, command).await;
                    }
                    Err(reply) => {
                        warn!(client = %recv_client, "Unparseable control frame: {}", text.as_str());
                        if let Err(e) = recv_state.hub.reply(&recv_client, reply).await {
                            debug!("Failed to send error reply: {}", e);
                        }
                    }
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("WebSocket receive error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        },
        _ = &mut recv_task => {
            send_task.abort();
        },
    }

    state.hub.unregister(&client).await;
    info!(%client, "Control client disconnected");
}

/// Bind the control listener, walking up from the configured port while
/// the address is in use.
pub async fn bind_with_fallback(bind: &str, max_attempts: u16) -> io::Result<TcpListener> {
    let addr: SocketAddr = bind.parse().map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid bind address '{}': {}", bind, e),
        )
    })?;

    let mut last_error = None;
    for attempt in 0..max_attempts.max(1) {
        let Some(port) = addr.port().checked_add(attempt) else {
            break;
        };
        let candidate = SocketAddr::new(addr.ip(), port);
        match TcpListener::bind(candidate).await {
            Ok(listener) => {
                if attempt > 0 {
                    info!("Port {} in use, control channel bound to {}", addr.port(), candidate);
                }
                return Ok(listener);
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                debug!("Address {} in use", candidate);
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::AddrInUse, format!("no free port from {}", addr))
    }))
}
