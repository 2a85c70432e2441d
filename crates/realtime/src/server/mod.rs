//! WebSocket relay for realtime channels.
//!
//! The relay accepts WebSocket connections speaking the protocol in
//! [`crate::wire`]. Every connection must open with `hello`; after that its
//! events are acknowledged and fanned out to the other members of the same
//! channel. When a member's socket closes the relay publishes a `leave` event
//! on its behalf so peers drop it from their presence.
//!
//! # Example
//!
//! ```ignore
//! use realtime::server::{RelayServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = RelayServer::new(ServerConfig::with_port(8080));
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod connection;

pub use connection::{
    AdmitError, AllowListAuthorizer, ConnectionId, ConnectionManager, ConnectionState, HelloAuthorizer,
    RelayConnection, SendError, TenantChannelAuthorizer,
};

use crate::event::{EventKind, RealtimeEvent};
use crate::wire::{ClientFrame, ServerFrame, WireError};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Relay configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_address: String,
    /// Port to listen on.
    pub port: u16,
    /// Maximum total connections.
    pub max_connections: usize,
    /// Maximum connections per channel.
    pub max_connections_per_channel: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            max_connections: 1000,
            max_connections_per_channel: 100,
        }
    }
}

impl ServerConfig {
    /// Create a new configuration with the specified port.
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    pub fn with_bind_address(mut self, address: impl Into<String>) -> Self {
        self.bind_address = address.into();
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_max_connections_per_channel(mut self, max: usize) -> Self {
        self.max_connections_per_channel = max;
        self
    }

    /// Get the full bind address.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

type Connections = Arc<RwLock<ConnectionManager>>;

/// The relay server.
pub struct RelayServer<A: HelloAuthorizer = TenantChannelAuthorizer> {
    config: ServerConfig,
    authorizer: Arc<A>,
    connections: Connections,
    shutdown_tx: broadcast::Sender<()>,
}

impl RelayServer<TenantChannelAuthorizer> {
    /// Create a relay that admits actors to their own tenant's channels.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_authorizer(config, TenantChannelAuthorizer)
    }
}

impl<A: HelloAuthorizer + 'static> RelayServer<A> {
    /// Create a relay with custom admission.
    pub fn with_authorizer(config: ServerConfig, authorizer: A) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            authorizer: Arc::new(authorizer),
            connections: Arc::new(RwLock::new(ConnectionManager::new())),
            shutdown_tx,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get a shutdown handle.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Bind to the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let addr = self.config.socket_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::BindFailed { addr, source })?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!("Realtime relay listening on {}", addr);
        }

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            // Early out before the handshake; admission is decided in try_add
                            let conn_count = self.connections.read().await.connection_count();
                            if conn_count >= self.config.max_connections {
                                tracing::warn!("Max connections reached, rejecting {}", addr);
                                continue;
                            }
                            self.spawn_connection(stream, addr);
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Relay received shutdown signal");
                    break;
                }
            }
        }

        tracing::info!("Relay shutdown complete");
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let authorizer = Arc::clone(&self.authorizer);
        let connections = Arc::clone(&self.connections);
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            tracing::debug!("New connection from {}", addr);

            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    tracing::error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };
            let (mut ws_tx, mut ws_rx) = ws_stream.split();

            let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<ServerFrame>();
            let admitted = connections
                .write()
                .await
                .try_add(RelayConnection::new(frame_tx), config.max_connections);
            let conn_id = match admitted {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!("Rejecting {}: {}", addr, e);
                    if let Ok(json) = ServerFrame::error(e.code(), e.to_string()).to_json() {
                        let _ = ws_tx.send(Message::Text(json.into())).await;
                    }
                    let _ = ws_tx.close().await;
                    return;
                }
            };

            // Outgoing frame forwarder
            let outgoing = tokio::spawn(async move {
                while let Some(frame) = frame_rx.recv().await {
                    match frame.to_json() {
                        Ok(json) => {
                            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::error!("Failed to serialize frame: {}", e);
                        }
                    }
                }
                let _ = ws_tx.close().await;
            });

            loop {
                tokio::select! {
                    msg = ws_rx.next() => {
                        let result = match msg {
                            Some(Ok(Message::Text(text))) => {
                                Self::handle_frame(conn_id, &text, &authorizer, &connections, &config).await
                            }
                            Some(Ok(Message::Binary(_))) => Err(WireError::Unsupported("binary").into()),
                            Some(Ok(Message::Close(_))) | None => {
                                tracing::debug!("Connection {} closed", conn_id);
                                break;
                            }
                            Some(Err(e)) => {
                                tracing::error!("WebSocket error for {}: {}", conn_id, e);
                                break;
                            }
                            Some(Ok(_)) => Ok(()),
                        };
                        if let Err(e) = result {
                            tracing::warn!("Frame handling error for {}: {}", conn_id, e);
                            if let Some(conn) = connections.read().await.get(conn_id) {
                                let _ = conn.send_error("bad_frame", e.to_string());
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("Connection {} received shutdown signal", conn_id);
                        break;
                    }
                }
            }

            Self::cleanup(conn_id, &connections).await;
            // Dropping the last frame sender lets the forwarder flush and close
            let _ = outgoing.await;
        });
    }

    /// Handle a text frame from a peer.
    async fn handle_frame(
        conn_id: ConnectionId,
        text: &str,
        authorizer: &Arc<A>,
        connections: &Connections,
        config: &ServerConfig,
    ) -> Result<(), FrameError> {
        let frame = ClientFrame::from_json(text)?;

        match frame {
            ClientFrame::Hello { actor, channel } => {
                if let Err(reason) = authorizer.authorize(&actor, &channel).await {
                    tracing::warn!("Refusing {} on {}: {}", actor.user.id, channel, reason);
                    if let Some(conn) = connections.read().await.get(conn_id) {
                        conn.send_error("forbidden", reason)?;
                    }
                    return Ok(());
                }

                // Limit check and join happen under one write guard
                let mut conns = connections.write().await;
                let joined = conns.join_channel(
                    conn_id,
                    actor.clone(),
                    channel.clone(),
                    config.max_connections_per_channel,
                );
                let Some(conn) = conns.get(conn_id) else {
                    return Ok(());
                };
                match joined {
                    Ok(members) => {
                        tracing::debug!("{} joined {} as {}", conn_id, channel, actor.user.id);
                        conn.send(ServerFrame::Welcome { channel, members })?;
                    }
                    Err(e) => {
                        tracing::warn!("Refusing {} on {}: {}", actor.user.id, channel, e);
                        conn.send_error(e.code(), e.to_string())?;
                    }
                }
            }

            ClientFrame::Event { event } => {
                let conns = connections.read().await;
                let Some(conn) = conns.get(conn_id) else {
                    return Ok(());
                };
                let (Some(channel), Some(actor)) = (conn.channel(), conn.actor.as_ref()) else {
                    conn.send(ServerFrame::rejected(event.id, "not_joined", "Send hello first"))?;
                    return Ok(());
                };
                if event.user_id != *actor.user_id() || event.tenant_id != actor.tenant_id {
                    conn.send(ServerFrame::rejected(
                        event.id,
                        "forbidden",
                        "Event actor does not match connection",
                    ))?;
                    return Ok(());
                }

                conn.send(ServerFrame::Ack { event_id: event.id })?;
                let reached = conns.broadcast(channel, conn_id, &ServerFrame::Event { event });
                tracing::trace!("Relayed event from {} to {} peers", conn_id, reached);
            }

            ClientFrame::Ping => {
                if let Some(conn) = connections.read().await.get(conn_id) {
                    conn.send(ServerFrame::Pong)?;
                }
            }
        }

        Ok(())
    }

    /// Remove a closed connection and announce its departure.
    async fn cleanup(conn_id: ConnectionId, connections: &Connections) {
        let mut conns = connections.write().await;
        let channel = conns.get(conn_id).and_then(|c| c.channel().cloned());
        let Some(conn) = conns.remove(conn_id) else {
            return;
        };
        let (Some(actor), Some(channel)) = (conn.actor, channel) else {
            return;
        };

        // Other tabs of the same user keep it present
        if conns.channel_users(&channel).contains(actor.user_id()) {
            return;
        }

        let leave = RealtimeEvent::new(EventKind::Leave, &actor, chrono::Utc::now(), serde_json::json!({}));
        conns.broadcast(&channel, conn_id, &ServerFrame::Event { event: leave });
        tracing::debug!("{} left {}", actor.user.id, channel);
    }

    /// Get current relay statistics.
    pub async fn stats(&self) -> ServerStats {
        let conns = self.connections.read().await;
        ServerStats {
            total_connections: conns.connection_count(),
            total_channels: conns.channel_count(),
        }
    }
}

/// Relay statistics.
#[derive(Clone, Debug)]
pub struct ServerStats {
    /// Total active connections.
    pub total_connections: usize,
    /// Channels with at least one member.
    pub total_channels: usize,
}

/// Handle for triggering relay shutdown.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    /// Signal the relay to shut down.
    pub fn shutdown(&self) {
        let _ = self.tx.send(());
    }
}

/// Relay errors.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to {addr}: {source}")]
    BindFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Frame handling errors.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("Send error: {0}")]
    Send(#[from] SendError),
}
