//! Transport abstraction for realtime channels.
//!
//! A [`Connector`] opens a [`Transport`] to a collaboration channel on behalf
//! of an actor. Outbound events go through [`Transport::send`], which resolves
//! once the peer acknowledged the event. Inbound events are pushed by the
//! transport into the [`InboundSender`] handed to `connect`; when the transport
//! loses its connection it drops that sender.
//!
//! Implementations:
//!
//! - [`memory`]: in-process transport for tests and embedding
//! - `websocket`: WebSocket client transport (requires the `websocket` feature)

pub mod memory;
#[cfg(feature = "websocket")]
pub mod websocket;

use crate::event::{EventId, RealtimeEvent};
use crate::identity::{ActorContext, ChannelId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use memory::{MemoryConnector, MemoryTransport};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketConnector, WebSocketTransport};

/// Channel through which a transport delivers inbound events.
pub type InboundSender = mpsc::UnboundedSender<RealtimeEvent>;

/// Delivery confirmation for one event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub event_id: EventId,
}

/// Errors raised by transports.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    /// The connection is closed.
    #[error("Connection is closed")]
    Closed,

    /// No acknowledgment arrived in time.
    #[error("Timed out waiting for acknowledgment")]
    Timeout,

    /// The peer refused the event or the handshake.
    #[error("Rejected by peer: {0}")]
    Rejected(String),

    /// The peer sent something that could not be understood.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// An open connection to a collaboration channel.
#[trait_variant::make(Send)]
pub trait Transport: Clone + Send + Sync + 'static {
    /// Deliver an event and wait for its acknowledgment.
    async fn send(&self, event: &RealtimeEvent) -> Result<Ack, TransportError>;

    /// Close the connection. Closing twice is a no-op.
    async fn close(&self);

    /// Whether the connection is open and able to send.
    fn is_ready(&self) -> bool;
}

/// Factory for transports.
#[trait_variant::make(Send)]
pub trait Connector: Send + Sync + 'static {
    /// The transport this connector produces.
    type Transport: Transport;

    /// Open a connection to `channel` as `actor`.
    ///
    /// Inbound events are pushed into `inbound` until the connection ends.
    async fn connect(
        &self,
        actor: &ActorContext,
        channel: &ChannelId,
        inbound: InboundSender,
    ) -> Result<Self::Transport, TransportError>;
}
