//! Realtime presence and collaboration sessions.
//!
//! A [`RealtimeSession`] connects an authenticated actor to a tenant-scoped
//! channel, keeps the connection alive with heartbeats, reconnects after
//! failures, tracks who is online and keeps a bounded log of recent events.
//! Thin façades layer cursor, typing and data-change broadcasts on top, plus a
//! document wrapper with an edit lock and a notification feed.
//!
//! # Modules
//!
//! - `session`: Connection lifecycle, event sending and inbound events
//! - `heartbeat`: Keep-alive pings while connected
//! - `presence`: Active users and the "online" view
//! - `event_log`: Bounded FIFO of recent events
//! - `collaboration`: Cursor, typing and data-change broadcasts
//! - `document`: Document wrapper with a lease-based edit lock
//! - `notifications`: Capped notification feed with read tracking
//! - `transport`: Transport traits and the in-memory transport
//! - `wire`: JSON frames spoken over WebSocket
//! - `error`: Error types for the realtime crate
//!
//! # Example
//!
//! ```
//! use realtime::{ActorContext, MemoryConnector, RealtimeSession, SessionConfig, UserIdentity};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), realtime::RealtimeError> {
//! let actor = ActorContext::new(UserIdentity::new("user-1", "Alice", "alice@example.com"), "acme");
//! let session = RealtimeSession::new(MemoryConnector::new(), actor, SessionConfig::default());
//!
//! session.connect().await?;
//! session.update_cursor(10.0, 20.0).await?;
//!
//! assert!(session.is_connected());
//! assert_eq!(session.online_users().len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod collaboration;
pub mod config;
pub mod document;
pub mod error;
pub mod event;
pub mod event_log;
mod heartbeat;
pub mod identity;
pub mod lock;
pub mod notifications;
pub mod presence;
pub mod session;
pub mod state;
pub mod transport;
pub mod wire;

/// WebSocket relay module.
///
/// This module is only available when the `server` feature is enabled.
///
/// ```ignore
/// use realtime::server::{RelayServer, ServerConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let server = RelayServer::new(ServerConfig::with_port(8080));
///     server.run().await.unwrap();
/// }
/// ```
#[cfg(feature = "server")]
pub mod server;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SessionConfig;
pub use document::DocumentCollaboration;
pub use error::{RealtimeError, RealtimeResult};
pub use event::{
    CursorPosition, DataChangePayload, EventId, EventKind, JoinPayload, RealtimeEvent,
    TypingPayload,
};
pub use event_log::EventLog;
pub use identity::{color_for, ActorContext, ChannelId, ResourceRef, TenantId, UserId, UserIdentity};
pub use lock::{DocumentLock, LockAction, LockTable};
pub use notifications::{unread_count, Notification, NotificationFeed, NotificationLevel};
pub use presence::{online_users, PresenceTracker, RealtimeUser};
pub use session::{RealtimeSession, SentEvent, SessionBuilder, Visibility};
pub use state::{CollaborationSnapshot, CollaborationState, ConnectionStatus};
pub use transport::{Ack, Connector, MemoryConnector, MemoryTransport, Transport, TransportError};
#[cfg(feature = "websocket")]
pub use transport::{WebSocketConfig, WebSocketConnector, WebSocketTransport};
