//! WebSocket client transport.
//!
//! Speaks the JSON protocol in [`crate::wire`]. Each connection runs a writer
//! task fed by an mpsc channel and a reader task that dispatches acks to
//! pending sends and forwards relayed events to the session.

use super::{Ack, Connector, InboundSender, Transport, TransportError};
use crate::event::{EventId, RealtimeEvent};
use crate::identity::{ActorContext, ChannelId};
use crate::wire::{ClientFrame, ServerFrame};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingAcks = HashMap<EventId, oneshot::Sender<Result<Ack, TransportError>>>;

/// WebSocket client configuration.
#[derive(Clone, Debug)]
pub struct WebSocketConfig {
    /// Relay URL, e.g. `ws://localhost:8080`
    pub url: String,
    /// How long to wait for the relay to accept the handshake
    pub handshake_timeout: Duration,
    /// How long to wait for an event acknowledgment
    pub ack_timeout: Duration,
}

impl WebSocketConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            handshake_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }
}

/// Opens WebSocket connections to a relay.
#[derive(Clone, Debug)]
pub struct WebSocketConnector {
    config: WebSocketConfig,
}

impl WebSocketConnector {
    pub fn new(config: WebSocketConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }
}

impl Connector for WebSocketConnector {
    type Transport = WebSocketTransport;

    async fn connect(
        &self,
        actor: &ActorContext,
        channel: &ChannelId,
        inbound: InboundSender,
    ) -> Result<WebSocketTransport, TransportError> {
        let handshake = async {
            let (ws, _response) = connect_async(self.config.url.as_str())
                .await
                .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
            let (mut sink, mut stream) = ws.split();

            let hello = ClientFrame::Hello {
                actor: actor.clone(),
                channel: channel.clone(),
            }
            .to_json()
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
            sink.send(Message::Text(hello.into()))
                .await
                .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

            await_welcome(&mut stream).await?;
            Ok::<_, TransportError>((sink, stream))
        };

        let (sink, stream) = tokio::time::timeout(self.config.handshake_timeout, handshake)
            .await
            .map_err(|_| TransportError::Timeout)??;

        debug!(url = %self.config.url, %channel, "websocket handshake complete");
        Ok(WebSocketTransport::start(sink, stream, inbound, self.config.ack_timeout))
    }
}

async fn await_welcome(stream: &mut SplitStream<WsStream>) -> Result<(), TransportError> {
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => match ServerFrame::from_json(&text) {
                Ok(ServerFrame::Welcome { members, .. }) => {
                    trace!(members = members.len(), "relay accepted hello");
                    return Ok(());
                }
                Ok(ServerFrame::Error { code, message, .. }) => {
                    return Err(TransportError::Rejected(format!("{code}: {message}")));
                }
                Ok(_) => {}
                Err(e) => return Err(TransportError::Protocol(e.to_string())),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => return Err(TransportError::ConnectFailed(e.to_string())),
        }
    }
    Err(TransportError::ConnectFailed(
        "connection closed during handshake".to_string(),
    ))
}

/// State shared between a transport and its reader task.
#[derive(Debug)]
struct Shared {
    open: AtomicBool,
    pending: Mutex<PendingAcks>,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, PendingAcks> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve(&self, event_id: &EventId, result: Result<Ack, TransportError>) {
        if let Some(tx) = self.pending().remove(event_id) {
            let _ = tx.send(result);
        }
    }

    fn shut(&self) {
        self.open.store(false, Ordering::SeqCst);
        // Dropping the senders fails every outstanding send with `Closed`
        self.pending().clear();
    }
}

/// An open WebSocket connection to a relay.
#[derive(Clone, Debug)]
pub struct WebSocketTransport {
    outgoing: mpsc::UnboundedSender<Message>,
    shared: Arc<Shared>,
    ack_timeout: Duration,
}

impl WebSocketTransport {
    fn start(
        mut sink: SplitSink<WsStream, Message>,
        stream: SplitStream<WsStream>,
        inbound: InboundSender,
        ack_timeout: Duration,
    ) -> Self {
        let shared = Arc::new(Shared {
            open: AtomicBool::new(true),
            pending: Mutex::new(HashMap::new()),
        });
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();

        // Ends once every transport clone is dropped or a close frame went out
        tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if sink.send(msg).await.is_err() || closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(read_frames(stream, inbound, Arc::clone(&shared)));

        Self {
            outgoing,
            shared,
            ack_timeout,
        }
    }
}

async fn read_frames(mut stream: SplitStream<WsStream>, inbound: InboundSender, shared: Arc<Shared>) {
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => match ServerFrame::from_json(&text) {
                Ok(ServerFrame::Event { event }) => {
                    if inbound.send(event).is_err() {
                        break;
                    }
                }
                Ok(ServerFrame::Ack { event_id }) => {
                    shared.resolve(&event_id, Ok(Ack { event_id }));
                }
                Ok(ServerFrame::Error {
                    code,
                    message,
                    event_id,
                }) => {
                    warn!(%code, %message, "relay reported an error");
                    if let Some(event_id) = event_id {
                        shared.resolve(
                            &event_id,
                            Err(TransportError::Rejected(format!("{code}: {message}"))),
                        );
                    }
                }
                Ok(ServerFrame::Pong) => trace!("pong"),
                Ok(ServerFrame::Welcome { .. }) => debug!("ignoring repeated welcome"),
                Err(e) => warn!(error = %e, "dropping malformed frame"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "websocket read failed");
                break;
            }
        }
    }
    debug!("websocket reader finished");
    shared.shut();
}

impl Transport for WebSocketTransport {
    async fn send(&self, event: &RealtimeEvent) -> Result<Ack, TransportError> {
        if !self.is_ready() {
            return Err(TransportError::Closed);
        }
        let text = ClientFrame::Event {
            event: event.clone(),
        }
        .to_json()
        .map_err(|e| TransportError::Protocol(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.shared.pending().insert(event.id, tx);

        if self.outgoing.send(Message::Text(text.into())).is_err() {
            self.shared.pending().remove(&event.id);
            return Err(TransportError::Closed);
        }

        match tokio::time::timeout(self.ack_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.shared.pending().remove(&event.id);
                Err(TransportError::Timeout)
            }
        }
    }

    async fn close(&self) {
        if self.shared.open.swap(false, Ordering::SeqCst) {
            let _ = self.outgoing.send(Message::Close(None));
        }
        self.shared.shut();
    }

    fn is_ready(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst) && !self.outgoing.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_config_defaults() {
        let config = WebSocketConfig::new("ws://localhost:8080");
        assert_eq!(config.url, "ws://localhost:8080");
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.ack_timeout, Duration::from_secs(10));

        let config = config.with_ack_timeout(Duration::from_secs(2));
        assert_eq!(config.ack_timeout, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let connector = WebSocketConnector::new(
            WebSocketConfig::new("ws://127.0.0.1:1").with_handshake_timeout(Duration::from_secs(2)),
        );
        let actor = ActorContext::new(crate::identity::UserIdentity::new("u", "U", ""), "acme");
        let channel = ChannelId::for_scope(&actor.tenant_id, None);
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = connector.connect(&actor, &channel, tx).await;
        assert!(matches!(
            result,
            Err(TransportError::ConnectFailed(_)) | Err(TransportError::Timeout)
        ));
    }
}
