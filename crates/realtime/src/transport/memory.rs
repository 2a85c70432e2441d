//! In-process transport.
//!
//! [`MemoryConnector`] hands out [`MemoryTransport`]s that record every sent
//! event and acknowledge it immediately. The connector doubles as the test
//! harness for the "remote" side: it can inject inbound events, fail connect
//! attempts, reject sends and drop the live connection.

use super::{Ack, Connector, InboundSender, Transport, TransportError};
use crate::event::{EventKind, RealtimeEvent};
use crate::identity::{ActorContext, ChannelId};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct MemoryHub {
    connect_attempts: usize,
    failures_remaining: usize,
    reject_sends: bool,
    sent: Vec<RealtimeEvent>,
    inbound: Option<InboundSender>,
    /// Bumped on every new connection or drop; transports from older
    /// generations are no longer ready.
    generation: u64,
    channel: Option<ChannelId>,
    closes: usize,
}

/// Connector for in-process transports.
#[derive(Clone, Debug, Default)]
pub struct MemoryConnector {
    hub: Arc<Mutex<MemoryHub>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn hub(&self) -> MutexGuard<'_, MemoryHub> {
        self.hub.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `count` connect attempts fail.
    pub fn fail_next_connects(&self, count: usize) {
        self.hub().failures_remaining = count;
    }

    /// Reject (or stop rejecting) every send.
    pub fn reject_sends(&self, reject: bool) {
        self.hub().reject_sends = reject;
    }

    /// Number of connect attempts so far, failed ones included.
    pub fn connect_attempts(&self) -> usize {
        self.hub().connect_attempts
    }

    /// Number of times a live transport was closed.
    pub fn close_count(&self) -> usize {
        self.hub().closes
    }

    /// Every event delivered so far, in send order.
    pub fn sent_events(&self) -> Vec<RealtimeEvent> {
        self.hub().sent.clone()
    }

    /// Number of delivered events of `kind`.
    pub fn sent_count(&self, kind: EventKind) -> usize {
        self.hub().sent.iter().filter(|e| e.kind == kind).count()
    }

    /// Channel of the most recent connection.
    pub fn last_channel(&self) -> Option<ChannelId> {
        self.hub().channel.clone()
    }

    /// Whether a connection is currently open.
    pub fn is_connected(&self) -> bool {
        self.hub().inbound.is_some()
    }

    /// Deliver an event as if a remote peer had sent it.
    ///
    /// Returns `false` when no connection is open.
    pub fn inject(&self, event: RealtimeEvent) -> bool {
        match &self.hub().inbound {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Simulate the remote end dropping the connection.
    pub fn drop_connection(&self) {
        let mut hub = self.hub();
        hub.inbound = None;
        hub.generation += 1;
    }
}

impl Connector for MemoryConnector {
    type Transport = MemoryTransport;

    async fn connect(
        &self,
        _actor: &ActorContext,
        channel: &ChannelId,
        inbound: InboundSender,
    ) -> Result<MemoryTransport, TransportError> {
        let mut hub = self.hub();
        hub.connect_attempts += 1;

        if hub.failures_remaining > 0 {
            hub.failures_remaining -= 1;
            return Err(TransportError::ConnectFailed(
                "simulated connect failure".to_string(),
            ));
        }

        hub.generation += 1;
        hub.inbound = Some(inbound);
        hub.channel = Some(channel.clone());

        Ok(MemoryTransport {
            hub: Arc::clone(&self.hub),
            generation: hub.generation,
        })
    }
}

/// Transport handed out by [`MemoryConnector`].
#[derive(Clone, Debug)]
pub struct MemoryTransport {
    hub: Arc<Mutex<MemoryHub>>,
    generation: u64,
}

impl MemoryTransport {
    fn hub(&self) -> MutexGuard<'_, MemoryHub> {
        self.hub.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for MemoryTransport {
    async fn send(&self, event: &RealtimeEvent) -> Result<Ack, TransportError> {
        let mut hub = self.hub();
        if hub.generation != self.generation || hub.inbound.is_none() {
            return Err(TransportError::Closed);
        }
        if hub.reject_sends {
            return Err(TransportError::Rejected("simulated rejection".to_string()));
        }
        hub.sent.push(event.clone());
        Ok(Ack { event_id: event.id })
    }

    async fn close(&self) {
        let mut hub = self.hub();
        if hub.generation == self.generation && hub.inbound.is_some() {
            hub.inbound = None;
            hub.generation += 1;
            hub.closes += 1;
        }
    }

    fn is_ready(&self) -> bool {
        let hub = self.hub();
        hub.generation == self.generation && hub.inbound.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::UserIdentity;
    use chrono::Utc;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn actor() -> ActorContext {
        ActorContext::new(UserIdentity::new("user-1", "Alice", "alice@example.com"), "acme")
    }

    fn channel() -> ChannelId {
        ChannelId::for_scope(&actor().tenant_id, None)
    }

    #[tokio::test]
    async fn test_memory_connect_and_send() {
        let connector = MemoryConnector::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = connector.connect(&actor(), &channel(), tx).await.unwrap();

        assert!(transport.is_ready());
        assert_eq!(connector.last_channel(), Some(channel()));

        let event = RealtimeEvent::new(EventKind::Ping, &actor(), Utc::now(), json!({}));
        let ack = transport.send(&event).await.unwrap();
        assert_eq!(ack.event_id, event.id);
        assert_eq!(connector.sent_count(EventKind::Ping), 1);
    }

    #[tokio::test]
    async fn test_memory_connect_failure() {
        let connector = MemoryConnector::new();
        connector.fail_next_connects(1);

        let (tx, _rx) = mpsc::unbounded_channel();
        let result = connector.connect(&actor(), &channel(), tx.clone()).await;
        assert!(matches!(result, Err(TransportError::ConnectFailed(_))));

        assert!(connector.connect(&actor(), &channel(), tx).await.is_ok());
        assert_eq!(connector.connect_attempts(), 2);
    }

    #[tokio::test]
    async fn test_memory_inject_reaches_inbound() {
        let connector = MemoryConnector::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _transport = connector.connect(&actor(), &channel(), tx).await.unwrap();

        let event = RealtimeEvent::new(EventKind::Join, &actor(), Utc::now(), json!({}));
        assert!(connector.inject(event.clone()));
        assert_eq!(rx.recv().await, Some(event));
    }

    #[tokio::test]
    async fn test_memory_drop_connection() {
        let connector = MemoryConnector::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = connector.connect(&actor(), &channel(), tx).await.unwrap();

        connector.drop_connection();
        assert!(!transport.is_ready());
        assert_eq!(rx.recv().await, None);

        let event = RealtimeEvent::new(EventKind::Ping, &actor(), Utc::now(), json!({}));
        assert_eq!(transport.send(&event).await, Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn test_memory_stale_transport_close_is_noop() {
        let connector = MemoryConnector::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let old = connector.connect(&actor(), &channel(), tx.clone()).await.unwrap();
        let new = connector.connect(&actor(), &channel(), tx).await.unwrap();

        old.close().await;
        assert!(new.is_ready());
        assert_eq!(connector.close_count(), 0);

        new.close().await;
        new.close().await;
        assert!(!new.is_ready());
        assert_eq!(connector.close_count(), 1);
    }

    #[tokio::test]
    async fn test_memory_reject_sends() {
        let connector = MemoryConnector::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = connector.connect(&actor(), &channel(), tx).await.unwrap();
        connector.reject_sends(true);

        let event = RealtimeEvent::new(EventKind::Ping, &actor(), Utc::now(), json!({}));
        assert!(matches!(
            transport.send(&event).await,
            Err(TransportError::Rejected(_))
        ));
        assert!(connector.sent_events().is_empty());
    }
}
