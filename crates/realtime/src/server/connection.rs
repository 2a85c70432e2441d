//! Relay-side connection handling.
//!
//! Tracks each WebSocket peer, the channel it joined with its `hello`, and
//! groups connections by channel for fan-out.

use crate::identity::{ActorContext, ChannelId, TenantId, UserId};
use crate::wire::ServerFrame;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;

/// Unique connection identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Conn({})", self.0)
    }
}

/// State of a relay connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket open, waiting for `hello`.
    AwaitingHello,
    /// Member of a channel.
    Joined(ChannelId),
    /// Connection is closing.
    Closing,
}

/// A peer connected to the relay.
#[derive(Debug)]
pub struct RelayConnection {
    pub id: ConnectionId,
    pub state: ConnectionState,
    /// Actor announced in `hello`
    pub actor: Option<ActorContext>,
    /// Frames queued for this peer
    pub tx: mpsc::UnboundedSender<ServerFrame>,
}

impl RelayConnection {
    pub fn new(tx: mpsc::UnboundedSender<ServerFrame>) -> Self {
        Self {
            id: ConnectionId::new(),
            state: ConnectionState::AwaitingHello,
            actor: None,
            tx,
        }
    }

    pub fn is_joined(&self) -> bool {
        matches!(self.state, ConnectionState::Joined(_))
    }

    pub fn channel(&self) -> Option<&ChannelId> {
        match &self.state {
            ConnectionState::Joined(channel) => Some(channel),
            _ => None,
        }
    }

    pub fn user_id(&self) -> Option<&UserId> {
        self.actor.as_ref().map(|a| a.user_id())
    }

    pub fn send(&self, frame: ServerFrame) -> Result<(), SendError> {
        self.tx
            .send(frame)
            .map_err(|_| SendError::ChannelClosed(self.id))
    }

    pub fn send_error(
        &self,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<(), SendError> {
        self.send(ServerFrame::error(code, message))
    }

    fn join(&mut self, actor: ActorContext, channel: ChannelId) {
        self.actor = Some(actor);
        self.state = ConnectionState::Joined(channel);
    }

    /// Mark connection as closing.
    pub fn close(&mut self) {
        self.state = ConnectionState::Closing;
    }
}

/// Error when queueing a frame fails.
#[derive(Error, Debug, Clone)]
pub enum SendError {
    #[error("Channel closed for connection {0}")]
    ChannelClosed(ConnectionId),
}

/// Why a connection was not admitted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmitError {
    #[error("Relay is at capacity ({0} connections)")]
    RelayFull(usize),
    #[error("Channel {0} is full")]
    ChannelFull(ChannelId),
    #[error("Connection {0} already joined a channel")]
    AlreadyJoined(ConnectionId),
    #[error("Unknown connection {0}")]
    UnknownConnection(ConnectionId),
}

impl AdmitError {
    /// Error code sent to the peer.
    pub fn code(&self) -> &'static str {
        match self {
            AdmitError::RelayFull(_) => "relay_full",
            AdmitError::ChannelFull(_) => "channel_full",
            AdmitError::AlreadyJoined(_) => "already_joined",
            AdmitError::UnknownConnection(_) => "unknown_connection",
        }
    }
}

/// Decides whether an actor may join a channel.
#[trait_variant::make(Send)]
pub trait HelloAuthorizer: Send + Sync {
    /// Returns the refusal reason on failure.
    async fn authorize(&self, actor: &ActorContext, channel: &ChannelId) -> Result<(), String>;
}

/// Channel prefix owned by a tenant.
fn tenant_prefix(tenant_id: &TenantId) -> String {
    ChannelId::for_scope(tenant_id, None).0
}

fn is_tenant_channel(tenant_id: &TenantId, channel: &ChannelId) -> bool {
    let prefix = tenant_prefix(tenant_id);
    channel.as_str() == prefix
        || channel
            .as_str()
            .strip_prefix(&prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Admits actors only to channels of their own tenant.
#[derive(Debug, Default)]
pub struct TenantChannelAuthorizer;

impl HelloAuthorizer for TenantChannelAuthorizer {
    async fn authorize(&self, actor: &ActorContext, channel: &ChannelId) -> Result<(), String> {
        if is_tenant_channel(&actor.tenant_id, channel) {
            Ok(())
        } else {
            Err(format!("Channel {} is outside tenant {}", channel, actor.tenant_id))
        }
    }
}

/// Tenant-scoped admission restricted to an allow-list of tenants.
#[derive(Debug, Default)]
pub struct AllowListAuthorizer {
    tenants: HashSet<TenantId>,
}

impl AllowListAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, tenant_id: impl Into<TenantId>) -> Self {
        self.tenants.insert(tenant_id.into());
        self
    }
}

impl HelloAuthorizer for AllowListAuthorizer {
    async fn authorize(&self, actor: &ActorContext, channel: &ChannelId) -> Result<(), String> {
        if !self.tenants.contains(&actor.tenant_id) {
            return Err(format!("Tenant {} is not allowed", actor.tenant_id));
        }
        TenantChannelAuthorizer.authorize(actor, channel).await
    }
}

/// All live connections, grouped by channel.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    connections: HashMap<ConnectionId, RelayConnection>,
    channels: HashMap<ChannelId, Vec<ConnectionId>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, conn: RelayConnection) -> ConnectionId {
        let id = conn.id;
        self.connections.insert(id, conn);
        id
    }

    /// Add a connection unless `limit` connections are already tracked.
    pub fn try_add(&mut self, conn: RelayConnection, limit: usize) -> Result<ConnectionId, AdmitError> {
        if self.connections.len() >= limit {
            return Err(AdmitError::RelayFull(limit));
        }
        Ok(self.add(conn))
    }

    /// Remove a connection and its channel membership.
    pub fn remove(&mut self, id: ConnectionId) -> Option<RelayConnection> {
        let mut conn = self.connections.remove(&id)?;
        if let Some(channel) = conn.channel().cloned() {
            self.leave_channel(&channel, id);
        }
        conn.close();
        Some(conn)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&RelayConnection> {
        self.connections.get(&id)
    }

    /// Add a connection to a channel holding fewer than `limit` connections.
    ///
    /// Returns the users that were already members.
    pub fn join_channel(
        &mut self,
        id: ConnectionId,
        actor: ActorContext,
        channel: ChannelId,
        limit: usize,
    ) -> Result<Vec<UserId>, AdmitError> {
        match self.connections.get(&id) {
            None => return Err(AdmitError::UnknownConnection(id)),
            Some(conn) if conn.is_joined() => return Err(AdmitError::AlreadyJoined(id)),
            Some(_) => {}
        }
        if self.channel_size(&channel) >= limit {
            return Err(AdmitError::ChannelFull(channel));
        }

        let members = self.channel_users(&channel);
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.join(actor, channel.clone());
            self.channels.entry(channel).or_default().push(id);
        }
        Ok(members)
    }

    fn leave_channel(&mut self, channel: &ChannelId, id: ConnectionId) {
        if let Some(members) = self.channels.get_mut(channel) {
            members.retain(|c| *c != id);
            if members.is_empty() {
                self.channels.remove(channel);
            }
        }
    }

    /// Users connected to a channel, deduplicated, in join order.
    pub fn channel_users(&self, channel: &ChannelId) -> Vec<UserId> {
        let mut users: Vec<UserId> = Vec::new();
        for conn in self.channel_connections(channel) {
            if let Some(user) = conn.user_id() {
                if !users.contains(user) {
                    users.push(user.clone());
                }
            }
        }
        users
    }

    pub fn channel_connections(&self, channel: &ChannelId) -> Vec<&RelayConnection> {
        self.channels
            .get(channel)
            .map(|ids| ids.iter().filter_map(|id| self.connections.get(id)).collect())
            .unwrap_or_default()
    }

    /// Queue a frame for every member of `channel` except `except`.
    ///
    /// Returns the number of peers reached.
    pub fn broadcast(&self, channel: &ChannelId, except: ConnectionId, frame: &ServerFrame) -> usize {
        self.channel_connections(channel)
            .into_iter()
            .filter(|conn| conn.id != except)
            .filter(|conn| conn.send(frame.clone()).is_ok())
            .count()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel_size(&self, channel: &ChannelId) -> usize {
        self.channels.get(channel).map(|ids| ids.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::UserIdentity;

    fn actor(id: &str, tenant: &str) -> ActorContext {
        ActorContext::new(UserIdentity::new(id, id, ""), tenant)
    }

    fn channel(name: &str) -> ChannelId {
        ChannelId(name.to_string())
    }

    #[test]
    fn test_connection_id_uniqueness() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn test_connection_state_transitions() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut manager = ConnectionManager::new();
        let id = manager.add(RelayConnection::new(tx));

        assert_eq!(manager.get(id).unwrap().state, ConnectionState::AwaitingHello);
        assert!(!manager.get(id).unwrap().is_joined());

        let members = manager
            .join_channel(id, actor("alice", "acme"), channel("tenant/acme"), 10)
            .unwrap();
        assert!(members.is_empty());
        assert!(manager.get(id).unwrap().is_joined());
        assert_eq!(manager.channel_size(&channel("tenant/acme")), 1);

        let removed = manager.remove(id).unwrap();
        assert_eq!(removed.state, ConnectionState::Closing);
        assert_eq!(manager.channel_count(), 0);
        assert_eq!(manager.connection_count(), 0);
    }

    #[test]
    fn test_broadcast_skips_sender_and_other_channels() {
        let mut manager = ConnectionManager::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let (tx_c, mut rx_c) = mpsc::unbounded_channel();
        let a = manager.add(RelayConnection::new(tx_a));
        let b = manager.add(RelayConnection::new(tx_b));
        let c = manager.add(RelayConnection::new(tx_c));

        manager
            .join_channel(a, actor("alice", "acme"), channel("tenant/acme"), 10)
            .unwrap();
        let members = manager
            .join_channel(b, actor("bob", "acme"), channel("tenant/acme"), 10)
            .unwrap();
        assert_eq!(members, vec![UserId::new("alice")]);
        manager
            .join_channel(c, actor("carol", "acme"), channel("tenant/acme/doc/1"), 10)
            .unwrap();

        let reached = manager.broadcast(&channel("tenant/acme"), a, &ServerFrame::Pong);
        assert_eq!(reached, 1);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap(), ServerFrame::Pong);
        assert!(rx_c.try_recv().is_err());
    }

    #[test]
    fn test_join_refused_when_channel_full() {
        let mut manager = ConnectionManager::new();
        let ids: Vec<ConnectionId> = (0..3)
            .map(|_| manager.add(RelayConnection::new(mpsc::unbounded_channel().0)))
            .collect();

        manager
            .join_channel(ids[0], actor("alice", "acme"), channel("tenant/acme"), 2)
            .unwrap();
        manager
            .join_channel(ids[1], actor("bob", "acme"), channel("tenant/acme"), 2)
            .unwrap();
        assert_eq!(
            manager.join_channel(ids[2], actor("carol", "acme"), channel("tenant/acme"), 2),
            Err(AdmitError::ChannelFull(channel("tenant/acme")))
        );
        assert_eq!(manager.channel_size(&channel("tenant/acme")), 2);
        assert!(!manager.get(ids[2]).unwrap().is_joined());
    }

    #[test]
    fn test_join_refused_twice() {
        let mut manager = ConnectionManager::new();
        let id = manager.add(RelayConnection::new(mpsc::unbounded_channel().0));
        manager
            .join_channel(id, actor("alice", "acme"), channel("tenant/acme"), 10)
            .unwrap();
        assert_eq!(
            manager.join_channel(id, actor("alice", "acme"), channel("tenant/acme/doc/1"), 10),
            Err(AdmitError::AlreadyJoined(id))
        );
        assert_eq!(
            manager
                .join_channel(ConnectionId::new(), actor("bob", "acme"), channel("tenant/acme"), 10)
                .unwrap_err()
                .code(),
            "unknown_connection"
        );
    }

    #[test]
    fn test_try_add_respects_limit() {
        let mut manager = ConnectionManager::new();
        assert!(manager
            .try_add(RelayConnection::new(mpsc::unbounded_channel().0), 1)
            .is_ok());
        assert_eq!(
            manager.try_add(RelayConnection::new(mpsc::unbounded_channel().0), 1),
            Err(AdmitError::RelayFull(1))
        );
        assert_eq!(manager.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_tenant_channel_authorizer() {
        let auth = TenantChannelAuthorizer;
        let alice = actor("alice", "acme");

        assert!(auth.authorize(&alice, &channel("tenant/acme")).await.is_ok());
        assert!(auth.authorize(&alice, &channel("tenant/acme/doc/1")).await.is_ok());
        assert!(auth.authorize(&alice, &channel("tenant/acmecorp")).await.is_err());
        assert!(auth.authorize(&alice, &channel("tenant/other")).await.is_err());
    }

    #[tokio::test]
    async fn test_allow_list_authorizer() {
        let auth = AllowListAuthorizer::new().allow("acme");

        assert!(auth
            .authorize(&actor("alice", "acme"), &channel("tenant/acme"))
            .await
            .is_ok());
        assert!(auth
            .authorize(&actor("mallory", "evil"), &channel("tenant/evil"))
            .await
            .is_err());
    }
}
