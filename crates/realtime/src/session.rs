//! Realtime session: connection lifecycle, event sending and inbound events.
//!
//! A [`RealtimeSession`] owns one logical connection to a collaboration
//! channel. Its connection status moves through
//! `disconnected → reconnecting → connected`, falls back to `disconnected`
//! on failure or explicit disconnect, and is retried after
//! [`SessionConfig::reconnect_delay`] when auto-reconnect is enabled.
//!
//! Reconnect, heartbeat and inbound-pump tasks are owned by the session and
//! cancelled deterministically on disconnect, on connection loss, and when the
//! last session handle is dropped. The tasks only hold weak references, so a
//! dropped session never lingers in the background.

use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::error::{RealtimeError, RealtimeResult};
use crate::event::{EventKind, JoinPayload, RealtimeEvent};
use crate::heartbeat;
use crate::identity::{ActorContext, ChannelId, ResourceRef, UserId};
use crate::presence::RealtimeUser;
use crate::state::{CollaborationSnapshot, CollaborationState, ConnectionStatus};
use crate::transport::{Ack, Connector, Transport, TransportError};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Page visibility as reported by the embedding environment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// An event that was recorded locally, with its delivery acknowledgment when
/// a connection was open.
#[derive(Clone, Debug, PartialEq)]
pub struct SentEvent {
    pub event: RealtimeEvent,
    pub ack: Option<Ack>,
}

impl SentEvent {
    /// Whether the peer acknowledged the event.
    pub fn is_delivered(&self) -> bool {
        self.ack.is_some()
    }
}

/// Connection handle plus the tasks tied to it.
struct Link<T> {
    transport: Option<T>,
    /// Bumped on every connect attempt and disconnect; tasks and in-flight
    /// connects compare against it to detect that they were superseded.
    epoch: u64,
    closed: bool,
    reconnect: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    pump: Option<JoinHandle<()>>,
}

impl<T> Default for Link<T> {
    fn default() -> Self {
        Self {
            transport: None,
            epoch: 0,
            closed: false,
            reconnect: None,
            heartbeat: None,
            pump: None,
        }
    }
}

impl<T> Link<T> {
    fn cancel_connection_tasks(&mut self) {
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
        if let Some(handle) = self.pump.take() {
            handle.abort();
        }
    }

    fn cancel_all(&mut self) {
        if let Some(handle) = self.reconnect.take() {
            handle.abort();
        }
        self.cancel_connection_tasks();
    }
}

pub(crate) struct SessionInner<C: Connector> {
    connector: C,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    context: Mutex<Option<ActorContext>>,
    state: Mutex<CollaborationState>,
    link: Mutex<Link<C::Transport>>,
    events: broadcast::Sender<RealtimeEvent>,
}

impl<C: Connector> Drop for SessionInner<C> {
    fn drop(&mut self) {
        self.link
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel_all();
    }
}

/// A realtime collaboration session.
///
/// Cheap to clone; clones share the same connection and state.
pub struct RealtimeSession<C: Connector> {
    inner: Arc<SessionInner<C>>,
}

impl<C: Connector> Clone for RealtimeSession<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> std::fmt::Debug for RealtimeSession<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeSession")
            .field("status", &self.connection_status())
            .field("context", &self.context())
            .finish()
    }
}

/// Builder for [`RealtimeSession`].
pub struct SessionBuilder<C: Connector> {
    connector: C,
    config: SessionConfig,
    context: Option<ActorContext>,
    clock: Arc<dyn Clock>,
}

impl<C: Connector> SessionBuilder<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            config: SessionConfig::default(),
            context: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn context(mut self, context: ActorContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> RealtimeSession<C> {
        let state = CollaborationState::new(
            self.config.liveness_window,
            self.config.event_log_capacity,
        );
        let (events, _) = broadcast::channel(self.config.event_log_capacity.max(1));
        RealtimeSession {
            inner: Arc::new(SessionInner {
                connector: self.connector,
                config: self.config,
                clock: self.clock,
                context: Mutex::new(self.context),
                state: Mutex::new(state),
                link: Mutex::new(Link::default()),
                events,
            }),
        }
    }
}

impl<C: Connector> RealtimeSession<C> {
    /// Start building a session over `connector`.
    pub fn builder(connector: C) -> SessionBuilder<C> {
        SessionBuilder::new(connector)
    }

    /// Create a session for `context` with the given config.
    pub fn new(connector: C, context: ActorContext, config: SessionConfig) -> Self {
        SessionBuilder::new(connector)
            .context(context)
            .config(config)
            .build()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn connector(&self) -> &C {
        &self.inner.connector
    }

    /// The installed actor context.
    pub fn context(&self) -> Option<ActorContext> {
        self.inner.context_guard().clone()
    }

    /// Replace the actor context.
    ///
    /// An active connection is torn down under the old identity; if a new
    /// context is installed the session reconnects with it.
    pub async fn set_context(&self, context: Option<ActorContext>) -> RealtimeResult<()> {
        if *self.inner.context_guard() == context {
            return Ok(());
        }

        let was_active = self.connection_status() != ConnectionStatus::Disconnected;
        if was_active {
            self.inner.disconnect().await;
        }

        let reconnect = was_active && context.is_some();
        *self.inner.context_guard() = context;

        if reconnect {
            self.inner.connect().await?;
        }
        Ok(())
    }

    /// The channel this session connects to.
    pub fn channel(&self) -> RealtimeResult<ChannelId> {
        let actor = self.inner.actor()?;
        Ok(self.inner.channel_for(&actor))
    }

    /// Current wall-clock time according to the session clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.inner.state().status()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state().is_connected()
    }

    /// Owned copy of the collaboration state.
    pub fn snapshot(&self) -> CollaborationSnapshot {
        self.inner.state().snapshot()
    }

    /// Users seen within the liveness window.
    pub fn online_users(&self) -> Vec<RealtimeUser> {
        let now = self.now();
        self.inner.state().presence().online_users(now)
    }

    /// Recent events, oldest first.
    pub fn recent_events(&self) -> Vec<RealtimeEvent> {
        self.inner.state().events().to_vec()
    }

    /// Presence entry for a user, stale or not.
    pub fn active_user(&self, user_id: &UserId) -> Option<RealtimeUser> {
        self.inner.state().presence().get(user_id).cloned()
    }

    /// Stream of every event recorded from now on, local and inbound, in
    /// the order they enter the log.
    ///
    /// A subscriber that falls more than the log capacity behind sees
    /// `RecvError::Lagged` and resumes with newer events.
    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.inner.events.subscribe()
    }

    /// Run `f` against the state under the session lock.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut CollaborationState) -> R) -> R {
        f(&mut self.inner.state())
    }

    pub(crate) fn actor(&self) -> RealtimeResult<ActorContext> {
        self.inner.actor()
    }

    /// Open the channel.
    ///
    /// Returns immediately when already connected or connecting. A failed
    /// attempt leaves the session disconnected and, with auto-reconnect,
    /// schedules a retry.
    pub async fn connect(&self) -> RealtimeResult<()> {
        self.inner.connect().await
    }

    /// Close the channel and cancel every pending timer.
    pub async fn disconnect(&self) {
        self.inner.disconnect().await
    }

    /// Disconnect for good. Later connects fail with `SessionClosed`.
    pub async fn shutdown(&self) {
        self.inner.disconnect().await;
        self.inner.link().closed = true;
        info!("realtime session shut down");
    }

    /// React to the page being hidden or shown.
    pub async fn handle_visibility(&self, visibility: Visibility) -> RealtimeResult<()> {
        match visibility {
            Visibility::Hidden => {
                debug!("page hidden, disconnecting realtime channel");
                self.inner.disconnect().await;
                Ok(())
            }
            Visibility::Visible => {
                debug!("page visible, connecting realtime channel");
                self.inner.connect().await
            }
        }
    }

    /// Record an event and deliver it over the open connection.
    pub async fn send_event(
        &self,
        kind: EventKind,
        payload: serde_json::Value,
    ) -> RealtimeResult<SentEvent> {
        self.inner.send_event(kind, payload, None).await
    }

    /// Like [`send_event`](Self::send_event), about a specific resource.
    pub async fn send_event_for(
        &self,
        kind: EventKind,
        payload: serde_json::Value,
        resource: &ResourceRef,
    ) -> RealtimeResult<SentEvent> {
        self.inner
            .send_event(kind, payload, Some(resource.clone()))
            .await
    }
}

impl<C: Connector> SessionInner<C> {
    fn state(&self) -> MutexGuard<'_, CollaborationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn link(&self) -> MutexGuard<'_, Link<C::Transport>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn context_guard(&self) -> MutexGuard<'_, Option<ActorContext>> {
        self.context.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn actor(&self) -> RealtimeResult<ActorContext> {
        self.context_guard()
            .clone()
            .ok_or(RealtimeError::MissingContext)
    }

    fn channel_for(&self, actor: &ActorContext) -> ChannelId {
        ChannelId::for_scope(&actor.tenant_id, self.config.resource.as_ref())
    }

    /// Whether the connection from `epoch` is still open and ready.
    pub(crate) fn transport_ready(&self, epoch: u64) -> bool {
        let link = self.link();
        link.epoch == epoch && link.transport.as_ref().is_some_and(|t| t.is_ready())
    }

    async fn connect(self: &Arc<Self>) -> RealtimeResult<()> {
        let actor = self.actor()?;

        let epoch = {
            let mut link = self.link();
            if link.closed {
                return Err(RealtimeError::SessionClosed);
            }
            {
                let mut state = self.state();
                if state.status() != ConnectionStatus::Disconnected {
                    return Ok(());
                }
                state.set_status(ConnectionStatus::Reconnecting);
            }
            if let Some(handle) = link.reconnect.take() {
                handle.abort();
            }
            link.epoch += 1;
            link.epoch
        };

        let channel = self.channel_for(&actor);
        debug!(%channel, user = %actor.user.id, "connecting realtime channel");

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let transport = match self.connector.connect(&actor, &channel, inbound_tx).await {
            Ok(transport) => transport,
            Err(e) => {
                warn!(%channel, error = %e, "realtime connect failed");
                self.connect_failed(epoch);
                return Err(e.into());
            }
        };

        let superseded = {
            let mut link = self.link();
            if link.epoch != epoch || link.closed {
                Some(transport)
            } else {
                link.transport = Some(transport);
                link.pump = Some(spawn_pump(Arc::downgrade(self), inbound_rx, epoch));
                link.heartbeat =
                    heartbeat::spawn(Arc::downgrade(self), self.config.heartbeat_interval, epoch);
                self.state().set_status(ConnectionStatus::Connected);
                None
            }
        };

        if let Some(transport) = superseded {
            debug!(%channel, "connection superseded by disconnect, closing");
            transport.close().await;
            return Ok(());
        }

        info!(%channel, user = %actor.user.id, "realtime channel connected");

        if self.config.enable_presence {
            let payload = serde_json::to_value(JoinPayload {
                name: actor.user.name.clone(),
                email: actor.user.email.clone(),
                page: self.config.current_page.clone(),
            })?;
            if let Err(e) = self.send_event(EventKind::Join, payload, None).await {
                warn!(error = %e, "failed to announce join");
            }
        }

        Ok(())
    }

    fn connect_failed(self: &Arc<Self>, epoch: u64) {
        let mut link = self.link();
        if link.epoch != epoch {
            return;
        }
        self.state().set_status(ConnectionStatus::Disconnected);
        self.schedule_reconnect(&mut link);
    }

    /// Tear down after the connection from `epoch` dropped on its own.
    pub(crate) fn connection_lost(self: &Arc<Self>, epoch: u64) {
        let mut link = self.link();
        if link.epoch != epoch || link.transport.is_none() {
            return;
        }

        link.transport = None;
        link.cancel_connection_tasks();
        self.state().set_status(ConnectionStatus::Disconnected);
        warn!("realtime connection lost");

        self.schedule_reconnect(&mut link);
    }

    fn schedule_reconnect(self: &Arc<Self>, link: &mut Link<C::Transport>) {
        if !self.config.auto_reconnect || link.closed {
            return;
        }
        if let Some(handle) = link.reconnect.take() {
            handle.abort();
        }

        let delay = self.config.reconnect_delay;
        let session = Arc::downgrade(self);
        info!(delay_ms = delay.as_millis() as u64, "scheduling realtime reconnect");

        link.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = session.upgrade() else {
                return;
            };
            // Detach our own handle so connect() does not abort this task
            drop(inner.link().reconnect.take());
            reconnect(inner).await;
        }));
    }

    async fn disconnect(self: &Arc<Self>) {
        let actor = self.context_guard().clone();

        if self.config.enable_presence && self.state().is_connected() && actor.is_some() {
            if let Err(e) = self.send_event(EventKind::Leave, serde_json::json!({}), None).await {
                debug!(error = %e, "failed to announce leave");
            }
        }

        let transport = {
            let mut link = self.link();
            link.epoch += 1;
            link.cancel_all();
            let transport = link.transport.take();

            let mut state = self.state();
            state.set_status(ConnectionStatus::Disconnected);
            if let Some(actor) = &actor {
                state.remove_user(actor.user_id());
            }
            transport
        };

        if let Some(transport) = transport {
            transport.close().await;
            info!("realtime channel disconnected");
        }
    }

    pub(crate) async fn send_event(
        self: &Arc<Self>,
        kind: EventKind,
        payload: serde_json::Value,
        resource: Option<ResourceRef>,
    ) -> RealtimeResult<SentEvent> {
        let actor = self.actor()?;
        let now = self.clock.now();

        let mut event = RealtimeEvent::new(kind, &actor, now, payload);
        if let Some(resource) = resource.as_ref().or(self.config.resource.as_ref()) {
            event = event.with_resource(resource);
        }

        let (transport, epoch) = {
            let link = self.link();
            (link.transport.clone(), link.epoch)
        };
        self.record(event.clone(), now, self.config.enable_presence);
        trace!(kind = %event.kind, id = %event.id, "recorded realtime event");

        let Some(transport) = transport else {
            return Ok(SentEvent { event, ack: None });
        };

        match transport.send(&event).await {
            Ok(ack) => Ok(SentEvent {
                event,
                ack: Some(ack),
            }),
            Err(e) => {
                warn!(kind = %event.kind, error = %e, "failed to deliver realtime event");
                if matches!(e, TransportError::Closed | TransportError::Timeout) {
                    self.connection_lost(epoch);
                }
                Err(e.into())
            }
        }
    }

    /// Fold an inbound event into the state.
    fn receive(&self, event: RealtimeEvent) {
        if let Some(actor) = self.context_guard().as_ref() {
            if event.tenant_id != actor.tenant_id {
                warn!(tenant = %event.tenant_id, "dropping event from foreign tenant");
                return;
            }
        }
        trace!(kind = %event.kind, user = %event.user_id, "received realtime event");
        let now = self.clock.now();
        self.record(event, now, true);
    }

    /// Append to the log, fold into state and publish to subscribers.
    ///
    /// `track_presence` is off for local events when presence is disabled,
    /// so the local actor never shows up as a placeholder user.
    fn record(&self, event: RealtimeEvent, now: DateTime<Utc>, track_presence: bool) {
        {
            let mut state = self.state();
            if track_presence {
                state.record(event.clone(), now);
            } else {
                state.record_untracked(event.clone(), now);
            }
        }
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Boxed so the reconnect task does not embed `connect`'s own future type.
fn reconnect<C: Connector>(inner: Arc<SessionInner<C>>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        if let Err(e) = inner.connect().await {
            debug!(error = %e, "reconnect attempt failed");
        }
    })
}

fn spawn_pump<C: Connector>(
    session: Weak<SessionInner<C>>,
    mut inbound: mpsc::UnboundedReceiver<RealtimeEvent>,
    epoch: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = inbound.recv().await {
            let Some(inner) = session.upgrade() else {
                return;
            };
            inner.receive(event);
        }
        if let Some(inner) = session.upgrade() {
            inner.connection_lost(epoch);
        }
    })
}
