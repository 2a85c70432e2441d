//! Keep-alive pings for an open connection.

use crate::event::EventKind;
use crate::session::SessionInner;
use crate::transport::Connector;
use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace};

/// Spawn the heartbeat for the connection opened at `epoch`.
///
/// The first ping goes out one full `period` after the connection opens.
/// Ticks are skipped while the transport is not ready. Returns `None` for a
/// zero period, which disables the heartbeat.
pub(crate) fn spawn<C: Connector>(
    session: Weak<SessionInner<C>>,
    period: Duration,
    epoch: u64,
) -> Option<JoinHandle<()>> {
    if period.is_zero() {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let Some(inner) = session.upgrade() else {
                break;
            };
            if !inner.transport_ready(epoch) {
                trace!("transport not ready, skipping heartbeat");
                continue;
            }
            if let Err(e) = inner
                .send_event(EventKind::Ping, serde_json::json!({}), None)
                .await
            {
                debug!(error = %e, "heartbeat ping failed");
            }
        }
    }))
}
