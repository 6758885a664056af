//! # ReconnectScheduler: periodic sweep over disconnected devices.
//!
//! ```text
//! every reconnect_interval:
//!   registry.due_for_reconnect(now)          (Disconnected, backoff window passed)
//!     └─► for each id:
//!           ├─ shutdown requested?  → stop dispatching
//!           ├─ registry.begin_connect(id) → ticket
//!           └─ spawn attempt:
//!                connector.connect(id, params)  (bounded by connect_timeout)
//!                  ├─ Ok(conn) → registry.complete_connect(ticket, conn)
//!                  └─ Err(e)   → registry.fail_connect(ticket, e)
//! ```
//!
//! Attempts run as independent tasks, so one hanging connector never delays
//! the sweep or other devices. Cancelling the scheduler token, or a
//! `mark_disconnected` while the device is `Connecting`, abandons the
//! in-flight attempt.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::core::registry::SessionRegistry;
use crate::core::session::ConnectTicket;
use crate::device::{ConnectParams, ConnectorRef};
use crate::error::ConnectionError;

/// Periodic reconnection driver.
pub(crate) struct ReconnectScheduler {
    registry: Arc<SessionRegistry>,
    connector: ConnectorRef,
    interval: Duration,
    connect_timeout: Option<Duration>,
}

impl ReconnectScheduler {
    pub(crate) fn new(
        registry: Arc<SessionRegistry>,
        connector: ConnectorRef,
        interval: Duration,
        connect_timeout: Option<Duration>,
    ) -> Self {
        Self {
            registry,
            connector,
            interval,
            connect_timeout,
        }
    }

    /// Sweeps every `interval` until `token` is cancelled. The first sweep is immediate.
    pub(crate) async fn run(self, token: CancellationToken) {
        let mut tick = time::interval(self.interval.max(Duration::from_millis(1)));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tick.tick() => {
                    self.sweep(&token).await;
                }
            }
        }
    }

    /// Dispatches one connect attempt per due device. Returns how many started.
    pub(crate) async fn sweep(&self, token: &CancellationToken) -> usize {
        let mut started = 0;
        for id in self.registry.due_for_reconnect(Instant::now()).await {
            if self.registry.is_shutting_down() || token.is_cancelled() {
                break;
            }
            let (ticket, params) = match self.registry.begin_connect(&id).await {
                Ok(begun) => begun,
                Err(e) => {
                    tracing::debug!(device_id = %id, reason = e.as_label(), "skipping reconnect");
                    continue;
                }
            };

            tokio::spawn(attempt(
                Arc::clone(&self.registry),
                self.connector.clone(),
                ticket,
                params,
                self.connect_timeout,
                token.child_token(),
            ));
            started += 1;
        }
        started
    }
}

/// One connect attempt, reported back to the registry.
async fn attempt(
    registry: Arc<SessionRegistry>,
    connector: ConnectorRef,
    ticket: ConnectTicket,
    params: ConnectParams,
    timeout: Option<Duration>,
    token: CancellationToken,
) {
    let id = ticket.device().clone();
    let connect = async {
        match timeout {
            Some(limit) => time::timeout(limit, connector.connect(&id, &params))
                .await
                .unwrap_or(Err(ConnectionError::Timeout { timeout: limit })),
            None => connector.connect(&id, &params).await,
        }
    };

    let res = tokio::select! {
        _ = token.cancelled() => {
            tracing::debug!(device_id = %id, "connect attempt abandoned");
            return;
        }
        _ = ticket.aborted() => {
            tracing::debug!(device_id = %id, "connect attempt overtaken by disconnect");
            return;
        }
        res = connect => res,
    };

    let reported = match res {
        Ok(connection) => registry.complete_connect(ticket, connection).await,
        Err(e) => registry.fail_connect(ticket, &e).await,
    };
    if let Err(e) = reported {
        tracing::debug!(device_id = %id, reason = e.as_label(), "connect result discarded");
    }
}
