//! # SessionRegistry: authoritative per-device session table.
//!
//! The registry is the only place where session state changes. Every public
//! operation is one atomic compound step over a single entry:
//!
//! ```text
//! RwLock<HashMap<DeviceId, Arc<Mutex<Entry>>>>
//!   │ read lock: lookup, clone the Arc, release
//!   ▼
//! Mutex<Entry>  ── check preconditions + mutate + publish event ── release
//!   │
//!   └─► slow work (executor stop, connection disconnect) runs after release
//! ```
//!
//! ## Transitions
//! ```text
//! register ─► Disconnected ─begin_connect─► Connecting ─complete_connect─► Available
//!                  ▲                            │                           │   ▲
//!                  │                       fail_connect            acquire  │   │ release / expiry
//!                  ├────────────────────────────┘                           ▼   │
//!                  │                                                      Controlled
//!                  └──────────── mark_disconnected / control loss ◄──── (any connected state)
//!
//! set_unavailable(true):  Available | Controlled ─► Unavailable (owner cleared)
//! set_unavailable(false): Unavailable ─► Available
//! ```
//!
//! ## Rules
//! - At most one owner per session; a conflicting acquire mutates nothing.
//! - A lease expires only when `now - last_heartbeat > heartbeat_timeout` (strict).
//! - A connect attempt overtaken by `mark_disconnected` cannot attach its connection.
//! - After `begin_shutdown`, new connects, leases and submissions are refused.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::actions::ActionRef;
use crate::core::config::BrokerConfig;
use crate::core::executor::TaskExecutor;
use crate::core::job::{JobHandle, JobOutcome};
use crate::core::session::{
    ConnectTicket, Entry, Lease, Link, Live, SessionSnapshot, SessionState,
};
use crate::core::watcher;
use crate::device::{
    CallerId, ConnectParams, ConnectionRef, DeviceId, DeviceSpec, SensorSnapshot,
};
use crate::error::{BrokerError, ConnectionError};
use crate::events::{Bus, Event, EventKind};
use crate::policies::BackoffPolicy;

/// Settings the registry needs from [`BrokerConfig`].
#[derive(Clone, Debug)]
pub(crate) struct RegistrySettings {
    pub(crate) heartbeat_timeout: Duration,
    pub(crate) backoff: BackoffPolicy,
    pub(crate) cancel_grace: Duration,
}

impl From<&BrokerConfig> for RegistrySettings {
    fn from(cfg: &BrokerConfig) -> Self {
        Self {
            heartbeat_timeout: cfg.heartbeat_timeout,
            backoff: cfg.backoff,
            cancel_grace: cfg.cancel_grace,
        }
    }
}

/// Table of device sessions with atomic compound operations.
pub struct SessionRegistry {
    entries: RwLock<HashMap<DeviceId, Arc<Mutex<Entry>>>>,
    settings: RegistrySettings,
    bus: Bus,
    shutting_down: AtomicBool,
}

impl SessionRegistry {
    pub(crate) fn new(settings: RegistrySettings, bus: Bus) -> Arc<Self> {
        Arc::new(Self {
            entries: RwLock::new(HashMap::new()),
            settings,
            bus,
            shutting_down: AtomicBool::new(false),
        })
    }

    async fn entry(&self, id: &DeviceId) -> Result<Arc<Mutex<Entry>>, BrokerError> {
        self.entries
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| BrokerError::UnknownDevice { id: id.clone() })
    }

    async fn all_entries(&self) -> Vec<Arc<Mutex<Entry>>> {
        self.entries.read().await.values().cloned().collect()
    }

    fn refuse_if_shutting_down(&self) -> Result<(), BrokerError> {
        if self.is_shutting_down() {
            return Err(BrokerError::ShutdownInProgress);
        }
        Ok(())
    }

    /// Creates a `Disconnected` session for `spec.id`.
    ///
    /// Idempotent per id: returns `false` and changes nothing if it exists.
    pub async fn register(&self, spec: DeviceSpec) -> bool {
        let id = spec.id.clone();
        let mut entries = self.entries.write().await;
        if entries.contains_key(&id) {
            return false;
        }
        let entry = Entry::new(spec, Instant::now());
        let name = entry.display_name.clone();
        entries.insert(id.clone(), Arc::new(Mutex::new(entry)));
        drop(entries);

        tracing::debug!(device_id = %id, display_name = %name, "device registered");
        self.bus
            .publish(Event::new(EventKind::DeviceRegistered).with_device(&id));
        true
    }

    /// `Disconnected → Connecting`.
    ///
    /// Returns the ticket for this attempt and the device's connect parameters.
    pub async fn begin_connect(
        &self,
        id: &DeviceId,
    ) -> Result<(ConnectTicket, ConnectParams), BrokerError> {
        self.refuse_if_shutting_down()?;
        let entry = self.entry(id).await?;
        let mut e = entry.lock().await;
        if !matches!(e.link, Link::Disconnected) {
            return Err(BrokerError::NotDisconnected { id: id.clone() });
        }

        e.generation += 1;
        let abort = CancellationToken::new();
        e.link = Link::Connecting {
            generation: e.generation,
            abort: abort.clone(),
        };
        e.last_connect_attempt = Some(Instant::now());
        self.bus.publish(
            Event::new(EventKind::ConnectStarting)
                .with_device(id)
                .with_attempt(e.connect_attempts.saturating_add(1)),
        );

        let ticket = ConnectTicket {
            device: id.clone(),
            generation: e.generation,
            abort,
        };
        Ok((ticket, e.params.clone()))
    }

    /// `Connecting → Available`: attaches `connection`, starts its executor and
    /// control-loss watcher, resets the failure count.
    ///
    /// A stale ticket (the attempt was overtaken by `mark_disconnected`) or a
    /// shutdown in progress rejects the connection, which is then disconnected.
    pub async fn complete_connect(
        self: &Arc<Self>,
        ticket: ConnectTicket,
        connection: ConnectionRef,
    ) -> Result<(), BrokerError> {
        let id = ticket.device.clone();
        let entry = self.entry(&id).await?;
        let mut e = entry.lock().await;

        let rejection = if self.is_shutting_down() {
            Some(BrokerError::ShutdownInProgress)
        } else if !e.is_current_attempt(&ticket) {
            Some(BrokerError::StaleConnect { id: id.clone() })
        } else {
            None
        };
        if let Some(err) = rejection {
            drop(e);
            tracing::debug!(device_id = %id, reason = err.as_label(), "dropping late connection");
            close_connection(&id, &connection).await;
            return Err(err);
        }

        let executor = Arc::new(TaskExecutor::spawn(
            id.clone(),
            connection.clone(),
            self.bus.clone(),
            self.settings.cancel_grace,
        ));
        let watcher_token = CancellationToken::new();
        e.link = Link::Up(Live {
            generation: ticket.generation,
            connection: connection.clone(),
            executor,
            watcher: watcher_token.clone(),
        });
        e.connect_attempts = 0;
        drop(e);

        watcher::arm(
            Arc::clone(self),
            id.clone(),
            ticket.generation,
            connection,
            watcher_token,
        );
        tracing::info!(device_id = %id, "device connected");
        self.bus.publish(Event::new(EventKind::Connected).with_device(&id));
        Ok(())
    }

    /// `Connecting → Disconnected` after a failed attempt.
    ///
    /// Increments the failure count and schedules the next attempt per the
    /// backoff policy.
    pub async fn fail_connect(
        &self,
        ticket: ConnectTicket,
        error: &ConnectionError,
    ) -> Result<(), BrokerError> {
        let id = &ticket.device;
        let entry = self.entry(id).await?;
        let mut e = entry.lock().await;
        if !e.is_current_attempt(&ticket) {
            return Err(BrokerError::StaleConnect { id: id.clone() });
        }

        let now = Instant::now();
        e.link = Link::Disconnected;
        e.connect_attempts = e.connect_attempts.saturating_add(1);
        e.last_connect_attempt = Some(now);
        let delay = self.settings.backoff.next(e.connect_attempts);
        e.next_attempt_at = now + delay;

        tracing::warn!(
            device_id = %id,
            attempt = e.connect_attempts,
            retry_in_ms = delay.as_millis() as u64,
            error = %error,
            "connect failed"
        );
        self.bus.publish(
            Event::new(EventKind::ConnectFailed)
                .with_device(id)
                .with_attempt(e.connect_attempts)
                .with_delay(delay)
                .with_reason(error.to_string()),
        );
        Ok(())
    }

    /// `Available → Controlled` with `caller` as owner.
    ///
    /// Re-acquiring a lease already held by `caller` refreshes its heartbeat.
    pub async fn acquire_lease(
        &self,
        id: &DeviceId,
        caller: &CallerId,
    ) -> Result<(), BrokerError> {
        self.refuse_if_shutting_down()?;
        let entry = self.entry(id).await?;
        let mut e = entry.lock().await;
        let now = Instant::now();

        match e.state() {
            SessionState::Available => {
                e.lease = Some(Lease {
                    owner: caller.clone(),
                    last_heartbeat: now,
                });
                self.bus.publish(
                    Event::new(EventKind::LeaseAcquired)
                        .with_device(id)
                        .with_caller(caller),
                );
                Ok(())
            }
            SessionState::Controlled => match e.lease.as_mut() {
                Some(lease) if &lease.owner == caller => {
                    lease.last_heartbeat = now;
                    Ok(())
                }
                _ => Err(BrokerError::LeaseConflict { id: id.clone() }),
            },
            SessionState::Disconnected | SessionState::Connecting | SessionState::Unavailable => {
                Err(BrokerError::NotAvailable { id: id.clone() })
            }
        }
    }

    /// Refreshes the heartbeat of `caller`'s lease.
    pub async fn renew_heartbeat(
        &self,
        id: &DeviceId,
        caller: &CallerId,
    ) -> Result<(), BrokerError> {
        let entry = self.entry(id).await?;
        let mut e = entry.lock().await;
        match e.lease.as_mut() {
            Some(lease) if &lease.owner == caller => {
                lease.last_heartbeat = Instant::now();
                Ok(())
            }
            _ => Err(BrokerError::LeaseNotOwned { id: id.clone() }),
        }
    }

    /// `Controlled → Available`; only the owner may release.
    pub async fn release_lease(
        &self,
        id: &DeviceId,
        caller: &CallerId,
    ) -> Result<(), BrokerError> {
        let entry = self.entry(id).await?;
        let mut e = entry.lock().await;
        if !e.is_owned_by(caller) {
            return Err(BrokerError::LeaseNotOwned { id: id.clone() });
        }
        e.lease = None;
        self.bus.publish(
            Event::new(EventKind::LeaseReleased)
                .with_device(id)
                .with_caller(caller),
        );
        Ok(())
    }

    /// Any state `→ Disconnected`.
    ///
    /// Clears the owner and tears down the connection and executor; the
    /// session becomes due for reconnect immediately. An attempt still in
    /// `Connecting` is aborted instead and keeps its failure count and
    /// backoff window.
    pub async fn mark_disconnected(&self, id: &DeviceId) -> Result<(), BrokerError> {
        self.disconnect(id, "requested").await
    }

    /// [`SessionRegistry::mark_disconnected`] with the reason carried by the event.
    pub(crate) async fn disconnect(
        &self,
        id: &DeviceId,
        reason: &'static str,
    ) -> Result<(), BrokerError> {
        let entry = self.entry(id).await?;
        let mut e = entry.lock().await;
        let live = e.detach(Instant::now());
        drop(e);

        if let Some(live) = live {
            self.bus.publish(
                Event::new(EventKind::Disconnected)
                    .with_device(id)
                    .with_reason(reason),
            );
            teardown(id, live).await;
        }
        Ok(())
    }

    /// Handles a control-loss notification for the connection of `generation`.
    ///
    /// Returns `false` (and does nothing) if that connection is no longer the
    /// current one: a duplicate or late delivery.
    pub(crate) async fn on_control_lost(&self, id: &DeviceId, generation: u64) -> bool {
        let Ok(entry) = self.entry(id).await else {
            return false;
        };
        let mut e = entry.lock().await;
        if e.live().is_none_or(|live| live.generation != generation) {
            tracing::debug!(device_id = %id, generation, "ignoring stale control-loss");
            return false;
        }
        let live = e.detach(Instant::now());
        drop(e);

        tracing::warn!(device_id = %id, "control lost");
        self.bus
            .publish(Event::new(EventKind::ControlLost).with_device(id));
        if let Some(live) = live {
            teardown(id, live).await;
        }
        true
    }

    /// Pure read of one session.
    pub async fn snapshot(&self, id: &DeviceId) -> Result<SessionSnapshot, BrokerError> {
        let entry = self.entry(id).await?;
        let e = entry.lock().await;
        Ok(e.snapshot())
    }

    /// Snapshots of all sessions, sorted by id.
    pub async fn list(&self) -> Vec<SessionSnapshot> {
        let mut out = Vec::new();
        for entry in self.all_entries().await {
            out.push(entry.lock().await.snapshot());
        }
        out.sort_unstable_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Administrative hold.
    ///
    /// `true`: `Available | Controlled → Unavailable` (the owner is evicted).
    /// `false`: `Unavailable → Available`. Requires a live connection.
    pub async fn set_unavailable(
        &self,
        id: &DeviceId,
        unavailable: bool,
    ) -> Result<(), BrokerError> {
        let entry = self.entry(id).await?;
        let mut e = entry.lock().await;
        if e.live().is_none() {
            return Err(BrokerError::NotAvailable { id: id.clone() });
        }
        if e.unavailable == unavailable {
            return Ok(());
        }

        e.unavailable = unavailable;
        let evicted = if unavailable { e.lease.take() } else { None };
        let mut ev = Event::new(EventKind::AvailabilityChanged)
            .with_device(id)
            .with_reason(if unavailable { "unavailable" } else { "available" });
        if let Some(lease) = evicted {
            ev = ev.with_caller(&lease.owner);
        }
        self.bus.publish(ev);
        Ok(())
    }

    /// Submits `action` to the device's executor; only the owner may submit.
    pub async fn submit(
        &self,
        id: &DeviceId,
        caller: &CallerId,
        action: ActionRef,
    ) -> Result<JobHandle, BrokerError> {
        self.refuse_if_shutting_down()?;
        let entry = self.entry(id).await?;
        let e = entry.lock().await;
        if !e.is_owned_by(caller) {
            return Err(BrokerError::LeaseNotOwned { id: id.clone() });
        }
        match e.live() {
            Some(live) => live.executor.submit(action),
            None => Err(BrokerError::NotAvailable { id: id.clone() }),
        }
    }

    /// Waits up to `timeout` for the device's most recent job.
    ///
    /// `Ok(None)` when there is no connection, no job, or the job is still
    /// running at the deadline.
    pub async fn wait(
        &self,
        id: &DeviceId,
        timeout: Duration,
    ) -> Result<Option<JobOutcome>, BrokerError> {
        let entry = self.entry(id).await?;
        let executor = entry.lock().await.live().map(|l| Arc::clone(&l.executor));
        match executor {
            Some(executor) => Ok(executor.wait(timeout).await),
            None => Ok(None),
        }
    }

    /// Latest sensor readings; only the owner may read.
    pub async fn read_sensors(
        &self,
        id: &DeviceId,
        caller: &CallerId,
    ) -> Result<SensorSnapshot, BrokerError> {
        let entry = self.entry(id).await?;
        let e = entry.lock().await;
        if !e.is_owned_by(caller) {
            return Err(BrokerError::LeaseNotOwned { id: id.clone() });
        }
        match e.live() {
            Some(live) => Ok(live.connection.read_sensors()),
            None => Err(BrokerError::NotAvailable { id: id.clone() }),
        }
    }

    /// Reclaims every lease whose owner has been silent for longer than the
    /// heartbeat timeout. Returns the evicted `(device, owner)` pairs.
    pub async fn expire_stale_leases(&self, now: Instant) -> Vec<(DeviceId, CallerId)> {
        let timeout = self.settings.heartbeat_timeout;
        let mut evicted = Vec::new();

        for entry in self.all_entries().await {
            let mut e = entry.lock().await;
            let stale = e
                .lease
                .as_ref()
                .is_some_and(|l| now.saturating_duration_since(l.last_heartbeat) > timeout);
            if !stale {
                continue;
            }
            let Some(lease) = e.lease.take() else {
                continue;
            };
            let id = e.id.clone();
            drop(e);

            tracing::info!(device_id = %id, owner = %lease.owner, "lease expired");
            self.bus.publish(
                Event::new(EventKind::LeaseExpired)
                    .with_device(&id)
                    .with_caller(&lease.owner),
            );
            evicted.push((id, lease.owner));
        }
        evicted.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        evicted
    }

    /// Disconnected sessions whose retry window has passed at `now`, sorted by id.
    pub async fn due_for_reconnect(&self, now: Instant) -> Vec<DeviceId> {
        let mut due = Vec::new();
        for entry in self.all_entries().await {
            let e = entry.lock().await;
            if matches!(e.link, Link::Disconnected) && e.next_attempt_at <= now {
                due.push(e.id.clone());
            }
        }
        due.sort_unstable();
        due
    }

    /// Ids of sessions that are not `Disconnected`, sorted.
    pub async fn attached(&self) -> Vec<DeviceId> {
        let mut ids = Vec::new();
        for entry in self.all_entries().await {
            let e = entry.lock().await;
            if !matches!(e.link, Link::Disconnected) {
                ids.push(e.id.clone());
            }
        }
        ids.sort_unstable();
        ids
    }

    /// Refuses new connects, leases and submissions from now on.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    /// True after [`SessionRegistry::begin_shutdown`].
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}

/// Stops the watcher and executor, then closes the connection. Never fails.
async fn teardown(id: &DeviceId, live: Live) {
    live.watcher.cancel();
    live.executor.stop().await;
    close_connection(id, &live.connection).await;
}

async fn close_connection(id: &DeviceId, connection: &ConnectionRef) {
    if let Err(e) = connection.disconnect().await {
        tracing::warn!(device_id = %id, error = %e, "disconnect failed");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::Rng;
    use tokio::time;

    use super::*;
    use crate::actions::{ActionFn, CommandAction, JobContext};
    use crate::device::Command;
    use crate::error::ActionError;
    use crate::testing::MockConnection;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn registry() -> Arc<SessionRegistry> {
        let settings = RegistrySettings {
            heartbeat_timeout: TIMEOUT,
            backoff: BackoffPolicy::default(),
            cancel_grace: Duration::from_millis(100),
        };
        SessionRegistry::new(settings, Bus::new(1024))
    }

    fn dev(id: &str) -> DeviceId {
        DeviceId::from(id)
    }

    async fn connected(reg: &Arc<SessionRegistry>, id: &str) -> Arc<MockConnection> {
        reg.register(DeviceSpec::new(id, id)).await;
        let (ticket, _) = reg.begin_connect(&dev(id)).await.unwrap();
        let conn = MockConnection::new();
        reg.complete_connect(ticket, conn.clone()).await.unwrap();
        conn
    }

    async fn state(reg: &SessionRegistry, id: &str) -> SessionState {
        reg.snapshot(&dev(id)).await.unwrap().state
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let reg = registry();
        assert!(reg.register(DeviceSpec::new("d1", "one")).await);
        assert!(!reg.register(DeviceSpec::new("d1", "renamed")).await);

        let snap = reg.snapshot(&dev("d1")).await.unwrap();
        assert_eq!(snap.display_name, "one");
        assert_eq!(snap.state, SessionState::Disconnected);
        assert_eq!(reg.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_device() {
        let reg = registry();
        let err = reg.acquire_lease(&dev("nope"), &CallerId::from("a")).await;
        assert!(matches!(err, Err(BrokerError::UnknownDevice { .. })));
    }

    #[tokio::test]
    async fn test_begin_connect_requires_disconnected() {
        let reg = registry();
        reg.register(DeviceSpec::new("d1", "one")).await;
        reg.begin_connect(&dev("d1")).await.unwrap();
        assert!(matches!(
            reg.begin_connect(&dev("d1")).await,
            Err(BrokerError::NotDisconnected { .. })
        ));
        assert_eq!(state(&reg, "d1").await, SessionState::Connecting);
    }

    #[tokio::test]
    async fn test_acquire_conflict_changes_nothing() {
        let reg = registry();
        connected(&reg, "d1").await;
        let (a, b) = (CallerId::from("alice"), CallerId::from("bob"));

        reg.acquire_lease(&dev("d1"), &a).await.unwrap();
        let before = reg.snapshot(&dev("d1")).await.unwrap();

        assert!(matches!(
            reg.acquire_lease(&dev("d1"), &b).await,
            Err(BrokerError::LeaseConflict { .. })
        ));
        let after = reg.snapshot(&dev("d1")).await.unwrap();
        assert_eq!(after.owner, Some(a.clone()));
        assert_eq!(after.last_heartbeat, before.last_heartbeat);
    }

    #[tokio::test]
    async fn test_non_owner_cannot_renew_release_or_submit() {
        let reg = registry();
        connected(&reg, "d1").await;
        let (a, b) = (CallerId::from("alice"), CallerId::from("bob"));
        reg.acquire_lease(&dev("d1"), &a).await.unwrap();

        assert!(matches!(
            reg.renew_heartbeat(&dev("d1"), &b).await,
            Err(BrokerError::LeaseNotOwned { .. })
        ));
        assert!(matches!(
            reg.release_lease(&dev("d1"), &b).await,
            Err(BrokerError::LeaseNotOwned { .. })
        ));
        assert!(matches!(
            reg.submit(&dev("d1"), &b, CommandAction::arc("x", Command::new("x"))).await,
            Err(BrokerError::LeaseNotOwned { .. })
        ));
        assert!(matches!(
            reg.read_sensors(&dev("d1"), &b).await,
            Err(BrokerError::LeaseNotOwned { .. })
        ));
        assert_eq!(state(&reg, "d1").await, SessionState::Controlled);
    }

    #[tokio::test]
    async fn test_acquire_requires_connection() {
        let reg = registry();
        reg.register(DeviceSpec::new("d1", "one")).await;
        assert!(matches!(
            reg.acquire_lease(&dev("d1"), &CallerId::from("a")).await,
            Err(BrokerError::NotAvailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_reacquire_by_owner_refreshes() {
        let reg = registry();
        connected(&reg, "d1").await;
        let a = CallerId::from("alice");
        reg.acquire_lease(&dev("d1"), &a).await.unwrap();
        reg.acquire_lease(&dev("d1"), &a).await.unwrap();
        reg.release_lease(&dev("d1"), &a).await.unwrap();
        assert_eq!(state(&reg, "d1").await, SessionState::Available);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_boundary_is_strict() {
        let reg = registry();
        connected(&reg, "d1").await;
        let a = CallerId::from("alice");

        let t0 = Instant::now();
        reg.acquire_lease(&dev("d1"), &a).await.unwrap();

        assert!(reg.expire_stale_leases(t0 + TIMEOUT).await.is_empty());
        assert_eq!(state(&reg, "d1").await, SessionState::Controlled);

        let evicted = reg
            .expire_stale_leases(t0 + TIMEOUT + Duration::from_millis(1))
            .await;
        assert_eq!(evicted, vec![(dev("d1"), a.clone())]);
        assert_eq!(state(&reg, "d1").await, SessionState::Available);
        assert!(matches!(
            reg.renew_heartbeat(&dev("d1"), &a).await,
            Err(BrokerError::LeaseNotOwned { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_renew_keeps_lease_alive() {
        let reg = registry();
        connected(&reg, "d1").await;
        let a = CallerId::from("alice");
        reg.acquire_lease(&dev("d1"), &a).await.unwrap();

        for _ in 0..5 {
            time::advance(Duration::from_secs(8)).await;
            reg.renew_heartbeat(&dev("d1"), &a).await.unwrap();
            assert!(reg.expire_stale_leases(Instant::now()).await.is_empty());
        }
        assert_eq!(state(&reg, "d1").await, SessionState::Controlled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_spacing_and_reset() {
        let reg = registry();
        reg.register(DeviceSpec::new("d1", "one")).await;
        let err = ConnectionError::Unreachable {
            reason: "down".into(),
        };

        for n in 1..=7u32 {
            let now = Instant::now();
            assert_eq!(reg.due_for_reconnect(now).await, vec![dev("d1")], "attempt {n}");
            let (ticket, _) = reg.begin_connect(&dev("d1")).await.unwrap();
            reg.fail_connect(ticket, &err).await.unwrap();

            let snap = reg.snapshot(&dev("d1")).await.unwrap();
            assert_eq!(snap.connect_attempts, n);
            let wait = if n <= 5 { 30 } else { 120 };
            let next = snap.next_attempt_at.unwrap();
            assert_eq!(next - now, Duration::from_secs(wait), "attempt {n}");

            assert!(reg.due_for_reconnect(next - Duration::from_millis(1)).await.is_empty());
            time::advance(Duration::from_secs(wait)).await;
        }

        let (ticket, _) = reg.begin_connect(&dev("d1")).await.unwrap();
        reg.complete_connect(ticket, MockConnection::new()).await.unwrap();
        assert_eq!(reg.snapshot(&dev("d1")).await.unwrap().connect_attempts, 0);
    }

    #[tokio::test]
    async fn test_stale_ticket_is_rejected_and_connection_closed() {
        let reg = registry();
        reg.register(DeviceSpec::new("d1", "one")).await;
        let (old, _) = reg.begin_connect(&dev("d1")).await.unwrap();

        reg.mark_disconnected(&dev("d1")).await.unwrap();
        let (_current, _) = reg.begin_connect(&dev("d1")).await.unwrap();

        let late = MockConnection::new();
        assert!(matches!(
            reg.complete_connect(old.clone(), late.clone()).await,
            Err(BrokerError::StaleConnect { .. })
        ));
        assert_eq!(late.disconnects(), 1);
        assert!(matches!(
            reg.fail_connect(old, &ConnectionError::Timeout { timeout: TIMEOUT }).await,
            Err(BrokerError::StaleConnect { .. })
        ));
        assert_eq!(state(&reg, "d1").await, SessionState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_while_connecting_keeps_backoff_and_aborts_attempt() {
        let reg = registry();
        reg.register(DeviceSpec::new("d1", "one")).await;
        let err = ConnectionError::Unreachable {
            reason: "down".into(),
        };
        for _ in 0..6 {
            let (ticket, _) = reg.begin_connect(&dev("d1")).await.unwrap();
            reg.fail_connect(ticket, &err).await.unwrap();
            time::advance(Duration::from_secs(120)).await;
        }

        let due = reg.snapshot(&dev("d1")).await.unwrap().next_attempt_at;
        let (hanging, _) = reg.begin_connect(&dev("d1")).await.unwrap();
        time::advance(Duration::from_secs(5)).await;
        reg.mark_disconnected(&dev("d1")).await.unwrap();

        assert!(hanging.abort.is_cancelled());
        let snap = reg.snapshot(&dev("d1")).await.unwrap();
        assert_eq!(snap.state, SessionState::Disconnected);
        assert_eq!(snap.connect_attempts, 6);
        assert_eq!(snap.next_attempt_at, due);

        let late = MockConnection::new();
        assert!(matches!(
            reg.complete_connect(hanging, late.clone()).await,
            Err(BrokerError::StaleConnect { .. })
        ));
        assert_eq!(late.disconnects(), 1);
        assert_eq!(state(&reg, "d1").await, SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_mark_disconnected_tears_down() {
        let reg = registry();
        let conn = connected(&reg, "d1").await;
        let a = CallerId::from("alice");
        reg.acquire_lease(&dev("d1"), &a).await.unwrap();
        let job = reg
            .submit(&dev("d1"), &a, ActionFn::arc("wait", |ctx: JobContext| async move {
                ctx.cancelled().await;
                Err::<(), ActionError>(ActionError::Canceled)
            }))
            .await
            .unwrap();

        reg.mark_disconnected(&dev("d1")).await.unwrap();

        let snap = reg.snapshot(&dev("d1")).await.unwrap();
        assert_eq!(snap.state, SessionState::Disconnected);
        assert_eq!(snap.owner, None);
        assert_eq!(snap.connect_attempts, 0);
        assert!(snap.current_job.is_none());
        assert_eq!(conn.disconnects(), 1);
        assert_eq!(job.outcome(), Some(JobOutcome::Cancelled));
        assert_eq!(reg.due_for_reconnect(Instant::now()).await, vec![dev("d1")]);
    }

    #[tokio::test]
    async fn test_control_loss_for_old_generation_is_ignored() {
        let reg = registry();
        let first = connected(&reg, "d1").await;

        assert!(reg.on_control_lost(&dev("d1"), 1).await);
        assert_eq!(first.disconnects(), 1);

        let (ticket, _) = reg.begin_connect(&dev("d1")).await.unwrap();
        reg.complete_connect(ticket, MockConnection::new()).await.unwrap();

        // Duplicate delivery from the first connection.
        assert!(!reg.on_control_lost(&dev("d1"), 1).await);
        assert_eq!(state(&reg, "d1").await, SessionState::Available);
    }

    #[tokio::test]
    async fn test_set_unavailable_evicts_owner() {
        let reg = registry();
        connected(&reg, "d1").await;
        let a = CallerId::from("alice");
        reg.acquire_lease(&dev("d1"), &a).await.unwrap();

        reg.set_unavailable(&dev("d1"), true).await.unwrap();
        let snap = reg.snapshot(&dev("d1")).await.unwrap();
        assert_eq!(snap.state, SessionState::Unavailable);
        assert_eq!(snap.owner, None);
        assert!(matches!(
            reg.acquire_lease(&dev("d1"), &a).await,
            Err(BrokerError::NotAvailable { .. })
        ));

        reg.set_unavailable(&dev("d1"), false).await.unwrap();
        assert_eq!(state(&reg, "d1").await, SessionState::Available);
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_work() {
        let reg = registry();
        connected(&reg, "d1").await;
        let a = CallerId::from("alice");
        reg.acquire_lease(&dev("d1"), &a).await.unwrap();
        reg.register(DeviceSpec::new("d2", "two")).await;
        reg.register(DeviceSpec::new("d3", "three")).await;
        let (pending, _) = reg.begin_connect(&dev("d3")).await.unwrap();
        reg.begin_shutdown();

        assert!(matches!(
            reg.acquire_lease(&dev("d1"), &CallerId::from("b")).await,
            Err(BrokerError::ShutdownInProgress)
        ));
        assert!(matches!(
            reg.submit(&dev("d1"), &a, CommandAction::arc("sit", Command::new("sit")))
                .await,
            Err(BrokerError::ShutdownInProgress)
        ));
        assert!(matches!(
            reg.begin_connect(&dev("d2")).await,
            Err(BrokerError::ShutdownInProgress)
        ));

        let late = MockConnection::new();
        assert!(matches!(
            reg.complete_connect(pending, late.clone()).await,
            Err(BrokerError::ShutdownInProgress)
        ));
        assert_eq!(late.disconnects(), 1);
        assert_eq!(state(&reg, "d3").await, SessionState::Connecting);
    }

    #[tokio::test]
    async fn test_owner_reads_sensors() {
        let reg = registry();
        connected(&reg, "d1").await;
        let a = CallerId::from("alice");
        reg.acquire_lease(&dev("d1"), &a).await.unwrap();
        let sensors = reg.read_sensors(&dev("d1"), &a).await.unwrap();
        assert!(sensors.contains_key("battery_volts"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_has_single_winner() {
        let reg = registry();
        connected(&reg, "d1").await;

        let mut set = tokio::task::JoinSet::new();
        for i in 0..32 {
            let reg = reg.clone();
            set.spawn(async move {
                let caller = CallerId::from(format!("caller-{i}"));
                reg.acquire_lease(&dev("d1"), &caller).await.ok().map(|_| caller)
            });
        }

        let mut winners = Vec::new();
        while let Some(res) = set.join_next().await {
            if let Some(caller) = res.unwrap() {
                winners.push(caller);
            }
        }
        assert_eq!(winners.len(), 1);
        let snap = reg.snapshot(&dev("d1")).await.unwrap();
        assert_eq!(snap.owner.as_ref(), winners.first());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_randomized_lease_traffic_keeps_invariants() {
        let reg = registry();
        let ids: Vec<String> = (0..4).map(|i| format!("dev-{i}")).collect();
        for id in &ids {
            connected(&reg, id).await;
        }

        let mut set = tokio::task::JoinSet::new();
        for c in 0..8 {
            let reg = reg.clone();
            let ids = ids.clone();
            set.spawn(async move {
                let caller = CallerId::from(format!("caller-{c}"));
                for _ in 0..200 {
                    let (pick, op) = {
                        let mut rng = rand::rng();
                        (rng.random_range(0..ids.len()), rng.random_range(0..4u8))
                    };
                    let id = dev(&ids[pick]);
                    let _ = match op {
                        0 => reg.acquire_lease(&id, &caller).await,
                        1 => reg.renew_heartbeat(&id, &caller).await,
                        2 => reg.release_lease(&id, &caller).await,
                        _ => {
                            reg.expire_stale_leases(Instant::now() + TIMEOUT * 2).await;
                            Ok(())
                        }
                    };
                    tokio::task::yield_now().await;
                }
            });
        }
        while let Some(res) = set.join_next().await {
            res.unwrap();
        }

        let mut seen = HashSet::new();
        for snap in reg.list().await {
            assert!(seen.insert(snap.id.clone()));
            match snap.state {
                SessionState::Controlled => {
                    assert!(snap.owner.is_some());
                    assert!(snap.last_heartbeat.is_some());
                }
                SessionState::Available => assert!(snap.owner.is_none()),
                other => panic!("unexpected state {other:?}"),
            }
        }
    }
}
