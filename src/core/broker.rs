//! # Broker: leases devices to callers, keeps them connected, runs their jobs.
//!
//! The [`Broker`] owns the event bus, the [`SessionRegistry`], the subscriber
//! fan-out and the two background sweeps. It is the caller-facing API and it
//! drives graceful shutdown.
//!
//! ## High-level architecture
//! ```text
//! Caller API ──► Broker ──► SessionRegistry (one Mutex<Entry> per device)
//!                  │              │
//!                  │              ├─► TaskExecutor (per connected device)
//!                  │              └─► control-loss watcher (per connection)
//!                  │
//!   start():       ├─► ReconnectScheduler::run  (every reconnect_interval)
//!                  └─► HeartbeatMonitor::run    (every heartbeat_interval)
//!
//! Event flow:
//!   registry / executors / sweeps ── publish(Event) ──► Bus ──► listener ──► SubscriberSet::emit
//!                                                                        ┌─────────┼─────────┐
//!                                                                        ▼         ▼         ▼
//!                                                                    worker S1  worker S2  worker SN
//!
//! Shutdown path (run() on OS signal, or shutdown() directly):
//!   registry.begin_shutdown()          → refuse new connects / leases / submissions
//!   Bus.publish(ShutdownRequested)
//!   runtime_token.cancel()             → sweeps and in-flight connects stop
//!   tear down every attached session concurrently, wait up to cfg.grace:
//!     ├─ all done      → Bus.publish(AllStoppedWithin)
//!     └─ grace elapsed → Bus.publish(GraceExceeded), Err(RuntimeError::GraceExceeded { stuck })
//!   listener drains the final events into the subscribers and exits
//! ```
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use leasevisor::{Broker, BrokerConfig, ConnectorRef, DeviceSpec, LogWriter, Subscribe};
//!
//! # async fn demo(connector: ConnectorRef) -> Result<(), Box<dyn std::error::Error>> {
//! let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter)];
//! let broker = Broker::builder(BrokerConfig::default())
//!     .with_subscribers(subs)
//!     .with_connector(connector)
//!     .build()?;
//!
//! broker
//!     .register_devices(DeviceSpec::load_all("devices.json")?)
//!     .await;
//! broker.run().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::actions::ActionRef;
use crate::core::{
    builder::BrokerBuilder,
    config::BrokerConfig,
    heartbeat::HeartbeatMonitor,
    job::{JobHandle, JobOutcome},
    reconnect::ReconnectScheduler,
    registry::{RegistrySettings, SessionRegistry},
    session::SessionSnapshot,
    shutdown,
};
use crate::device::{CallerId, ConnectorRef, DeviceId, DeviceSpec, SensorSnapshot};
use crate::error::{BrokerError, RuntimeError};
use crate::events::{Bus, Event, EventKind};
use crate::subscribers::{Subscribe, SubscriberSet};

/// Minimum time shutdown gives subscribers to drain the final events.
const FLUSH_BOUND: Duration = Duration::from_millis(500);

/// Brokers exclusive, heartbeat-bounded control over a pool of devices.
pub struct Broker {
    cfg: BrokerConfig,
    bus: Bus,
    registry: Arc<SessionRegistry>,
    connector: ConnectorRef,
    runtime_token: CancellationToken,
    started: AtomicBool,
    stopping: AtomicBool,
    listener: Mutex<Option<JoinHandle<()>>>,
    sweeps: Mutex<Vec<JoinHandle<()>>>,
}

impl Broker {
    /// Returns a builder for a broker with the given configuration.
    pub fn builder(cfg: BrokerConfig) -> BrokerBuilder {
        BrokerBuilder::new(cfg)
    }

    pub(crate) fn new_internal(
        cfg: BrokerConfig,
        subscribers: Vec<Arc<dyn Subscribe>>,
        connector: ConnectorRef,
    ) -> Self {
        let bus = Bus::new(cfg.bus_capacity_clamped());
        let subs = SubscriberSet::new(subscribers, bus.clone());
        let listener = subscriber_listener(&bus, subs);
        let registry = SessionRegistry::new(RegistrySettings::from(&cfg), bus.clone());

        Self {
            cfg,
            bus,
            registry,
            connector,
            runtime_token: CancellationToken::new(),
            started: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            listener: Mutex::new(Some(listener)),
            sweeps: Mutex::new(Vec::new()),
        }
    }

    /// Runtime configuration.
    pub fn config(&self) -> &BrokerConfig {
        &self.cfg
    }

    /// The event bus; subscribe to observe runtime events directly.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// The underlying session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Registers every device in `specs`; returns how many were new.
    pub async fn register_devices(&self, specs: impl IntoIterator<Item = DeviceSpec>) -> usize {
        let mut added = 0;
        for spec in specs {
            if self.registry.register(spec).await {
                added += 1;
            }
        }
        added
    }

    /// Grants `caller` exclusive control of `id`.
    pub async fn acquire(&self, id: &DeviceId, caller: &CallerId) -> Result<(), BrokerError> {
        self.registry.acquire_lease(id, caller).await
    }

    /// Keeps `caller`'s lease on `id` alive.
    pub async fn renew(&self, id: &DeviceId, caller: &CallerId) -> Result<(), BrokerError> {
        self.registry.renew_heartbeat(id, caller).await
    }

    /// Gives up `caller`'s lease on `id`.
    pub async fn release(&self, id: &DeviceId, caller: &CallerId) -> Result<(), BrokerError> {
        self.registry.release_lease(id, caller).await
    }

    /// Runs `action` on `id`, superseding the current job. Owner only.
    pub async fn submit(
        &self,
        id: &DeviceId,
        caller: &CallerId,
        action: ActionRef,
    ) -> Result<JobHandle, BrokerError> {
        self.registry.submit(id, caller, action).await
    }

    /// Waits up to `timeout` for the latest job on `id`.
    pub async fn wait(
        &self,
        id: &DeviceId,
        timeout: Duration,
    ) -> Result<Option<JobOutcome>, BrokerError> {
        self.registry.wait(id, timeout).await
    }

    /// Latest sensor readings of `id`. Owner only.
    pub async fn read_sensors(
        &self,
        id: &DeviceId,
        caller: &CallerId,
    ) -> Result<SensorSnapshot, BrokerError> {
        self.registry.read_sensors(id, caller).await
    }

    /// Current state of one session.
    pub async fn snapshot(&self, id: &DeviceId) -> Result<SessionSnapshot, BrokerError> {
        self.registry.snapshot(id).await
    }

    /// Current state of all sessions, sorted by id.
    pub async fn list(&self) -> Vec<SessionSnapshot> {
        self.registry.list().await
    }

    /// Puts `id` on (or takes it off) administrative hold.
    pub async fn set_unavailable(
        &self,
        id: &DeviceId,
        unavailable: bool,
    ) -> Result<(), BrokerError> {
        self.registry.set_unavailable(id, unavailable).await
    }

    /// Drops the connection of `id`; the scheduler reconnects it on its next sweep.
    pub async fn disconnect(&self, id: &DeviceId) -> Result<(), BrokerError> {
        self.registry.mark_disconnected(id).await
    }

    /// Spawns the reconnection scheduler and the heartbeat monitor.
    ///
    /// Idempotent. Must be called from within a tokio runtime.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let scheduler = ReconnectScheduler::new(
            Arc::clone(&self.registry),
            self.connector.clone(),
            self.cfg.reconnect_interval,
            self.cfg.connect_timeout(),
        );
        let monitor =
            HeartbeatMonitor::new(Arc::clone(&self.registry), self.cfg.heartbeat_interval);

        let mut sweeps = self.sweeps.lock().unwrap_or_else(PoisonError::into_inner);
        sweeps.push(tokio::spawn(scheduler.run(self.runtime_token.child_token())));
        sweeps.push(tokio::spawn(monitor.run(self.runtime_token.child_token())));
        tracing::info!(
            reconnect_every_ms = self.cfg.reconnect_interval.as_millis() as u64,
            heartbeat_every_ms = self.cfg.heartbeat_interval.as_millis() as u64,
            "broker started"
        );
    }

    /// Starts the broker, then waits for a termination signal and shuts down.
    pub async fn run(&self) -> Result<(), RuntimeError> {
        self.start();
        match shutdown::wait_for_signal().await {
            Ok(signal) => {
                tracing::info!(signal = signal.as_label(), "shutdown signal received");
                self.shutdown().await
            }
            Err(e) => {
                tracing::error!(error = %e, "cannot listen for shutdown signals");
                self.shutdown().await?;
                Err(RuntimeError::Signal(e))
            }
        }
    }

    /// Stops accepting work and tears every session down within `cfg.grace`.
    ///
    /// Idempotent: later calls return `Ok(())` immediately.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.registry.begin_shutdown();
        self.bus.publish(Event::new(EventKind::ShutdownRequested));
        self.runtime_token.cancel();

        let sweeps: Vec<_> = self
            .sweeps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for sweep in sweeps {
            let _ = sweep.await;
        }

        let res = self.teardown_all_with_grace().await;
        self.flush_listener().await;
        res
    }

    /// Tears down every attached session concurrently, bounded by `cfg.grace`.
    ///
    /// Publishes [`EventKind::AllStoppedWithin`] on success, or
    /// [`EventKind::GraceExceeded`] on timeout and returns
    /// [`RuntimeError::GraceExceeded`] with the devices still tearing down.
    async fn teardown_all_with_grace(&self) -> Result<(), RuntimeError> {
        let grace = self.cfg.grace;
        let mut pending: HashSet<DeviceId> = HashSet::new();
        let mut set = JoinSet::new();

        for id in self.registry.attached().await {
            pending.insert(id.clone());
            let registry = Arc::clone(&self.registry);
            set.spawn(async move {
                if let Err(e) = registry.disconnect(&id, "shutdown").await {
                    tracing::warn!(device_id = %id, reason = e.as_label(), "teardown failed");
                }
                id
            });
        }

        let done = tokio::time::timeout(grace, async {
            while let Some(res) = set.join_next().await {
                if let Ok(id) = res {
                    pending.remove(&id);
                }
            }
        })
        .await;

        match done {
            Ok(()) => {
                self.bus.publish(Event::new(EventKind::AllStoppedWithin));
                Ok(())
            }
            Err(_) => {
                set.abort_all();
                let mut stuck: Vec<DeviceId> = pending.into_iter().collect();
                stuck.sort_unstable();
                let names: Vec<&str> = stuck.iter().map(DeviceId::as_str).collect();
                tracing::error!(
                    grace_ms = grace.as_millis() as u64,
                    stuck = ?names,
                    "shutdown grace exceeded"
                );
                self.bus.publish(
                    Event::new(EventKind::GraceExceeded).with_reason(names.join(",")),
                );
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        }
    }

    /// Waits (bounded) until the listener delivered the final events to subscribers.
    async fn flush_listener(&self) {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut listener) = listener else {
            return;
        };
        let bound = self.cfg.grace.max(FLUSH_BOUND);
        if tokio::time::timeout(bound, &mut listener).await.is_err() {
            tracing::warn!("subscribers did not drain in time");
            listener.abort();
        }
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        self.runtime_token.cancel();
    }
}

/// Forwards bus events to the subscriber set until the final shutdown event.
fn subscriber_listener(bus: &Bus, subs: SubscriberSet) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ev) => {
                    let last = matches!(
                        ev.kind,
                        EventKind::AllStoppedWithin | EventKind::GraceExceeded
                    );
                    subs.emit(&ev);
                    if last {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event listener lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
        subs.shutdown().await;
    })
}
