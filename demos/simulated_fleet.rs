//! # Example: simulated_fleet
//!
//! Runs the broker against a fleet of in-process simulated devices.
//!
//! Shows how to:
//! - Implement [`Connector`] and [`Connection`] for a device library.
//! - Attach [`LogWriter`] and a custom [`Subscribe`] implementation.
//! - Acquire a lease, submit actions, supersede one with another and wait.
//! - Shut the broker down gracefully.
//!
//! ## Flow
//! ```text
//! register_devices ──► start()
//!     ├─► ReconnectScheduler ──► SimConnector::connect (flaky device fails first)
//!     ├─► caller acquires "vector-1", submits "dance"
//!     ├─► caller submits "sit" ──► "dance" cancelled, "sit" runs
//!     ├─► caller goes silent ──► HeartbeatMonitor evicts the lease
//!     └─► shutdown() ──► every device disconnected
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=debug cargo run --example simulated_fleet
//! ```

use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use leasevisor::{
    ActionError, ActionFn, BackoffPolicy, Broker, BrokerConfig, CallerId, Command,
    CommandAction, ConnectParams, Connection, ConnectionError, ConnectionRef, Connector,
    DeviceId, DeviceSpec, Event, EventKind, JobContext, LogWriter, SensorSnapshot, Subscribe,
};

/// A device that acknowledges every command after a short delay.
struct SimConnection {
    id: DeviceId,
    lost: CancellationToken,
}

#[async_trait]
impl Connection for SimConnection {
    async fn dispatch(&self, command: Command) -> Result<serde_json::Value, ConnectionError> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        println!("[{}] <- {}", self.id, command.name);
        Ok(json!({ "ack": command.name }))
    }

    fn read_sensors(&self) -> SensorSnapshot {
        let mut out = SensorSnapshot::new();
        out.insert("battery_volts".into(), json!(3.9));
        out.insert("is_on_charger".into(), json!(false));
        out
    }

    async fn control_lost(&self) {
        self.lost.cancelled().await;
    }

    async fn disconnect(&self) -> Result<(), ConnectionError> {
        println!("[{}] disconnected", self.id);
        Ok(())
    }
}

/// Opens [`SimConnection`]s; devices with `flaky = "true"` fail their first attempt.
#[derive(Default)]
struct SimConnector {
    attempts: AtomicU32,
}

#[async_trait]
impl Connector for SimConnector {
    async fn connect(
        &self,
        id: &DeviceId,
        params: &ConnectParams,
    ) -> Result<ConnectionRef, ConnectionError> {
        let n = self.attempts.fetch_add(1, Ordering::Relaxed);
        if params.get("flaky").is_some_and(|v| v == "true") && n < 3 {
            return Err(ConnectionError::Unreachable {
                reason: "no route to host".into(),
            });
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(Arc::new(SimConnection {
            id: id.clone(),
            lost: CancellationToken::new(),
        }))
    }
}

/// Prints lease and job transitions only.
struct LeaseAudit;

#[async_trait]
impl Subscribe for LeaseAudit {
    async fn on_event(&self, ev: &Event) {
        match ev.kind {
            EventKind::LeaseAcquired | EventKind::LeaseReleased | EventKind::LeaseExpired => {
                println!(
                    "[audit] {:?}: device={} caller={}",
                    ev.kind,
                    ev.device.as_deref().unwrap_or("-"),
                    ev.caller.as_deref().unwrap_or("-"),
                );
            }
            EventKind::JobSucceeded | EventKind::JobFailed | EventKind::JobCancelled => {
                println!(
                    "[audit] {:?}: device={} job={} reason={}",
                    ev.kind,
                    ev.device.as_deref().unwrap_or("-"),
                    ev.job.as_deref().unwrap_or("-"),
                    ev.reason.as_deref().unwrap_or("-"),
                );
            }
            _ => {}
        }
    }

    fn name(&self) -> &'static str {
        "lease-audit"
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cfg = BrokerConfig {
        heartbeat_timeout: Duration::from_secs(2),
        heartbeat_interval: Duration::from_millis(500),
        reconnect_interval: Duration::from_millis(500),
        backoff: BackoffPolicy {
            fast: Duration::from_secs(1),
            fast_attempts: 2,
            slow: Duration::from_secs(3),
            ..BackoffPolicy::default()
        },
        cancel_grace: Duration::from_millis(500),
        grace: Duration::from_secs(3),
        ..BrokerConfig::default()
    };

    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new()), Arc::new(LeaseAudit)];
    let broker = Broker::builder(cfg)
        .with_subscribers(subs)
        .with_connector(Arc::new(SimConnector::default()))
        .build()?;

    broker
        .register_devices([
            DeviceSpec::new("vector-1", "Vector-A1B2"),
            DeviceSpec::new("vector-2", "Vector-C3D4").with_param("flaky", "true"),
        ])
        .await;
    broker.start();

    let id = DeviceId::from("vector-1");
    let me = CallerId::from("session-42");

    while !broker.snapshot(&id).await?.state.is_connected() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    broker.acquire(&id, &me).await?;
    println!("sensors: {:?}", broker.read_sensors(&id, &me).await?);

    let dance = ActionFn::arc("dance", |ctx: JobContext| async move {
        while !ctx.is_cancelled() {
            ctx.dispatch(Command::new("app_intent").with_params(json!({ "intent": "dance" })))
                .await?;
            ctx.sleep(Duration::from_millis(200)).await?;
        }
        Err::<(), ActionError>(ActionError::Canceled)
    });
    let dancing = broker.submit(&id, &me, dance).await?;

    tokio::time::sleep(Duration::from_millis(700)).await;
    broker.renew(&id, &me).await?;

    let sit = CommandAction::arc("sit", Command::new("sit"));
    broker.submit(&id, &me, sit).await?;
    println!("dance resolved: {:?}", dancing.wait(Duration::from_secs(1)).await);
    println!("sit resolved: {:?}", broker.wait(&id, Duration::from_secs(1)).await?);

    // Stop renewing; the monitor reclaims the lease.
    tokio::time::sleep(Duration::from_secs(3)).await;
    for s in broker.list().await {
        println!(
            "{} ({}) state={} owner={:?} attempts={}",
            s.id, s.display_name, s.state.as_label(), s.owner, s.connect_attempts
        );
    }

    broker.shutdown().await?;
    Ok(())
}
