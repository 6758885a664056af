//! # leasevisor
//!
//! **Leasevisor** brokers exclusive, time-bounded control over a pool of
//! independently connected devices among many concurrent callers.
//!
//! It keeps disconnected devices reconnecting with backoff, reclaims leases
//! from callers that stopped sending heartbeats, and runs at most one
//! cancellable action per device at a time. What an action does is up to the
//! caller; the runtime only decides whether and when it may run.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   Caller A        Caller B        Caller C
//!      │ acquire/renew/release/submit/wait │
//!      ▼                ▼                ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Broker (runtime front object)                                    │
//! │  - Bus (broadcast events)                                         │
//! │  - SubscriberSet (fans out to user subscribers)                   │
//! │  - SessionRegistry (one locked entry per device)                  │
//! │  - ReconnectScheduler / HeartbeatMonitor (periodic sweeps)        │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//!   ┌──────────┐       ┌──────────┐       ┌──────────┐
//!   │ device 1 │       │ device 2 │       │ device 3 │
//!   │ Entry    │       │ Entry    │       │ Entry    │
//!   │ Executor │       │ Executor │       │ (down)   │
//!   │ Watcher  │       │ Watcher  │       │          │
//!   └────┬─────┘       └────┬─────┘       └──────────┘
//!        │ Connection       │ Connection        ▲
//!        ▼                  ▼                   │ Connector::connect (with backoff)
//!     hardware           hardware          ReconnectScheduler
//! ```
//!
//! ### Session lifecycle
//! ```text
//! register ─► Disconnected ─► Connecting ─► Available ◄──► Controlled
//!                  ▲              │            │  ▲             │
//!                  └──────────────┘            ▼  │             │
//!                  ▲  (connect failed,     Unavailable          │
//!                  │   backoff 30s ×5,                          │
//!                  │   then 120s)                               │
//!                  └──── control lost / disconnect ◄────────────┘
//! ```
//!
//! ### Job lifecycle (per device)
//! ```text
//! submit ─► JobHandle
//!   loop {
//!     ├─► newest queued job wins; older ones resolve Cancelled
//!     ├─► publish JobStarted
//!     ├─► run action with its own CancellationToken
//!     │     ├─ finishes           → JobSucceeded / JobFailed
//!     │     └─ newer submission   → cancel, wait ≤ cancel_grace → JobCancelled
//!     └─► next
//!   }
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                               |
//! |-------------------|--------------------------------------------------------------|--------------------------------------------------|
//! | **Broker**        | Leases, reconnection, heartbeat expiry, graceful shutdown.   | [`Broker`], [`BrokerConfig`]                     |
//! | **Sessions**      | Atomic per-device state and snapshots.                       | [`SessionRegistry`], [`SessionState`]            |
//! | **Jobs**          | Single-flight, last-request-wins action execution.           | [`TaskExecutor`], [`JobHandle`], [`JobOutcome`]  |
//! | **Actions**       | Units of device work, as traits or closures.                 | [`Action`], [`ActionFn`], [`CommandAction`]      |
//! | **Devices**       | The seam to the vendor connection library.                   | [`Connector`], [`Connection`], [`DeviceSpec`]    |
//! | **Policies**      | Reconnect backoff and jitter.                                | [`BackoffPolicy`], [`JitterPolicy`]              |
//! | **Subscriber API**| Hook into runtime events (logging, audit, metrics).          | [`Subscribe`], [`LogWriter`]                     |
//! | **Errors**        | Typed errors for every caller-facing operation.              | [`BrokerError`], [`ActionError`], [`RuntimeError`] |
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use leasevisor::{
//!     ActionError, ActionFn, Broker, BrokerConfig, CallerId, Command, ConnectorRef,
//!     DeviceId, DeviceSpec, JobContext, LogWriter, Subscribe,
//! };
//!
//! # async fn demo(connector: ConnectorRef) -> Result<(), Box<dyn std::error::Error>> {
//! let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
//! let broker = Broker::builder(BrokerConfig::default())
//!     .with_subscribers(subs)
//!     .with_connector(connector)
//!     .build()?;
//!
//! broker.register_devices([DeviceSpec::new("00e20100", "Vector-A1B2")]).await;
//! broker.start();
//!
//! let id = DeviceId::from("00e20100");
//! let me = CallerId::from("session-42");
//! broker.acquire(&id, &me).await?;
//!
//! let dance = ActionFn::arc("dance", |ctx: JobContext| async move {
//!     while !ctx.is_cancelled() {
//!         ctx.dispatch(Command::new("app_intent")).await?;
//!         ctx.sleep(Duration::from_secs(1)).await?;
//!     }
//!     Err::<(), ActionError>(ActionError::Canceled)
//! });
//! broker.submit(&id, &me, dance).await?;
//!
//! broker.renew(&id, &me).await?;
//! broker.release(&id, &me).await?;
//! broker.shutdown().await?;
//! # Ok(())
//! # }
//! ```
mod actions;
mod core;
mod device;
mod error;
mod events;
mod policies;
mod subscribers;

#[cfg(test)]
mod testing;

// ---- Public re-exports ----

pub use actions::{Action, ActionFn, ActionRef, CommandAction, JobContext};
pub use core::{
    Broker, BrokerBuilder, BrokerConfig, ConnectTicket, JobHandle, JobOutcome, SessionRegistry,
    SessionSnapshot, SessionState, Signal, TaskExecutor,
};
pub use device::{
    CallerId, Command, ConnectParams, Connection, ConnectionRef, Connector, ConnectorRef,
    DeviceId, DeviceSpec, SensorSnapshot,
};
pub use error::{ActionError, BrokerError, ConfigError, ConnectionError, RuntimeError};
pub use events::{Bus, Event, EventKind};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
