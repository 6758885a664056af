//! Runtime core: sessions, leases, reconnection and job execution.
//!
//! The public entry point is [`Broker`]; [`SessionRegistry`] and
//! [`TaskExecutor`] are exposed for callers that need finer control.
//!
//! Internal modules:
//! - [`registry`]: per-device session table with atomic compound operations;
//! - [`session`]: session record, derived state and snapshots;
//! - [`executor`]: per-device single-flight job loop;
//! - [`runner`]: runs one job and reports its outcome;
//! - [`job`]: job handles and completion signalling;
//! - [`reconnect`]: periodic reconnection sweep with backoff;
//! - [`heartbeat`]: periodic lease expiry sweep;
//! - [`watcher`]: control-loss watcher per live connection;
//! - [`broker`]: front object, wiring and graceful shutdown;
//! - [`shutdown`]: OS termination signals.

mod broker;
mod builder;
mod config;
mod executor;
mod heartbeat;
mod job;
mod reconnect;
mod registry;
mod runner;
mod session;
mod shutdown;
mod watcher;

pub use broker::Broker;
pub use builder::BrokerBuilder;
pub use config::BrokerConfig;
pub use executor::TaskExecutor;
pub use job::{JobHandle, JobOutcome};
pub use registry::SessionRegistry;
pub use session::{ConnectTicket, SessionSnapshot, SessionState};
pub use shutdown::Signal;
