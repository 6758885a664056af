//! Runtime events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `SessionRegistry`, `TaskExecutor` loops, the reconnect
//!   scheduler, the heartbeat monitor, the control-loss watcher, `Broker`,
//!   `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the broker's listener, which fans out to `SubscriberSet`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
