//! # Event subscribers.
//!
//! ## Architecture
//! ```text
//!   Registry / Executors / Sweeps ── publish(Event) ──► Bus ──► broker listener
//!                                                                   │
//!                                                             SubscriberSet
//!                                                        ┌──────────┼──────────┐
//!                                                        ▼          ▼          ▼
//!                                                    LogWriter   Metrics    Custom
//! ```
//!
//! - [`Subscribe`]: the extension trait
//! - [`SubscriberSet`]: bounded per-subscriber fan-out with panic isolation
//! - [`LogWriter`]: built-in subscriber rendering events via `tracing`

mod log;
mod set;
mod subscriber;

pub use log::LogWriter;
pub(crate) use set::panic_message;
pub use set::SubscriberSet;
pub use subscriber::Subscribe;
