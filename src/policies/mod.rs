//! Reconnect policies.
//!
//! ## Contents
//! - [`BackoffPolicy`] how long a disconnected device waits between connect attempts
//! - [`JitterPolicy`]  randomized extra delay to avoid synchronized reconnects
//!
//! ## Quick wiring
//! ```text
//! BrokerConfig { backoff: BackoffPolicy, .. }
//!      └─► SessionRegistry::fail_connect computes next_attempt_at = now + backoff.next(failures)
//!      └─► ReconnectScheduler dispatches entries whose next_attempt_at has passed
//! ```
//!
//! ## Defaults
//! - `BackoffPolicy::default()` → 30s after failures 1..=5, 120s afterwards, no jitter.

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
