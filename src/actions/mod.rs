//! # Action abstractions.
//!
//! - [`Action`] - trait for async cancelable device work
//! - [`ActionFn`] - closure-backed action
//! - [`CommandAction`] - action that sends a single device command
//! - [`ActionRef`] - shared reference to an action (`Arc<dyn Action>`)
//! - [`JobContext`] - what a running job receives (token + connection)

mod action;
mod action_fn;

pub use action::{Action, ActionRef, JobContext};
pub use action_fn::{ActionFn, CommandAction};
