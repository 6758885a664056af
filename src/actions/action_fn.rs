//! # Function-backed and command-backed actions
//!
//! [`ActionFn`] wraps a closure `F: Fn(JobContext) -> Fut`, producing a fresh
//! future per run. No state is shared between runs; if you need some, capture
//! an `Arc<...>` explicitly.
//!
//! [`CommandAction`] sends a single [`Command`] and succeeds when the device
//! acknowledges it.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use leasevisor::{ActionError, ActionFn, ActionRef, JobContext};
//!
//! let a: ActionRef = ActionFn::arc("wiggle", |ctx: JobContext| async move {
//!     ctx.sleep(Duration::from_millis(50)).await?;
//!     Ok::<_, ActionError>(())
//! });
//!
//! assert_eq!(a.name(), "wiggle");
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::actions::action::{Action, JobContext};
use crate::device::Command;
use crate::error::ActionError;

/// Function-backed action.
#[derive(Debug)]
pub struct ActionFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> ActionFn<F> {
    /// Creates a new function-backed action.
    ///
    /// Prefer [`ActionFn::arc`] when you immediately need an [`ActionRef`](crate::ActionRef).
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    /// Creates the action and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<F, Fut> Action for ActionFn<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ActionError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: JobContext) -> Result<(), ActionError> {
        (self.f)(ctx).await
    }
}

/// Action that dispatches one command.
#[derive(Clone, Debug)]
pub struct CommandAction {
    name: Cow<'static, str>,
    command: Command,
}

impl CommandAction {
    /// Creates an action named `name` that sends `command`.
    pub fn new(name: impl Into<Cow<'static, str>>, command: Command) -> Self {
        Self {
            name: name.into(),
            command,
        }
    }

    /// Same as [`CommandAction::new`], wrapped in an `Arc`.
    pub fn arc(name: impl Into<Cow<'static, str>>, command: Command) -> Arc<Self> {
        Arc::new(Self::new(name, command))
    }
}

#[async_trait]
impl Action for CommandAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: JobContext) -> Result<(), ActionError> {
        ctx.dispatch(self.command.clone()).await.map(|_| ())
    }
}
