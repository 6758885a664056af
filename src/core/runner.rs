//! # Run a single job on a device connection.
//!
//! Executes one [`Action`](crate::Action) with panic isolation and maps its
//! result to a [`JobOutcome`], publishing lifecycle events to [`Bus`].
//!
//! ## Event flow
//!
//! ```text
//! Success:
//!   action.run() → Ok(())                 → JobSucceeded
//!
//! Interrupted (superseded / executor stopping):
//!   action.run() → Ok(()) | Err(Canceled) → JobCancelled
//!
//! Failure:
//!   action.run() → Err(Fail/Connection)   → JobFailed
//!   action.run() → panic                  → JobFailed ("panicked: ...")
//! ```
//!
//! ## Rules
//! - Always publishes **exactly one** terminal event per job.
//! - `Canceled` is never an error: it resolves as `JobOutcome::Cancelled`.
//! - A real error wins over interruption: a failing job is reported as failed
//!   even if it was being cancelled.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;

use crate::actions::{ActionRef, JobContext};
use crate::core::job::{Job, JobOutcome};
use crate::device::{ConnectionRef, DeviceId};
use crate::error::ActionError;
use crate::events::{Bus, Event, EventKind};
use crate::subscribers::panic_message;

/// What an execution loop needs to run jobs for one device.
#[derive(Clone)]
pub(crate) struct LoopEnv {
    pub(crate) device: DeviceId,
    pub(crate) connection: ConnectionRef,
    pub(crate) bus: Bus,
    pub(crate) cancel_grace: Duration,
}

impl LoopEnv {
    /// Builds the context handed to `job`'s action.
    pub(crate) fn context(&self, job: &Job) -> JobContext {
        JobContext::new(
            self.device.clone(),
            job.id,
            job.token.clone(),
            self.connection.clone(),
        )
    }
}

/// Runs `action` to completion, turning a panic into `ActionError::Fail`.
pub(crate) async fn run_once(action: ActionRef, ctx: JobContext) -> Result<(), ActionError> {
    match AssertUnwindSafe(action.run(ctx)).catch_unwind().await {
        Ok(res) => res,
        Err(payload) => Err(ActionError::fail(format!(
            "panicked: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

/// Maps an action result to the job outcome.
///
/// `interrupted` is set when the loop cancelled the job (superseded or stopping).
pub(crate) fn outcome_of(res: &Result<(), ActionError>, interrupted: bool) -> JobOutcome {
    match res {
        Ok(()) if !interrupted => JobOutcome::Success,
        Ok(()) | Err(ActionError::Canceled) => JobOutcome::Cancelled,
        Err(e) => JobOutcome::Error(e.to_string()),
    }
}

/// Resolves `job` with `outcome` and publishes the matching terminal event.
///
/// The event is published whether or not anyone holds the job's handle.
/// `reason` explains a cancellation ("superseded", "stopped", "forced").
pub(crate) fn finish(env: &LoopEnv, job: Job, outcome: JobOutcome, reason: Option<&'static str>) {
    let ev = Event::new(terminal_kind(&outcome))
        .with_device(&env.device)
        .with_job(job.name(), job.id);
    let ev = match (&outcome, reason) {
        (JobOutcome::Error(msg), _) => ev.with_reason(msg.as_str()),
        (_, Some(reason)) => ev.with_reason(reason),
        _ => ev,
    };

    tracing::debug!(
        device_id = %env.device,
        job_id = job.id,
        outcome = outcome.as_label(),
        "job finished"
    );
    job.completion.resolve(outcome);
    env.bus.publish(ev);
}

/// Publishes `JobStarted`.
pub(crate) fn publish_started(env: &LoopEnv, job: &Job) {
    env.bus.publish(
        Event::new(EventKind::JobStarted)
            .with_device(&env.device)
            .with_job(job.name(), job.id),
    );
}

fn terminal_kind(outcome: &JobOutcome) -> EventKind {
    match outcome {
        JobOutcome::Success => EventKind::JobSucceeded,
        JobOutcome::Error(_) => EventKind::JobFailed,
        JobOutcome::Cancelled => EventKind::JobCancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionFn;
    use crate::testing::MockConnection;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> JobContext {
        JobContext::new(
            DeviceId::from("d1"),
            1,
            CancellationToken::new(),
            MockConnection::new(),
        )
    }

    #[tokio::test]
    async fn test_panic_becomes_error() {
        let action: ActionRef = ActionFn::arc("explode", |_ctx: JobContext| async {
            if true {
                panic!("motor stalled");
            }
            Ok::<(), ActionError>(())
        });

        let res = run_once(action, ctx()).await;
        match outcome_of(&res, false) {
            JobOutcome::Error(msg) => assert!(msg.contains("motor stalled"), "{msg}"),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_finish_without_handle_still_reports() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let env = LoopEnv {
            device: DeviceId::from("d1"),
            connection: MockConnection::new(),
            bus,
            cancel_grace: Duration::from_millis(10),
        };
        let action: ActionRef =
            ActionFn::arc("noop", |_ctx: JobContext| async { Ok::<(), ActionError>(()) });
        let (job, handle) = Job::new(1, action);
        drop(handle);

        finish(&env, job, JobOutcome::Error("boom".into()), None);

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::JobFailed);
        assert_eq!(ev.job_id, Some(1));
        assert_eq!(ev.reason.as_deref(), Some("boom"));
    }

    #[test]
    fn test_outcome_mapping() {
        assert_eq!(outcome_of(&Ok(()), false), JobOutcome::Success);
        assert_eq!(outcome_of(&Ok(()), true), JobOutcome::Cancelled);
        assert_eq!(
            outcome_of(&Err(ActionError::Canceled), false),
            JobOutcome::Cancelled
        );
        assert!(matches!(
            outcome_of(&Err(ActionError::fail("x")), true),
            JobOutcome::Error(_)
        ));
    }
}
