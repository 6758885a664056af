//! # OS termination signals.
//!
//! [`wait_for_signal`] resolves with the first termination signal the process
//! receives. On unix that is SIGINT, SIGTERM or SIGQUIT; elsewhere Ctrl-C.

/// A termination signal that triggered shutdown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
    Quit,
    CtrlC,
}

impl Signal {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            Signal::Interrupt => "sigint",
            Signal::Terminate => "sigterm",
            Signal::Quit => "sigquit",
            Signal::CtrlC => "ctrl_c",
        }
    }
}

/// Waits for the first termination signal.
///
/// Fails only if the signal handlers cannot be installed.
#[cfg(unix)]
pub(crate) async fn wait_for_signal() -> std::io::Result<Signal> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;

    let received = tokio::select! {
        _ = interrupt.recv() => Signal::Interrupt,
        _ = terminate.recv() => Signal::Terminate,
        _ = quit.recv() => Signal::Quit,
    };
    Ok(received)
}

/// Waits for the first termination signal.
///
/// Fails only if the signal handler cannot be installed.
#[cfg(not(unix))]
pub(crate) async fn wait_for_signal() -> std::io::Result<Signal> {
    tokio::signal::ctrl_c().await?;
    Ok(Signal::CtrlC)
}
