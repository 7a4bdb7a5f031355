//! OS signal handling.
//!
//! Handlers are installed when [`termination`] is called, not when the returned
//! future is first polled, so a signal arriving while the server is still
//! starting is not lost.

use std::fmt;
use std::future::Future;

/// A termination signal. Interrupt and terminate are treated identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "SIGINT"),
            ShutdownSignal::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Install SIGINT/SIGTERM handlers and return a future resolving on the first one.
#[cfg(unix)]
pub fn termination() -> std::io::Result<impl Future<Output = ShutdownSignal> + Send + 'static> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => ShutdownSignal::Interrupt,
            _ = terminate.recv() => ShutdownSignal::Terminate,
        }
    })
}

/// Install the Ctrl+C handler and return a future resolving when it fires.
#[cfg(not(unix))]
pub fn termination() -> std::io::Result<impl Future<Output = ShutdownSignal> + Send + 'static> {
    let mut ctrl_c = tokio::signal::windows::ctrl_c()?;
    Ok(async move {
        ctrl_c.recv().await;
        ShutdownSignal::Interrupt
    })
}
