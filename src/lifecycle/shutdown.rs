//! Shutdown coordination for the webhook server.
//!
//! # States
//! ```text
//! Listening → SignalReceived → Draining ─┬→ GracefullyClosed
//!                                        └→ ForceClosing ─┬→ ForceClosed
//!                                                         └→ FatalCloseFailure
//! ```
//!
//! Forced close is only attempted after the full drain deadline has elapsed, and
//! only when graceful shutdown did not finish cleanly. A second signal during the
//! drain has no effect.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::lifecycle::signals::ShutdownSignal;
use crate::observability::{LifecycleEvent, Reporter};

/// Why a graceful shutdown did not finish cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShutdownError {
    /// The server had already stopped; nothing left to drain.
    #[error("server closed")]
    AlreadyClosed,
    #[error("graceful shutdown deadline exceeded with {active_connections} connection(s) open")]
    DeadlineExceeded { active_connections: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloseError {
    #[error("server still running {waited:?} after forced close")]
    StillRunning { waited: Duration },
}

/// The forced close failed; the process must not keep running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("error closing server: {0}")]
pub struct FatalCloseFailure(#[source] pub CloseError);

/// Shutdown operations the coordinator drives on a running server.
#[async_trait]
pub trait ServerControl: Send + Sync {
    /// Stop accepting, let in-flight requests finish, return once all connections
    /// are closed or `deadline` elapses.
    async fn shutdown(&self, deadline: Duration) -> Result<(), ShutdownError>;

    /// Terminate all listeners and connections immediately.
    async fn close(&self) -> Result<(), CloseError>;
}

#[async_trait]
impl<S: ServerControl + ?Sized> ServerControl for Arc<S> {
    async fn shutdown(&self, deadline: Duration) -> Result<(), ShutdownError> {
        (**self).shutdown(deadline).await
    }

    async fn close(&self) -> Result<(), CloseError> {
        (**self).close().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Listening,
    SignalReceived,
    Draining,
    GracefullyClosed,
    ForceClosing,
    ForceClosed,
    FatalCloseFailure,
}

/// How the serving phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    GracefullyClosed,
    ForceClosed,
}

/// Waits for a termination signal and brings one server down.
pub struct ShutdownCoordinator<S> {
    server: S,
    deadline: Duration,
    reporter: Arc<dyn Reporter>,
    state: watch::Sender<ShutdownState>,
}

impl<S: ServerControl> ShutdownCoordinator<S> {
    pub fn new(server: S, deadline: Duration, reporter: Arc<dyn Reporter>) -> Self {
        let (state, _) = watch::channel(ShutdownState::Listening);
        Self {
            server,
            deadline,
            reporter,
            state,
        }
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ShutdownState> {
        self.state.subscribe()
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Wait for `signal`, then drain and if needed force close the server.
    ///
    /// Consumes the coordinator: each server is taken down at most once.
    pub async fn run<F>(self, signal: F) -> Result<ShutdownOutcome, FatalCloseFailure>
    where
        F: Future<Output = ShutdownSignal>,
    {
        let signal = signal.await;
        self.transition(ShutdownState::SignalReceived);
        self.reporter.report(LifecycleEvent::SignalReceived { signal });

        self.transition(ShutdownState::Draining);
        self.reporter.report(LifecycleEvent::Draining {
            deadline: self.deadline,
        });
        let drain_started = Instant::now();

        let error = match self.server.shutdown(self.deadline).await {
            Ok(()) | Err(ShutdownError::AlreadyClosed) => {
                self.transition(ShutdownState::GracefullyClosed);
                self.reporter.report(LifecycleEvent::GracefullyClosed);
                return Ok(ShutdownOutcome::GracefullyClosed);
            }
            Err(e) => e,
        };

        // Never race the forced close against a drain that might still finish.
        tokio::time::sleep_until(drain_started + self.deadline).await;
        self.reporter.report(LifecycleEvent::GracefulShutdownFailed {
            error: error.to_string(),
        });

        self.transition(ShutdownState::ForceClosing);
        match self.server.close().await {
            Ok(()) => {
                self.transition(ShutdownState::ForceClosed);
                self.reporter.report(LifecycleEvent::ForceClosed);
                Ok(ShutdownOutcome::ForceClosed)
            }
            Err(e) => {
                self.transition(ShutdownState::FatalCloseFailure);
                self.reporter.report(LifecycleEvent::ForceCloseFailed {
                    error: e.to_string(),
                });
                Err(FatalCloseFailure(e))
            }
        }
    }

    fn transition(&self, next: ShutdownState) {
        self.state.send_replace(next);
    }
}
