//! Lifecycle diagnostics.
//!
//! Startup and the shutdown coordinator do not log directly; they hand
//! [`LifecycleEvent`]s to an injected [`Reporter`]. Production wires
//! [`TracingReporter`], tests wire [`RecordingReporter`] and assert on the sequence.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::DeploymentMode;
use crate::lifecycle::signals::ShutdownSignal;

/// Something worth telling an operator about during startup or shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    CertificateSourceSelected { mode: DeploymentMode },
    DescriptorWritten { path: PathBuf },
    Listening { address: SocketAddr },
    SignalReceived { signal: ShutdownSignal },
    Draining { deadline: Duration },
    GracefullyClosed,
    GracefulShutdownFailed { error: String },
    ForceClosed,
    ForceCloseFailed { error: String },
    CertificateSourceStopped,
}

/// Sink for lifecycle events.
pub trait Reporter: Send + Sync {
    fn report(&self, event: LifecycleEvent);
}

impl<R: Reporter + ?Sized> Reporter for Arc<R> {
    fn report(&self, event: LifecycleEvent) {
        (**self).report(event)
    }
}

/// Forwards lifecycle events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::CertificateSourceSelected { mode } => {
                tracing::info!(mode = %mode, "Certificate source selected")
            }
            LifecycleEvent::DescriptorWritten { path } => {
                tracing::info!(path = %path.display(), "Webhook config written")
            }
            LifecycleEvent::Listening { address } => {
                tracing::info!(address = %address, "Listening")
            }
            LifecycleEvent::SignalReceived { signal } => {
                tracing::info!(signal = %signal, "Received termination signal, beginning shutdown")
            }
            LifecycleEvent::Draining { deadline } => {
                tracing::info!(deadline = ?deadline, "Draining in-flight requests")
            }
            LifecycleEvent::GracefullyClosed => tracing::info!("Gracefully closed"),
            LifecycleEvent::GracefulShutdownFailed { error } => {
                tracing::error!(error = %error, "Error shutting server down")
            }
            LifecycleEvent::ForceClosed => tracing::warn!("Server force closed"),
            LifecycleEvent::ForceCloseFailed { error } => {
                tracing::error!(error = %error, "Error closing server")
            }
            LifecycleEvent::CertificateSourceStopped => {
                tracing::debug!("Certificate source stopped")
            }
        }
    }
}

/// Keeps every reported event in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingReporter {
    events: Arc<Mutex<Vec<LifecycleEvent>>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events reported so far, oldest first.
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl Reporter for RecordingReporter {
    fn report(&self, event: LifecycleEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
