//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validate config → Select certificate source → Bind → Serve
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Drain (deadline) → Force close if needed → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{
    CloseError, FatalCloseFailure, ServerControl, ShutdownCoordinator, ShutdownError,
    ShutdownOutcome, ShutdownState,
};
pub use signals::ShutdownSignal;
pub use startup::{RunError, StartupError, TlsServerLifecycle};
