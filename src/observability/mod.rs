//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, histograms)
//!     → report.rs (lifecycle events from startup and shutdown)
//!
//! Consumers:
//!     → stdout (text or JSON)
//!     → /metrics (Prometheus scrape)
//!     → tests (RecordingReporter)
//! ```

pub mod logging;
pub mod metrics;
pub mod report;

pub use report::{LifecycleEvent, RecordingReporter, Reporter, TracingReporter};
