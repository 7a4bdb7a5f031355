//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TLS connection
//!     → server.rs (Axum setup, tracing)
//!     → middleware/ (request metrics)
//!     → mutate.rs (AdmissionReview in, AdmissionReview out)
//! ```

pub mod middleware;
pub mod mutate;
pub mod server;

pub use mutate::{AdmissionRequest, AdmissionReview, Mutator, NoopMutator};
pub use server::{HttpServer, ServerHandle};
