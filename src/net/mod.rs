//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (bound before serving starts)
//!     → tls.rs (handshake, certificate from the active source)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - Binding happens during startup so a taken port is a startup failure
//! - The certificate is looked up per handshake, never cached here
//! - Handshakes still pending when the server closes are abandoned

pub mod listener;
pub mod tls;

pub use tls::{server_config, CertificateResolver, ClosingAcceptor, TlsError};
