//! TCP listener binding.
//!
//! # Responsibilities
//! - Parse the configured bind address
//! - Bind before the server starts so failures are reported as startup errors
//! - Hand a non-blocking std listener to the TLS server

use std::net::{AddrParseError, SocketAddr, TcpListener};

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// The bind address did not parse.
    InvalidAddress(String, AddrParseError),
    /// Failed to bind to address.
    Bind(SocketAddr, std::io::Error),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::InvalidAddress(addr, e) => write!(f, "Invalid address {}: {}", addr, e),
            ListenerError::Bind(addr, e) => write!(f, "Failed to bind {}: {}", addr, e),
        }
    }
}

impl std::error::Error for ListenerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ListenerError::InvalidAddress(_, e) => Some(e),
            ListenerError::Bind(_, e) => Some(e),
        }
    }
}

/// Parse a bind address without binding it.
pub fn parse_address(address: &str) -> Result<SocketAddr, ListenerError> {
    address
        .parse()
        .map_err(|e| ListenerError::InvalidAddress(address.to_string(), e))
}

/// Bind a non-blocking listener ready to be driven by Tokio.
pub fn bind(addr: SocketAddr) -> Result<TcpListener, ListenerError> {
    let listener = TcpListener::bind(addr).map_err(|e| ListenerError::Bind(addr, e))?;
    listener
        .set_nonblocking(true)
        .map_err(|e| ListenerError::Bind(addr, e))?;

    tracing::debug!(address = ?listener.local_addr().ok(), "Listener bound");
    Ok(listener)
}
