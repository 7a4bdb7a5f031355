//! Retry timing for background work.
//!
//! The certificate renewal loop backs off between failed API calls and never
//! gives up while the process is running.

pub mod backoff;

pub use backoff::Backoff;
