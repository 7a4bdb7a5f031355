//! HTTP middleware.

pub mod instrument;

pub use instrument::instrument_middleware;
