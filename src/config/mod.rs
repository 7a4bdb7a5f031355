//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! argv
//!     → schema.rs (clap parse, duration parsing)
//!     → validation.rs (semantic checks)
//!     → WebhookConfig (validated, immutable)
//!     → DeploymentMode selects the certificate source
//! ```
//!
//! # Design Decisions
//! - Config is immutable for the lifetime of the process
//! - All flags have defaults so a bare in-cluster deployment needs none
//! - Validation separates syntactic (clap) from semantic checks

pub mod schema;
pub mod validation;

pub use schema::{DeploymentMode, LogFormat, WebhookConfig};
pub use validation::{validate_config, ConfigError, ValidationError};
