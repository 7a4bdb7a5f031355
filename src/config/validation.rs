//! Configuration validation.
//!
//! Clap handles syntax; this module checks the combinations that only make sense
//! together. Every violation is reported, not just the first.

use thiserror::Error;

use crate::config::schema::{DeploymentMode, WebhookConfig};

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("port must be non-zero")]
    ZeroPort,
    #[error("--{0} must not be empty in in-cluster mode")]
    MissingClusterField(&'static str),
    #[error("--{0} must not be empty in out-of-cluster mode")]
    MissingLocalPath(&'static str),
    #[error("--{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

/// Validation failure carrying every violation found.
#[derive(Debug, Error)]
#[error("invalid configuration: {}", join(.0))]
pub struct ConfigError(pub Vec<ValidationError>);

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Check a parsed configuration for semantic errors.
pub fn validate_config(config: &WebhookConfig) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.port == 0 {
        errors.push(ValidationError::ZeroPort);
    }
    if config.shutdown_grace_period.is_zero() {
        errors.push(ValidationError::ZeroDuration("shutdown-grace-period"));
    }

    match config.deployment_mode() {
        DeploymentMode::InCluster => {
            let fields = [
                ("tls-secret", &config.tls_secret),
                ("service-name", &config.service_name),
                ("namespace", &config.namespace),
                ("csr-signer-name", &config.csr_signer_name),
            ];
            for (flag, value) in fields {
                if value.trim().is_empty() {
                    errors.push(ValidationError::MissingClusterField(flag));
                }
            }
        }
        DeploymentMode::OutOfCluster => {
            if config.cert_dir.as_os_str().is_empty() {
                errors.push(ValidationError::MissingLocalPath("cert-dir"));
            }
            if config.webhook_config.as_os_str().is_empty() {
                errors.push(ValidationError::MissingLocalPath("webhook-config"));
            }
            if config.cert_duration.is_zero() {
                errors.push(ValidationError::ZeroDuration("cert-duration"));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError(errors))
    }
}
