//! Pod identity admission webhook.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────┐
//!                     │                 IDENTITY WEBHOOK                 │
//!                     │                                                  │
//!   API server        │  ┌──────────┐    ┌──────────┐    ┌───────────┐  │
//!   ──────────────────┼─▶│ net::tls │───▶│   http   │───▶│  mutate   │  │
//!                     │  │ resolver │    │  server  │    │           │  │
//!                     │  └────┬─────┘    └────▲─────┘    └───────────┘  │
//!                     │       │               │                         │
//!                     │  ┌────▼─────┐    ┌────┴──────────────────────┐  │
//!                     │  │   cert   │    │        lifecycle          │  │
//!                     │  │ cluster/ │    │ startup/signals/shutdown  │  │
//!                     │  │self-signed    └───────────────────────────┘  │
//!                     │  └──────────┘                                   │
//!                     └──────────────────────────────────────────────────┘
//! ```
//!
//! Exits 0 after a graceful or forced close, 1 on any startup error or when the
//! forced close itself fails.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use identity_webhook::config::WebhookConfig;
use identity_webhook::lifecycle::startup;
use identity_webhook::observability::{logging, TracingReporter};

#[tokio::main]
async fn main() -> ExitCode {
    let config = WebhookConfig::parse();
    logging::init(&config.log_level, config.log_format);

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = %config.deployment_mode(),
        port = config.port,
        "identity-webhook starting"
    );

    match startup::run(config, Arc::new(TracingReporter)).await {
        Ok(outcome) => {
            tracing::info!(?outcome, "Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "identity-webhook exiting");
            ExitCode::FAILURE
        }
    }
}
