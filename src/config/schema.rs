//! Command-line configuration schema.
//!
//! All settings arrive as flags; there is no configuration file. Durations accept
//! human-readable values such as `10s` or `8760h`.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};

/// Which certificate source the process runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentMode {
    /// Running inside the cluster, certificate issued through the CSR API.
    InCluster,
    /// Running outside the cluster with a self-signed certificate.
    OutOfCluster,
}

impl std::fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentMode::InCluster => write!(f, "in-cluster"),
            DeploymentMode::OutOfCluster => write!(f, "out-of-cluster"),
        }
    }
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Root configuration for the webhook server.
#[derive(Debug, Clone, Parser)]
#[command(name = "identity-webhook")]
#[command(about = "Mutating admission webhook served over TLS", long_about = None)]
pub struct WebhookConfig {
    /// Port to listen on.
    #[arg(long, default_value_t = 443)]
    pub port: u16,

    /// Use in-cluster authentication and the certificate request API.
    #[arg(
        long,
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub in_cluster: bool,

    /// (in-cluster) The secret name for storing the TLS serving cert.
    #[arg(long, default_value = "iam-for-pods")]
    pub tls_secret: String,

    /// (in-cluster) The service name fronting this webhook.
    #[arg(long, default_value = "iam-for-pods")]
    pub service_name: String,

    /// (in-cluster) The namespace this webhook and the TLS secret reside in.
    #[arg(long, default_value = "eks")]
    pub namespace: String,

    /// (in-cluster) Signer requested for the serving certificate.
    #[arg(long, default_value = "beta.eks.amazonaws.com/app-serving")]
    pub csr_signer_name: String,

    /// Absolute path to the API server kubeconfig file.
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// The url to the API server.
    #[arg(long)]
    pub kube_api: Option<String>,

    /// (out-of-cluster) Directory to save certificates.
    #[arg(long, default_value = "/etc/webhook/certs")]
    pub cert_dir: PathBuf,

    /// (out-of-cluster) Lifetime for the self-signed certificate.
    #[arg(long, default_value = "8760h", value_parser = humantime::parse_duration)]
    pub cert_duration: Duration,

    /// (out-of-cluster) Where to write the webhook config file for the API server.
    #[arg(long, default_value = "/etc/webhook/config.yaml")]
    pub webhook_config: PathBuf,

    /// How long in-flight requests may drain before connections are force closed.
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    pub shutdown_grace_period: Duration,

    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Log line format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl WebhookConfig {
    /// Deployment mode selected by `--in-cluster`.
    pub fn deployment_mode(&self) -> DeploymentMode {
        if self.in_cluster {
            DeploymentMode::InCluster
        } else {
            DeploymentMode::OutOfCluster
        }
    }

    /// Address the TLS listener binds to.
    pub fn bind_address(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }

    /// Cluster-local DNS name of the fronting service.
    pub fn service_dns_name(&self) -> String {
        format!("{}.{}.svc", self.service_name, self.namespace)
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self::parse_from(["identity-webhook"])
    }
}
