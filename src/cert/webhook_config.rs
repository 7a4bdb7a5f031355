//! Webhook registration descriptor for out-of-cluster runs.
//!
//! The API server cannot discover a webhook running on a developer machine, so the
//! server writes a kubeconfig-format file telling it where to call and which CA to
//! trust. The file is produced once at startup; failing to write it is fatal.

use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use thiserror::Error;

const CLUSTER_NAME: &str = "webhook";

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to serialize webhook config: {0}")]
    Serialize(#[from] serde_yaml::Error),
    #[error("failed to write webhook config to {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Produces the descriptor pointing the API server at this webhook.
#[derive(Debug, Clone)]
pub struct WebhookConfigPublisher {
    url: String,
    ca_bundle: Vec<u8>,
}

#[derive(Serialize)]
struct Kubeconfig<'a> {
    #[serde(rename = "apiVersion")]
    api_version: &'static str,
    kind: &'static str,
    clusters: Vec<NamedCluster<'a>>,
    users: Vec<NamedUser>,
    contexts: Vec<NamedContext>,
    #[serde(rename = "current-context")]
    current_context: &'static str,
}

#[derive(Serialize)]
struct NamedCluster<'a> {
    name: &'static str,
    cluster: Cluster<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct Cluster<'a> {
    server: &'a str,
    certificate_authority_data: String,
}

#[derive(Serialize)]
struct NamedUser {
    name: &'static str,
    user: serde_yaml::Mapping,
}

#[derive(Serialize)]
struct NamedContext {
    name: &'static str,
    context: Context,
}

#[derive(Serialize)]
struct Context {
    cluster: &'static str,
    user: &'static str,
}

impl WebhookConfigPublisher {
    /// `url` is the mutation endpoint, `ca_bundle` the PEM the API server should trust.
    pub fn new(url: impl Into<String>, ca_bundle: impl Into<Vec<u8>>) -> Self {
        Self {
            url: url.into(),
            ca_bundle: ca_bundle.into(),
        }
    }

    /// Descriptor for a webhook listening on `localhost:port`.
    pub fn for_local_port(port: u16, ca_bundle: impl Into<Vec<u8>>) -> Self {
        Self::new(format!("https://localhost:{port}/mutate"), ca_bundle)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Serialize the descriptor.
    pub fn generate_config(&self) -> Result<Vec<u8>, PublishError> {
        let config = Kubeconfig {
            api_version: "v1",
            kind: "Config",
            clusters: vec![NamedCluster {
                name: CLUSTER_NAME,
                cluster: Cluster {
                    server: &self.url,
                    certificate_authority_data: STANDARD.encode(&self.ca_bundle),
                },
            }],
            users: vec![NamedUser {
                name: CLUSTER_NAME,
                user: serde_yaml::Mapping::new(),
            }],
            contexts: vec![NamedContext {
                name: CLUSTER_NAME,
                context: Context {
                    cluster: CLUSTER_NAME,
                    user: CLUSTER_NAME,
                },
            }],
            current_context: CLUSTER_NAME,
        };
        Ok(serde_yaml::to_string(&config)?.into_bytes())
    }

    /// Generate the descriptor and write it to `path` with mode 0644.
    pub fn write_config(&self, path: &Path) -> Result<(), PublishError> {
        let bytes = self.generate_config()?;
        let write_error = |source| PublishError::Write {
            path: path.display().to_string(),
            source,
        };

        fs::write(path, bytes).map_err(write_error)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o644)).map_err(write_error)?;
        }
        Ok(())
    }
}
