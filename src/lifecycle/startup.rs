//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration
//! - Select and start exactly one certificate source
//! - Publish the webhook descriptor (out-of-cluster only)
//! - Bind the listener, arm the shutdown coordinator, then serve
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal and happens before serving
//! - The coordinator is armed before the accept loop starts
//! - The certificate source is stopped on every exit path once started

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum_server::tls_rustls::RustlsConfig;
use kube::config::{InferConfigError, KubeConfigOptions, Kubeconfig, KubeconfigError};
use metrics_exporter_prometheus::BuildError;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::cert::webhook_config::PublishError;
use crate::cert::{
    CertError, CertificateSource, ClusterSource, CsrTemplate, CurrentCertificateProvider,
    SelfSignedSource, WebhookConfigPublisher,
};
use crate::config::{validate_config, ConfigError, DeploymentMode, WebhookConfig};
use crate::http::mutate::NoopMutator;
use crate::http::server::{HttpServer, ServerHandle};
use crate::lifecycle::shutdown::{FatalCloseFailure, ShutdownCoordinator, ShutdownOutcome, ShutdownState};
use crate::lifecycle::signals::{self, ShutdownSignal};
use crate::net::listener::{self, ListenerError};
use crate::net::tls::{self, TlsError};
use crate::observability::{metrics, LifecycleEvent, Reporter};

/// Host name the self-signed certificate is issued for.
pub const SELF_SIGNED_HOST: &str = "localhost";

/// Errors that stop the process before it serves.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("error reading kubeconfig: {0}")]
    Kubeconfig(#[from] KubeconfigError),
    #[error("error inferring kubernetes config: {0}")]
    InferConfig(#[from] InferConfigError),
    #[error("invalid --kube-api {url}: {reason}")]
    KubeApi { url: String, reason: String },
    #[error("error creating kubernetes client: {0}")]
    KubeClient(#[from] kube::Error),
    #[error("failed to initialize certificate source: {0}")]
    CertificateSource(#[from] CertError),
    #[error("error creating webhook config: {0}")]
    Descriptor(#[from] PublishError),
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error(transparent)]
    Tls(#[from] TlsError),
    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] std::io::Error),
    #[error("failed to install metrics recorder: {0}")]
    Metrics(#[from] BuildError),
}

/// Any reason the process exits non-zero.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error("error listening: {0}")]
    Serve(#[source] std::io::Error),
    #[error(transparent)]
    FatalClose(#[from] FatalCloseFailure),
    #[error("shutdown coordinator failed: {0}")]
    Coordinator(#[from] tokio::task::JoinError),
}

/// Build the certificate source for `mode` and start it.
///
/// Out of cluster, the webhook descriptor is written before returning; the API
/// server could never reach us without it.
pub async fn select_certificate_source(
    mode: DeploymentMode,
    config: &WebhookConfig,
    reporter: &dyn Reporter,
) -> Result<Arc<dyn CertificateSource>, StartupError> {
    let source: Arc<dyn CertificateSource> = match mode {
        DeploymentMode::InCluster => {
            let client = kube_client(config).await?;
            let template = CsrTemplate {
                common_name: config.service_dns_name(),
                signer_name: config.csr_signer_name.clone(),
            };
            Arc::new(ClusterSource::new(
                client,
                config.namespace.clone(),
                config.tls_secret.clone(),
                template,
            ))
        }
        DeploymentMode::OutOfCluster => {
            let source = SelfSignedSource::new(SELF_SIGNED_HOST, &config.cert_dir, config.cert_duration)?;
            WebhookConfigPublisher::for_local_port(config.port, source.ca_bundle())
                .write_config(&config.webhook_config)?;
            reporter.report(LifecycleEvent::DescriptorWritten {
                path: config.webhook_config.clone(),
            });
            Arc::new(source)
        }
    };

    source.start();
    reporter.report(LifecycleEvent::CertificateSourceSelected { mode });
    Ok(source)
}

async fn kube_client(config: &WebhookConfig) -> Result<kube::Client, StartupError> {
    let mut kube_config = match &config.kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?
        }
        None => kube::Config::infer().await?,
    };
    if let Some(url) = &config.kube_api {
        kube_config.cluster_url = url.parse().map_err(|e| StartupError::KubeApi {
            url: url.clone(),
            reason: format!("{e}"),
        })?;
    }
    Ok(kube::Client::try_from(kube_config)?)
}

/// Owns one TLS server from its first accepted connection until it is down.
pub struct TlsServerLifecycle {
    source: Arc<dyn CertificateSource>,
    listener: std::net::TcpListener,
    tls: RustlsConfig,
    server: HttpServer,
    drain_deadline: Duration,
    reporter: Arc<dyn Reporter>,
}

impl TlsServerLifecycle {
    /// Wire `source` into the TLS handshake path of `server`.
    pub fn new(
        source: Arc<dyn CertificateSource>,
        listener: std::net::TcpListener,
        server: HttpServer,
        drain_deadline: Duration,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Self, StartupError> {
        let provider: Arc<dyn CurrentCertificateProvider> = Arc::new(Arc::clone(&source));
        let tls = tls::server_config(provider)?;
        Ok(Self {
            source,
            listener,
            tls,
            server,
            drain_deadline,
            reporter,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn handle(&self) -> ServerHandle {
        self.server.handle()
    }

    /// Serve until `signal` resolves and the server is down.
    ///
    /// Blocks the caller for the whole serving phase. The certificate source is
    /// stopped before returning.
    pub async fn start<F>(self, signal: F) -> Result<ShutdownOutcome, RunError>
    where
        F: Future<Output = ShutdownSignal> + Send + 'static,
    {
        let address = match self.listener.local_addr() {
            Ok(address) => address,
            Err(e) => {
                self.source.stop();
                self.reporter.report(LifecycleEvent::CertificateSourceStopped);
                return Err(RunError::Serve(e));
            }
        };

        let coordinator = ShutdownCoordinator::new(
            self.server.handle(),
            self.drain_deadline,
            Arc::clone(&self.reporter),
        );
        let state = coordinator.subscribe();
        let coordinator = tokio::spawn(coordinator.run(signal));

        self.reporter.report(LifecycleEvent::Listening { address });

        let outcome = supervise(self.server.run(self.listener, self.tls), coordinator, state).await;

        self.source.stop();
        self.reporter.report(LifecycleEvent::CertificateSourceStopped);
        outcome
    }
}

/// Drive the accept loop and the shutdown coordinator together.
///
/// A fatal close is returned as soon as the coordinator reports it, even while
/// the accept loop is still running; dropping it releases the listener.
async fn supervise<S>(
    serve: S,
    mut coordinator: JoinHandle<Result<ShutdownOutcome, FatalCloseFailure>>,
    state: watch::Receiver<ShutdownState>,
) -> Result<ShutdownOutcome, RunError>
where
    S: Future<Output = std::io::Result<()>>,
{
    tokio::pin!(serve);
    tokio::select! {
        served = &mut serve => match served {
            Err(e) => {
                coordinator.abort();
                Err(RunError::Serve(e))
            }
            // Stopped without a signal: nothing left for the coordinator to do.
            Ok(()) if *state.borrow() == ShutdownState::Listening => {
                coordinator.abort();
                Ok(ShutdownOutcome::GracefullyClosed)
            }
            Ok(()) => match coordinator.await {
                Ok(outcome) => outcome.map_err(RunError::from),
                Err(e) => Err(RunError::from(e)),
            },
        },
        finished = &mut coordinator => match finished {
            Ok(Ok(outcome)) => serve.await.map(|()| outcome).map_err(RunError::Serve),
            Ok(Err(fatal)) => Err(RunError::FatalClose(fatal)),
            Err(e) => Err(RunError::Coordinator(e)),
        },
    }
}

/// Run the webhook server described by `config` until it is shut down.
pub async fn run(config: WebhookConfig, reporter: Arc<dyn Reporter>) -> Result<ShutdownOutcome, RunError> {
    validate_config(&config).map_err(StartupError::from)?;
    let address = listener::parse_address(&config.bind_address()).map_err(StartupError::from)?;
    let metrics = metrics::install_recorder().map_err(StartupError::from)?;

    let source =
        select_certificate_source(config.deployment_mode(), &config, reporter.as_ref()).await?;

    let prepared = (|| -> Result<_, StartupError> {
        let listener = listener::bind(address)?;
        let server = HttpServer::new(Arc::new(NoopMutator), metrics);
        let lifecycle = TlsServerLifecycle::new(
            Arc::clone(&source),
            listener,
            server,
            config.shutdown_grace_period,
            Arc::clone(&reporter),
        )?;
        let signal = signals::termination().map_err(StartupError::Signals)?;
        Ok((lifecycle, signal))
    })();

    match prepared {
        Ok((lifecycle, signal)) => lifecycle.start(signal).await,
        Err(e) => {
            source.stop();
            reporter.report(LifecycleEvent::CertificateSourceStopped);
            Err(e.into())
        }
    }
}
