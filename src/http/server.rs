//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router (`/healthz`, `/metrics`, `/mutate`)
//! - Wire up middleware (tracing, request metrics on business routes)
//! - Serve over TLS on a pre-bound listener
//! - Expose a [`ServerHandle`] the shutdown coordinator drives

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::State,
    http::{header, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::http::middleware::instrument_middleware;
use crate::http::mutate::{mutate_handler, Mutator};
use crate::lifecycle::shutdown::{CloseError, ServerControl, ShutdownError};
use crate::net::tls::ClosingAcceptor;

/// How long a forced close may take before it is reported as failed.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub mutator: Arc<dyn Mutator>,
    pub metrics: PrometheusHandle,
}

/// HTTPS server for the webhook.
pub struct HttpServer {
    router: Router,
    handle: ServerHandle,
}

impl HttpServer {
    /// Create a new server delegating admission reviews to `mutator`.
    pub fn new(mutator: Arc<dyn Mutator>, metrics: PrometheusHandle) -> Self {
        let state = AppState { mutator, metrics };
        Self {
            router: Self::build_router(state),
            handle: ServerHandle::new(),
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        let business = Router::new()
            .route("/mutate", post(mutate_handler))
            .route_layer(middleware::from_fn(instrument_middleware));

        Router::new()
            .route("/healthz", get(healthz_handler))
            .route("/metrics", get(metrics_handler))
            .merge(business)
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// Handle for shutting this server down.
    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// Serve until shut down. The handle is marked stopped when this returns.
    pub async fn run(
        self,
        listener: std::net::TcpListener,
        tls: RustlsConfig,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTPS server starting");

        let acceptor = ClosingAcceptor::new(RustlsAcceptor::new(tls), self.handle.closing.subscribe());
        let result = axum_server::from_tcp(listener)
            .acceptor(acceptor)
            .handle(self.handle.inner.clone())
            .serve(self.router.into_make_service())
            .await;

        self.handle.mark_stopped();
        tracing::info!("HTTPS server stopped");
        result
    }
}

async fn healthz_handler() -> &'static str {
    "ok"
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

/// Shared control over one running server.
///
/// Cloned into the accept loop and the shutdown coordinator; only the coordinator
/// calls the [`ServerControl`] operations.
#[derive(Clone)]
pub struct ServerHandle {
    inner: axum_server::Handle,
    stopped: Arc<watch::Sender<bool>>,
    closing: Arc<watch::Sender<bool>>,
    close_timeout: Duration,
}

impl ServerHandle {
    pub fn new() -> Self {
        let (stopped, _) = watch::channel(false);
        let (closing, _) = watch::channel(false);
        Self {
            inner: axum_server::Handle::new(),
            stopped: Arc::new(stopped),
            closing: Arc::new(closing),
            close_timeout: CLOSE_TIMEOUT,
        }
    }

    /// Whether the accept loop has returned.
    pub fn is_stopped(&self) -> bool {
        *self.stopped.borrow()
    }

    /// Open connections right now.
    pub fn connection_count(&self) -> usize {
        self.inner.connection_count()
    }

    /// Address the server is listening on, once it is.
    pub async fn listening(&self) -> Option<SocketAddr> {
        self.inner.listening().await
    }

    fn mark_stopped(&self) {
        self.stopped.send_replace(true);
    }

    async fn wait_stopped(&self) {
        let mut stopped = self.stopped.subscribe();
        let _ = stopped.wait_for(|stopped| *stopped).await;
    }
}

impl Default for ServerHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServerControl for ServerHandle {
    async fn shutdown(&self, deadline: Duration) -> Result<(), ShutdownError> {
        if self.is_stopped() {
            return Err(ShutdownError::AlreadyClosed);
        }

        // No internal timeout: forcing is the coordinator's decision.
        self.inner.graceful_shutdown(None);
        tokio::time::timeout(deadline, self.wait_stopped())
            .await
            .map_err(|_| ShutdownError::DeadlineExceeded {
                active_connections: self.connection_count(),
            })
    }

    async fn close(&self) -> Result<(), CloseError> {
        // Pending handshakes are not connections yet; axum-server cannot cut them.
        self.closing.send_replace(true);
        self.inner.shutdown();
        tokio::time::timeout(self.close_timeout, self.wait_stopped())
            .await
            .map_err(|_| CloseError::StillRunning {
                waited: self.close_timeout,
            })
    }
}
