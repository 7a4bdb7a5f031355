//! TLS configuration and per-handshake certificate selection.

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use axum_server::accept::Accept;
use axum_server::tls_rustls::RustlsConfig;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use thiserror::Error;
use tokio::sync::watch;

use crate::cert::CurrentCertificateProvider;
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("no serving certificate available for the webhook, is the CSR approved?")]
    NoCertificate,
    #[error("failed to build TLS configuration: {0}")]
    Config(#[from] rustls::Error),
}

/// Asks the certificate source for the current certificate on every handshake.
///
/// An absent certificate fails that handshake only; the listener keeps serving.
pub struct CertificateResolver {
    provider: Arc<dyn CurrentCertificateProvider>,
}

impl CertificateResolver {
    pub fn new(provider: Arc<dyn CurrentCertificateProvider>) -> Self {
        Self { provider }
    }

    /// Certificate for the handshake in progress.
    pub fn certificate(&self) -> Result<Arc<CertifiedKey>, TlsError> {
        self.provider.current().ok_or(TlsError::NoCertificate)
    }
}

impl fmt::Debug for CertificateResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateResolver").finish_non_exhaustive()
    }
}

impl ResolvesServerCert for CertificateResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        match self.certificate() {
            Ok(key) => Some(key),
            Err(e) => {
                metrics::record_certificate_unavailable();
                tracing::warn!(server_name = ?client_hello.server_name(), error = %e, "TLS handshake refused");
                None
            }
        }
    }
}

/// Server TLS settings whose certificate comes from `provider`.
pub fn server_config(provider: Arc<dyn CurrentCertificateProvider>) -> Result<RustlsConfig, TlsError> {
    let mut config = ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_no_client_auth()
    .with_cert_resolver(Arc::new(CertificateResolver::new(provider)));
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(RustlsConfig::from_config(Arc::new(config)))
}

/// Abandons handshakes still in progress once the server starts closing.
///
/// The accept loop does not watch for shutdown while a handshake is pending, so
/// a client that connects and never speaks would otherwise hold a forced close
/// open until the handshake timeout.
#[derive(Clone)]
pub struct ClosingAcceptor<A> {
    inner: A,
    closing: watch::Receiver<bool>,
}

impl<A> ClosingAcceptor<A> {
    pub fn new(inner: A, closing: watch::Receiver<bool>) -> Self {
        Self { inner, closing }
    }
}

impl<A, I, S> Accept<I, S> for ClosingAcceptor<A>
where
    A: Accept<I, S>,
    A::Future: Send + 'static,
    A::Stream: Send + 'static,
    A::Service: Send + 'static,
{
    type Stream = A::Stream;
    type Service = A::Service;
    type Future = Pin<Box<dyn Future<Output = io::Result<(A::Stream, A::Service)>> + Send>>;

    fn accept(&self, stream: I, service: S) -> Self::Future {
        let handshake = self.inner.accept(stream, service);
        let mut closing = self.closing.clone();
        Box::pin(async move {
            tokio::select! {
                accepted = handshake => accepted,
                () = closed(&mut closing) => Err(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    "server closing",
                )),
            }
        })
    }
}

async fn closed(closing: &mut watch::Receiver<bool>) {
    let signalled = closing.wait_for(|closing| *closing).await.is_ok();
    if !signalled {
        // Sender gone without closing: nothing will ever abandon this handshake.
        std::future::pending::<()>().await;
    }
}
