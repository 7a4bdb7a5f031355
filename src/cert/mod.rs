//! Serving certificate sources.
//!
//! # Data Flow
//! ```text
//! DeploymentMode::InCluster
//!     → cluster.rs (CSR submit → approval poll → Secret persist → rotate)
//! DeploymentMode::OutOfCluster
//!     → self_signed.rs (load or generate under --cert-dir)
//!     → webhook_config.rs (descriptor pointing the API server at us)
//!
//! Both publish into a CertificateSlot; TLS handshakes read it through
//! CurrentCertificateProvider::current().
//! ```
//!
//! # Design Decisions
//! - The slot is an `ArcSwapOption`: readers see the old or the new key, never a mix
//! - Absent is a normal state (CSR not yet approved), not an error inside the source
//! - Sources own their background work; the server only ever calls start/stop/current

pub mod cluster;
pub mod pem;
pub mod self_signed;
pub mod webhook_config;

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use rustls::sign::CertifiedKey;
use thiserror::Error;

pub use cluster::{ClusterSource, CsrTemplate};
pub use self_signed::SelfSignedSource;
pub use webhook_config::WebhookConfigPublisher;

/// Errors raised while producing or loading a serving certificate.
#[derive(Debug, Error)]
pub enum CertError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("certificate generation failed: {0}")]
    Generate(#[from] rcgen::Error),
    #[error("invalid PEM: {0}")]
    Pem(String),
    #[error("unsupported private key: {0}")]
    Key(#[from] rustls::Error),
    #[error("invalid certificate: {0}")]
    X509(String),
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),
    #[error("certificate signing request {name} was {reason}")]
    Rejected { name: String, reason: String },
    #[error("certificate signing request was created without a name")]
    UnnamedRequest,
    #[error("certificate lifetime {0:?} is out of range")]
    Lifetime(Duration),
}

/// Read access to whichever certificate is current.
pub trait CurrentCertificateProvider: Send + Sync {
    /// The certificate to present right now, or `None` while none is available.
    fn current(&self) -> Option<Arc<CertifiedKey>>;
}

/// A certificate provider that may run background renewal.
pub trait CertificateSource: CurrentCertificateProvider {
    /// Begin background renewal. Calling it again has no effect.
    fn start(&self);

    /// Stop background renewal. Best-effort; safe to call more than once.
    fn stop(&self);
}

impl<P: CurrentCertificateProvider + ?Sized> CurrentCertificateProvider for Arc<P> {
    fn current(&self) -> Option<Arc<CertifiedKey>> {
        (**self).current()
    }
}

impl<S: CertificateSource + ?Sized> CertificateSource for Arc<S> {
    fn start(&self) {
        (**self).start()
    }

    fn stop(&self) {
        (**self).stop()
    }
}

/// Shared cell holding the current certificate.
#[derive(Debug, Default)]
pub struct CertificateSlot {
    inner: ArcSwapOption<CertifiedKey>,
}

impl CertificateSlot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with(key: Arc<CertifiedKey>) -> Self {
        Self {
            inner: ArcSwapOption::from(Some(key)),
        }
    }

    /// Atomically replace the current certificate.
    pub fn store(&self, key: Arc<CertifiedKey>) {
        self.inner.store(Some(key));
    }

    pub fn clear(&self) {
        self.inner.store(None);
    }
}

impl CurrentCertificateProvider for CertificateSlot {
    fn current(&self) -> Option<Arc<CertifiedKey>> {
        self.inner.load_full()
    }
}
