//! Shared utilities for the lifecycle integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use identity_webhook::cert::pem;
use identity_webhook::cert::{CertificateSlot, CertificateSource, CurrentCertificateProvider};
use identity_webhook::http::{AdmissionRequest, HttpServer, Mutator, NoopMutator};
use identity_webhook::lifecycle::{RunError, ShutdownOutcome, ShutdownSignal, TlsServerLifecycle};
use identity_webhook::net::listener;
use identity_webhook::observability::metrics::detached_handle;
use identity_webhook::observability::RecordingReporter;
use rustls::sign::CertifiedKey;
use serde_json::Value;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;

pub const REVIEW: &str = r#"{"apiVersion":"admission.k8s.io/v1","kind":"AdmissionReview","request":{"uid":"it-1"}}"#;

pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Fresh self-signed key for `localhost`.
pub fn certified_key() -> Arc<CertifiedKey> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    pem::certified_key(cert.cert.pem().as_bytes(), cert.key_pair.serialize_pem().as_bytes()).unwrap()
}

/// Source backed by a slot the test fills in by hand.
#[derive(Default)]
pub struct SlotSource {
    pub slot: CertificateSlot,
    stopped: AtomicBool,
}

impl SlotSource {
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl CurrentCertificateProvider for SlotSource {
    fn current(&self) -> Option<Arc<CertifiedKey>> {
        self.slot.current()
    }
}

impl CertificateSource for SlotSource {
    fn start(&self) {}

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Takes `delay` to answer and announces each request it receives.
pub struct SlowMutator {
    pub delay: Duration,
    pub started: Arc<Notify>,
}

#[async_trait]
impl Mutator for SlowMutator {
    async fn patch(&self, _request: &AdmissionRequest) -> Option<Vec<Value>> {
        self.started.notify_one();
        tokio::time::sleep(self.delay).await;
        None
    }
}

/// Never answers.
pub struct HangingMutator {
    pub started: Arc<Notify>,
}

#[async_trait]
impl Mutator for HangingMutator {
    async fn patch(&self, _request: &AdmissionRequest) -> Option<Vec<Value>> {
        self.started.notify_one();
        std::future::pending().await
    }
}

/// A server running on an ephemeral port, stopped by firing `signal`.
pub struct RunningServer {
    pub addr: SocketAddr,
    pub reporter: RecordingReporter,
    signal: Option<oneshot::Sender<ShutdownSignal>>,
    task: JoinHandle<Result<ShutdownOutcome, RunError>>,
}

impl RunningServer {
    pub fn url(&self, path: &str) -> String {
        format!("https://127.0.0.1:{}{}", self.addr.port(), path)
    }

    pub fn send_signal(&mut self, signal: ShutdownSignal) {
        if let Some(tx) = self.signal.take() {
            let _ = tx.send(signal);
        }
    }

    pub async fn outcome(self) -> Result<ShutdownOutcome, RunError> {
        self.task.await.unwrap()
    }
}

pub fn start_server(
    source: Arc<dyn CertificateSource>,
    mutator: Arc<dyn Mutator>,
    drain_deadline: Duration,
) -> RunningServer {
    install_crypto_provider();
    let listener = listener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
    start_on(listener, source, mutator, drain_deadline)
}

pub fn start_on(
    listener: std::net::TcpListener,
    source: Arc<dyn CertificateSource>,
    mutator: Arc<dyn Mutator>,
    drain_deadline: Duration,
) -> RunningServer {
    install_crypto_provider();
    let reporter = RecordingReporter::new();
    let server = HttpServer::new(mutator, detached_handle().unwrap());
    let lifecycle = TlsServerLifecycle::new(
        source,
        listener,
        server,
        drain_deadline,
        Arc::new(reporter.clone()),
    )
    .unwrap();
    let addr = lifecycle.local_addr().unwrap();

    let (tx, rx) = oneshot::channel();
    let signal = async move { rx.await.unwrap_or(ShutdownSignal::Terminate) };
    let task = tokio::spawn(lifecycle.start(signal));

    RunningServer {
        addr,
        reporter,
        signal: Some(tx),
        task,
    }
}

pub fn noop_mutator() -> Arc<dyn Mutator> {
    Arc::new(NoopMutator)
}

/// Client that trusts any certificate and never reuses connections.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Client that only trusts `ca_pem` and reaches `localhost` at `addr`.
pub fn verifying_client(ca_pem: &[u8], addr: SocketAddr) -> reqwest::Client {
    reqwest::Client::builder()
        .add_root_certificate(reqwest::Certificate::from_pem(ca_pem).unwrap())
        .resolve("localhost", addr)
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
