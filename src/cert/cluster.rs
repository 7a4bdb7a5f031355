//! Serving certificate issued through the cluster's certificate signing API.
//!
//! # Renewal Loop
//! ```text
//! Secret holds a pair outside its rotation window?
//!     yes → publish it
//!     no  → generate key → submit CertificateSigningRequest
//!           → poll until issued (Denied/Failed abandons the request)
//!           → publish → persist to Secret
//! sleep until 70-90% of the validity window → repeat
//! ```
//!
//! Until the first certificate is published the slot stays empty and every
//! handshake is refused. Failures are retried with backoff and never clear a
//! certificate that is already being served.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use k8s_openapi::api::certificates::v1::{CertificateSigningRequest, CertificateSigningRequestSpec};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, PostParams};
use kube::Client;
use rand::Rng;
use rcgen::{CertificateParams, DnType, KeyPair};
use rustls::sign::CertifiedKey;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::pem::{self, Validity};
use super::{CertError, CertificateSlot, CertificateSource, CurrentCertificateProvider};
use crate::resilience::Backoff;

const SECRET_CERT_KEY: &str = "tls.crt";
const SECRET_KEY_KEY: &str = "tls.key";
const SECRET_TYPE_TLS: &str = "kubernetes.io/tls";

const KEY_USAGES: [&str; 3] = ["digital signature", "key encipherment", "server auth"];

/// Rotation happens at a random point in this fraction range of the validity window.
const ROTATION_WINDOW: (f64, f64) = (0.7, 0.9);

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// What to put in each certificate signing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrTemplate {
    /// Subject common name, the service's cluster-local DNS name.
    pub common_name: String,
    /// Signer that should issue the certificate.
    pub signer_name: String,
}

/// Certificate source backed by the certificates.k8s.io API.
pub struct ClusterSource {
    client: Client,
    namespace: String,
    secret_name: String,
    template: CsrTemplate,
    slot: Arc<CertificateSlot>,
    poll_interval: Duration,
    backoff: Backoff,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// State owned by one running renewal task.
struct Renewer {
    client: Client,
    namespace: String,
    secret_name: String,
    template: CsrTemplate,
    slot: Arc<CertificateSlot>,
    poll_interval: Duration,
    backoff: Backoff,
}

impl ClusterSource {
    pub fn new(
        client: Client,
        namespace: impl Into<String>,
        secret_name: impl Into<String>,
        template: CsrTemplate,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            secret_name: secret_name.into(),
            template,
            slot: Arc::new(CertificateSlot::empty()),
            poll_interval: DEFAULT_POLL_INTERVAL,
            backoff: Backoff::default(),
            task: Mutex::new(None),
        }
    }

    /// Override how often a pending request is polled.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Override the retry policy for failed renewals.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Whether the renewal task is running.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .map(|task| task.as_ref().is_some_and(|handle| !handle.is_finished()))
            .unwrap_or(false)
    }

    fn renewer(&self) -> Renewer {
        Renewer {
            client: self.client.clone(),
            namespace: self.namespace.clone(),
            secret_name: self.secret_name.clone(),
            template: self.template.clone(),
            slot: Arc::clone(&self.slot),
            poll_interval: self.poll_interval,
            backoff: self.backoff,
        }
    }
}

impl CurrentCertificateProvider for ClusterSource {
    fn current(&self) -> Option<Arc<CertifiedKey>> {
        self.slot.current()
    }
}

impl CertificateSource for ClusterSource {
    fn start(&self) {
        let Ok(mut task) = self.task.lock() else {
            return;
        };
        if task.is_some() {
            return;
        }

        info!(
            namespace = %self.namespace,
            secret = %self.secret_name,
            common_name = %self.template.common_name,
            poll_interval = ?self.poll_interval,
            "Starting certificate renewal"
        );
        *task = Some(tokio::spawn(self.renewer().run()));
    }

    fn stop(&self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
                debug!("Certificate renewal stopped");
            }
        }
    }
}

impl Drop for ClusterSource {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Renewer {
    async fn run(self) {
        let mut failures = 0;
        loop {
            let wait = match self.renew().await {
                Ok(validity) => {
                    failures = 0;
                    let wait = rotation_delay(&validity, OffsetDateTime::now_utc());
                    info!(
                        not_after = %validity.not_after,
                        rotate_in = ?wait,
                        "Serving certificate ready"
                    );
                    wait
                }
                Err(e) => {
                    failures += 1;
                    let wait = self.backoff.delay(failures);
                    warn!(error = %e, attempt = failures, retry_in = ?wait, "Certificate renewal failed");
                    wait
                }
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Publish a certificate that is good until its next rotation point.
    async fn renew(&self) -> Result<Validity, CertError> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);

        if let Some(secret) = secrets.get_opt(&self.secret_name).await? {
            match usable_pair(&secret, OffsetDateTime::now_utc()) {
                Ok(Some((validity, key))) => {
                    self.slot.store(key);
                    return Ok(validity);
                }
                Ok(None) => debug!(secret = %self.secret_name, "Stored certificate due for rotation"),
                Err(e) => warn!(secret = %self.secret_name, error = %e, "Ignoring unusable stored certificate"),
            }
        }

        let (cert_pem, key_pem) = self.request_certificate().await?;
        let validity = pem::validity(&cert_pem)?;
        let key = pem::certified_key(&cert_pem, key_pem.as_bytes())?;
        self.slot.store(key);

        if let Err(e) = self.persist(&secrets, cert_pem, key_pem).await {
            warn!(secret = %self.secret_name, error = %e, "Failed to persist serving certificate");
        }
        Ok(validity)
    }

    async fn request_certificate(&self) -> Result<(Vec<u8>, String), CertError> {
        let key = KeyPair::generate()?;
        let mut params = CertificateParams::new(Vec::<String>::new())?;
        params
            .distinguished_name
            .push(DnType::CommonName, self.template.common_name.as_str());
        let request_pem = params.serialize_request(&key)?.pem()?;

        let api: Api<CertificateSigningRequest> = Api::all(self.client.clone());
        let request = signing_request(&self.template, &self.secret_name, request_pem.into_bytes());
        let created = api.create(&PostParams::default(), &request).await?;
        let name = request_name(created)?;
        info!(name = %name, signer = %self.template.signer_name, "Submitted certificate signing request");

        loop {
            let csr = api.get(&name).await?;
            if let Some(cert) = issued_certificate(&name, &csr)? {
                info!(name = %name, "Certificate signing request issued");
                return Ok((cert, key.serialize_pem()));
            }
            debug!(name = %name, "Waiting for certificate signing request approval");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn persist(
        &self,
        secrets: &Api<Secret>,
        cert_pem: Vec<u8>,
        key_pem: String,
    ) -> Result<(), CertError> {
        let mut secret = tls_secret(&self.namespace, &self.secret_name, cert_pem, key_pem.into_bytes());
        match secrets.get_opt(&self.secret_name).await? {
            Some(existing) => {
                secret.metadata.resource_version = existing.metadata.resource_version;
                secrets
                    .replace(&self.secret_name, &PostParams::default(), &secret)
                    .await?;
            }
            None => {
                secrets.create(&PostParams::default(), &secret).await?;
            }
        }
        debug!(secret = %self.secret_name, "Persisted serving certificate");
        Ok(())
    }
}

fn signing_request(template: &CsrTemplate, prefix: &str, request_pem: Vec<u8>) -> CertificateSigningRequest {
    CertificateSigningRequest {
        metadata: ObjectMeta {
            generate_name: Some(format!("{prefix}-")),
            ..Default::default()
        },
        spec: CertificateSigningRequestSpec {
            request: ByteString(request_pem),
            signer_name: template.signer_name.clone(),
            usages: Some(KEY_USAGES.iter().map(|u| u.to_string()).collect()),
            ..Default::default()
        },
        status: None,
    }
}

/// Server-assigned name of a request submitted with `generateName`.
fn request_name(created: CertificateSigningRequest) -> Result<String, CertError> {
    created
        .metadata
        .name
        .filter(|name| !name.is_empty())
        .ok_or(CertError::UnnamedRequest)
}

/// The issued certificate, `None` while pending, or an error once denied or failed.
fn issued_certificate(name: &str, csr: &CertificateSigningRequest) -> Result<Option<Vec<u8>>, CertError> {
    let Some(status) = csr.status.as_ref() else {
        return Ok(None);
    };

    let rejection = status
        .conditions
        .iter()
        .flatten()
        .find(|c| c.type_ == "Denied" || c.type_ == "Failed");
    if let Some(condition) = rejection {
        let reason = match condition.message.as_deref() {
            Some(message) => format!("{}: {}", condition.type_.to_lowercase(), message),
            None => condition.type_.to_lowercase(),
        };
        return Err(CertError::Rejected {
            name: name.to_string(),
            reason,
        });
    }

    Ok(status
        .certificate
        .as_ref()
        .filter(|cert| !cert.0.is_empty())
        .map(|cert| cert.0.clone()))
}

fn tls_secret(namespace: &str, name: &str, cert_pem: Vec<u8>, key_pem: Vec<u8>) -> Secret {
    let data = BTreeMap::from([
        (SECRET_CERT_KEY.to_string(), ByteString(cert_pem)),
        (SECRET_KEY_KEY.to_string(), ByteString(key_pem)),
    ]);
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        type_: Some(SECRET_TYPE_TLS.to_string()),
        data: Some(data),
        ..Default::default()
    }
}

/// A stored pair that is valid and not yet inside its rotation window.
fn usable_pair(
    secret: &Secret,
    now: OffsetDateTime,
) -> Result<Option<(Validity, Arc<CertifiedKey>)>, CertError> {
    let field = |key: &str| {
        secret
            .data
            .as_ref()
            .and_then(|data| data.get(key))
            .map(|value| value.0.as_slice())
    };
    let (Some(cert_pem), Some(key_pem)) = (field(SECRET_CERT_KEY), field(SECRET_KEY_KEY)) else {
        return Ok(None);
    };

    let validity = pem::validity(cert_pem)?;
    let earliest_rotation = validity.not_before + validity.lifetime() * ROTATION_WINDOW.0;
    if now >= earliest_rotation {
        return Ok(None);
    }
    Ok(Some((validity, pem::certified_key(cert_pem, key_pem)?)))
}

/// Time until a jittered point between 70% and 90% of the validity window.
fn rotation_delay(validity: &Validity, now: OffsetDateTime) -> Duration {
    let fraction = rand::thread_rng().gen_range(ROTATION_WINDOW.0..ROTATION_WINDOW.1);
    let deadline = validity.not_before + validity.lifetime() * fraction;
    Duration::try_from(deadline - now).unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use k8s_openapi::api::certificates::v1::{
        CertificateSigningRequestCondition, CertificateSigningRequestStatus,
    };

    use self::fake_api::{ApiState, Decision};

    fn template() -> CsrTemplate {
        CsrTemplate {
            common_name: "iam-for-pods.eks.svc".into(),
            signer_name: "beta.eks.amazonaws.com/app-serving".into(),
        }
    }

    fn condition(type_: &str, message: Option<&str>) -> CertificateSigningRequestCondition {
        CertificateSigningRequestCondition {
            type_: type_.into(),
            status: "True".into(),
            message: message.map(Into::into),
            ..Default::default()
        }
    }

    #[test]
    fn signing_request_carries_template() {
        let csr = signing_request(&template(), "iam-for-pods", b"pem".to_vec());
        assert_eq!(csr.metadata.generate_name.as_deref(), Some("iam-for-pods-"));
        assert_eq!(csr.spec.signer_name, "beta.eks.amazonaws.com/app-serving");
        assert_eq!(csr.spec.request.0, b"pem");
        assert_eq!(
            csr.spec.usages.unwrap(),
            vec!["digital signature", "key encipherment", "server auth"]
        );
    }

    #[test]
    fn pending_request_has_no_certificate() {
        let mut csr = signing_request(&template(), "x", Vec::new());
        assert!(issued_certificate("x-1", &csr).unwrap().is_none());

        csr.status = Some(CertificateSigningRequestStatus {
            conditions: Some(vec![condition("Approved", None)]),
            certificate: Some(ByteString(Vec::new())),
            ..Default::default()
        });
        assert!(issued_certificate("x-1", &csr).unwrap().is_none());
    }

    #[test]
    fn issued_request_yields_certificate() {
        let mut csr = signing_request(&template(), "x", Vec::new());
        csr.status = Some(CertificateSigningRequestStatus {
            conditions: Some(vec![condition("Approved", None)]),
            certificate: Some(ByteString(b"cert".to_vec())),
            ..Default::default()
        });
        assert_eq!(issued_certificate("x-1", &csr).unwrap(), Some(b"cert".to_vec()));
    }

    #[test]
    fn denied_request_is_rejected() {
        let mut csr = signing_request(&template(), "x", Vec::new());
        csr.status = Some(CertificateSigningRequestStatus {
            conditions: Some(vec![condition("Denied", Some("not allowed"))]),
            certificate: None,
            ..Default::default()
        });
        let err = issued_certificate("x-1", &csr).unwrap_err();
        assert_eq!(
            err.to_string(),
            "certificate signing request x-1 was denied: not allowed"
        );
    }

    #[test]
    fn fresh_secret_is_reused() {
        let (cert, key) = pem::testing::pem_pair("iam-for-pods.eks.svc", time::Duration::days(10));
        let secret = tls_secret("eks", "iam-for-pods", cert.into_bytes(), key.into_bytes());
        assert_eq!(secret.type_.as_deref(), Some("kubernetes.io/tls"));

        let pair = usable_pair(&secret, OffsetDateTime::now_utc()).unwrap();
        assert!(pair.is_some());
    }

    #[test]
    fn secret_inside_rotation_window_is_not_reused() {
        let (cert, key) = pem::testing::pem_pair("iam-for-pods.eks.svc", time::Duration::days(10));
        let secret = tls_secret("eks", "iam-for-pods", cert.into_bytes(), key.into_bytes());

        let later = OffsetDateTime::now_utc() + time::Duration::days(8);
        assert!(usable_pair(&secret, later).unwrap().is_none());
    }

    #[test]
    fn secret_without_data_is_not_reused() {
        let secret = Secret::default();
        assert!(usable_pair(&secret, OffsetDateTime::now_utc()).unwrap().is_none());
    }

    #[test]
    fn rotation_delay_lands_in_window() {
        let now = OffsetDateTime::now_utc();
        let validity = Validity {
            not_before: now,
            not_after: now + time::Duration::hours(100),
        };
        for _ in 0..32 {
            let delay = rotation_delay(&validity, now);
            assert!(delay >= Duration::from_secs(70 * 3600));
            assert!(delay <= Duration::from_secs(90 * 3600));
        }
    }

    #[test]
    fn overdue_rotation_is_immediate() {
        let now = OffsetDateTime::now_utc();
        let validity = Validity {
            not_before: now - time::Duration::hours(10),
            not_after: now - time::Duration::hours(1),
        };
        assert_eq!(rotation_delay(&validity, now), Duration::ZERO);
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_aborts() {
        let _ = rustls::crypto::ring::default_provider().install_default();
        let config = kube::Config::new("http://127.0.0.1:9".parse().unwrap());
        let client = Client::try_from(config).unwrap();

        let source = ClusterSource::new(client, "eks", "iam-for-pods", template())
            .with_poll_interval(Duration::from_millis(10));
        assert!(!source.is_running());

        source.start();
        source.start();
        assert!(source.is_running());

        // The API server is unreachable, so nothing is ever published.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(source.current().is_none());

        source.stop();
        source.stop();
        assert!(!source.is_running());
    }

    #[test]
    fn created_request_must_be_named() {
        let mut created = signing_request(&template(), "iam-for-pods", Vec::new());
        assert!(matches!(request_name(created.clone()), Err(CertError::UnnamedRequest)));

        created.metadata.name = Some(String::new());
        assert!(matches!(request_name(created.clone()), Err(CertError::UnnamedRequest)));

        created.metadata.name = Some("iam-for-pods-7".into());
        assert_eq!(request_name(created).unwrap(), "iam-for-pods-7");
    }

    #[tokio::test]
    async fn settings_apply_before_start() {
        let config = kube::Config::new("http://127.0.0.1:9".parse().unwrap());
        let _ = rustls::crypto::ring::default_provider().install_default();
        let client = Client::try_from(config).unwrap();
        let backoff = Backoff {
            base: Duration::from_millis(3),
            max: Duration::from_millis(9),
        };

        let source = ClusterSource::new(client, "eks", "iam-for-pods", template())
            .with_poll_interval(Duration::from_millis(10))
            .with_backoff(backoff);
        let renewer = source.renewer();
        assert_eq!(renewer.poll_interval, Duration::from_millis(10));
        assert_eq!(renewer.backoff.base, Duration::from_millis(3));
        assert!(Arc::ptr_eq(&renewer.slot, &source.slot));
    }

    /// In-memory stand-in for the secrets and certificate signing request endpoints.
    ///
    /// Issued certificates are not signed over the submitted request; the
    /// rustls key pairing is not checked, so any certificate for the name will do.
    mod fake_api {
        use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
        use std::sync::{Arc, Mutex};

        use axum::extract::{Path, Request, State};
        use axum::http::StatusCode;
        use axum::middleware::{self, Next};
        use axum::response::{IntoResponse, Response};
        use axum::routing::{get, post};
        use axum::{Json, Router};
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine;
        use serde_json::{json, Value};

        #[derive(Debug, Clone, Default)]
        pub enum Decision {
            #[default]
            Pending,
            Issue(String),
            Deny,
        }

        #[derive(Default)]
        pub struct ApiState {
            pub secret: Mutex<Option<Value>>,
            pub secret_writes: Mutex<Vec<&'static str>>,
            pub requests: Mutex<Vec<Value>>,
            pub decision: Mutex<Decision>,
            pub failing: AtomicBool,
            pub failures: AtomicUsize,
        }

        impl ApiState {
            pub fn decide(&self, decision: Decision) {
                *self.decision.lock().unwrap() = decision;
            }

            pub fn request_count(&self) -> usize {
                self.requests.lock().unwrap().len()
            }

            pub fn secret_writes(&self) -> Vec<&'static str> {
                self.secret_writes.lock().unwrap().clone()
            }
        }

        /// Serve `state` on an ephemeral port and return a client for it.
        pub async fn serve(state: Arc<ApiState>) -> kube::Client {
            let _ = rustls::crypto::ring::default_provider().install_default();
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();

            let router = Router::new()
                .route("/api/v1/namespaces/{namespace}/secrets", post(create_secret))
                .route(
                    "/api/v1/namespaces/{namespace}/secrets/{name}",
                    get(get_secret).put(replace_secret),
                )
                .route(
                    "/apis/certificates.k8s.io/v1/certificatesigningrequests",
                    post(create_request),
                )
                .route(
                    "/apis/certificates.k8s.io/v1/certificatesigningrequests/{name}",
                    get(get_request),
                )
                .layer(middleware::from_fn_with_state(state.clone(), fail_when_asked))
                .with_state(state);
            tokio::spawn(async move { axum::serve(listener, router).await });

            let config = kube::Config::new(format!("http://{addr}").parse().unwrap());
            kube::Client::try_from(config).unwrap()
        }

        fn status(code: StatusCode, reason: &str) -> Response {
            let body = json!({
                "kind": "Status",
                "apiVersion": "v1",
                "status": "Failure",
                "message": reason,
                "reason": reason,
                "code": code.as_u16(),
            });
            (code, Json(body)).into_response()
        }

        async fn fail_when_asked(
            State(state): State<Arc<ApiState>>,
            request: Request,
            next: Next,
        ) -> Response {
            if state.failing.load(Ordering::SeqCst) {
                state.failures.fetch_add(1, Ordering::SeqCst);
                return status(StatusCode::INTERNAL_SERVER_ERROR, "InternalError");
            }
            next.run(request).await
        }

        async fn get_secret(State(state): State<Arc<ApiState>>) -> Response {
            let secret = state.secret.lock().unwrap().clone();
            match secret {
                Some(secret) => Json(secret).into_response(),
                None => status(StatusCode::NOT_FOUND, "NotFound"),
            }
        }

        async fn create_secret(State(state): State<Arc<ApiState>>, Json(secret): Json<Value>) -> Response {
            state.secret_writes.lock().unwrap().push("create");
            *state.secret.lock().unwrap() = Some(secret.clone());
            (StatusCode::CREATED, Json(secret)).into_response()
        }

        async fn replace_secret(State(state): State<Arc<ApiState>>, Json(secret): Json<Value>) -> Response {
            state.secret_writes.lock().unwrap().push("replace");
            *state.secret.lock().unwrap() = Some(secret.clone());
            Json(secret).into_response()
        }

        async fn create_request(State(state): State<Arc<ApiState>>, Json(mut request): Json<Value>) -> Response {
            let mut requests = state.requests.lock().unwrap();
            let prefix = request["metadata"]["generateName"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            request["metadata"]["name"] = json!(format!("{prefix}{}", requests.len()));
            requests.push(request.clone());
            (StatusCode::CREATED, Json(request)).into_response()
        }

        async fn get_request(State(state): State<Arc<ApiState>>, Path(name): Path<String>) -> Response {
            let found = state
                .requests
                .lock()
                .unwrap()
                .iter()
                .find(|request| request["metadata"]["name"] == name.as_str())
                .cloned();
            let Some(mut request) = found else {
                return status(StatusCode::NOT_FOUND, "NotFound");
            };

            let decision = state.decision.lock().unwrap().clone();
            match decision {
                Decision::Pending => {}
                Decision::Issue(cert) => {
                    request["status"] = json!({
                        "conditions": [{"type": "Approved", "status": "True"}],
                        "certificate": STANDARD.encode(cert),
                    });
                }
                Decision::Deny => {
                    request["status"] = json!({
                        "conditions": [{"type": "Denied", "status": "True", "message": "not allowed"}],
                    });
                }
            }
            Json(request).into_response()
        }
    }

    fn fast_source(client: Client) -> ClusterSource {
        ClusterSource::new(client, "eks", "iam-for-pods", template())
            .with_poll_interval(Duration::from_millis(10))
            .with_backoff(Backoff {
                base: Duration::from_millis(10),
                max: Duration::from_millis(50),
            })
    }

    fn issued_certificate_pem(lifetime: time::Duration) -> String {
        pem::testing::pem_pair("iam-for-pods.eks.svc", lifetime).0
    }

    async fn eventually(what: &str, mut done: impl FnMut() -> bool) {
        let waited = tokio::time::timeout(Duration::from_secs(5), async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "timed out waiting for {what}");
    }

    #[tokio::test]
    async fn pending_request_is_published_once_issued() {
        let api = Arc::new(ApiState::default());
        let source = fast_source(fake_api::serve(api.clone()).await);

        source.start();
        eventually("request submitted", || api.request_count() == 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(source.current().is_none(), "nothing is served while pending");

        let cert = issued_certificate_pem(time::Duration::days(10));
        api.decide(Decision::Issue(cert.clone()));
        eventually("certificate published", || source.current().is_some()).await;

        let issued = rustls_pemfile::certs(&mut cert.as_bytes()).next().unwrap().unwrap();
        assert_eq!(source.current().unwrap().cert[0], issued);

        eventually("secret persisted", || !api.secret_writes().is_empty()).await;
        assert_eq!(api.secret_writes(), vec!["create"]);
        let secret = api.secret.lock().unwrap().clone().unwrap();
        assert_eq!(secret["type"], "kubernetes.io/tls");
        assert_eq!(secret["data"]["tls.crt"], STANDARD.encode(&cert).as_str());

        let request = api.requests.lock().unwrap()[0].clone();
        assert_eq!(request["metadata"]["generateName"], "iam-for-pods-");
        assert_eq!(request["spec"]["signerName"], "beta.eks.amazonaws.com/app-serving");
        assert_eq!(api.request_count(), 1);

        source.stop();
    }

    #[tokio::test]
    async fn denied_request_is_retried() {
        let api = Arc::new(ApiState::default());
        api.decide(Decision::Deny);
        let source = fast_source(fake_api::serve(api.clone()).await);

        source.start();
        eventually("denied request resubmitted", || api.request_count() >= 2).await;
        assert!(source.current().is_none());
        assert!(api.secret_writes().is_empty());

        api.decide(Decision::Issue(issued_certificate_pem(time::Duration::days(10))));
        eventually("certificate published", || source.current().is_some()).await;

        source.stop();
    }

    #[tokio::test]
    async fn fresh_secret_skips_signing_request() {
        let api = Arc::new(ApiState::default());
        let (cert, key) = pem::testing::pem_pair("iam-for-pods.eks.svc", time::Duration::days(10));
        let secret = tls_secret("eks", "iam-for-pods", cert.into_bytes(), key.into_bytes());
        *api.secret.lock().unwrap() = Some(serde_json::to_value(&secret).unwrap());
        let source = fast_source(fake_api::serve(api.clone()).await);

        source.start();
        eventually("stored certificate published", || source.current().is_some()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(api.request_count(), 0);
        assert!(api.secret_writes().is_empty());

        source.stop();
    }

    #[tokio::test]
    async fn stale_secret_is_replaced() {
        let api = Arc::new(ApiState::default());
        let (cert, key) = pem::testing::pem_pair("iam-for-pods.eks.svc", time::Duration::seconds(10));
        let secret = tls_secret("eks", "iam-for-pods", cert.into_bytes(), key.into_bytes());
        *api.secret.lock().unwrap() = Some(serde_json::to_value(&secret).unwrap());
        api.decide(Decision::Issue(issued_certificate_pem(time::Duration::days(10))));
        let source = fast_source(fake_api::serve(api.clone()).await);

        source.start();
        eventually("secret replaced", || !api.secret_writes().is_empty()).await;
        assert_eq!(api.secret_writes(), vec!["replace"]);
        assert_eq!(api.request_count(), 1);
        assert!(source.current().is_some());

        source.stop();
    }

    #[tokio::test]
    async fn failures_keep_published_certificate() {
        let api = Arc::new(ApiState::default());
        // Short-lived, so every renewal lands back in the rotation window.
        api.decide(Decision::Issue(issued_certificate_pem(time::Duration::seconds(5))));
        let source = fast_source(fake_api::serve(api.clone()).await);

        source.start();
        eventually("certificate published", || source.current().is_some()).await;

        api.failing.store(true, Ordering::SeqCst);
        eventually("renewal retried", || api.failures.load(Ordering::SeqCst) >= 2).await;
        assert!(source.current().is_some());

        source.stop();
    }
}
