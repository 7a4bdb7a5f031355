//! Self-signed serving certificate for out-of-cluster runs.

use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rcgen::{
    CertificateParams, DnType, ExtendedKeyUsagePurpose, KeyPair, KeyUsagePurpose, SanType,
};
use rustls::sign::CertifiedKey;
use time::OffsetDateTime;
use tracing::{info, warn};

use super::{pem, CertError, CertificateSlot, CertificateSource, CurrentCertificateProvider};

pub const CERT_FILE: &str = "tls.crt";
pub const KEY_FILE: &str = "tls.key";

/// Certificate source that signs its own certificate and keeps it under a directory.
///
/// A valid pair already on disk is reused so the API server's CA bundle stays
/// correct across restarts.
#[derive(Debug)]
pub struct SelfSignedSource {
    host: String,
    dir: PathBuf,
    cert_pem: Vec<u8>,
    slot: CertificateSlot,
}

impl SelfSignedSource {
    /// Load or generate the certificate for `host` under `dir`.
    pub fn new(
        host: impl Into<String>,
        dir: impl Into<PathBuf>,
        lifetime: Duration,
    ) -> Result<Self, CertError> {
        let host = host.into();
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| io_error(&dir, source))?;

        let cert_path = dir.join(CERT_FILE);
        let key_path = dir.join(KEY_FILE);

        let (cert_pem, key) = match load_existing(&cert_path, &key_path) {
            Some(pair) => {
                info!(cert = %cert_path.display(), "Using existing self-signed certificate");
                pair
            }
            None => {
                let (cert_pem, key_pem) = generate(&host, lifetime)?;
                write_pair(&cert_path, &key_path, &cert_pem, &key_pem)?;
                info!(
                    cert = %cert_path.display(),
                    host = %host,
                    lifetime = ?lifetime,
                    "Generated self-signed certificate"
                );
                let key = pem::certified_key(cert_pem.as_bytes(), key_pem.as_bytes())?;
                (cert_pem.into_bytes(), key)
            }
        };

        Ok(Self {
            host,
            dir,
            cert_pem,
            slot: CertificateSlot::with(key),
        })
    }

    /// PEM of the serving certificate, which is its own CA.
    pub fn ca_bundle(&self) -> &[u8] {
        &self.cert_pem
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl CurrentCertificateProvider for SelfSignedSource {
    fn current(&self) -> Option<Arc<CertifiedKey>> {
        self.slot.current()
    }
}

impl CertificateSource for SelfSignedSource {
    // Nothing to renew: the certificate lives for the configured duration.
    fn start(&self) {}

    fn stop(&self) {}
}

fn load_existing(cert_path: &Path, key_path: &Path) -> Option<(Vec<u8>, Arc<CertifiedKey>)> {
    if !cert_path.exists() || !key_path.exists() {
        return None;
    }

    let loaded = (|| -> Result<_, CertError> {
        let cert_pem = fs::read(cert_path).map_err(|source| io_error(cert_path, source))?;
        let key_pem = fs::read(key_path).map_err(|source| io_error(key_path, source))?;
        let validity = pem::validity(&cert_pem)?;
        let key = pem::certified_key(&cert_pem, &key_pem)?;
        Ok((cert_pem, validity, key))
    })();

    match loaded {
        Ok((cert_pem, validity, key)) => {
            if validity.is_expired_at(OffsetDateTime::now_utc()) {
                info!(not_after = %validity.not_after, "Existing certificate expired, will regenerate");
                None
            } else {
                Some((cert_pem, key))
            }
        }
        Err(e) => {
            warn!(error = %e, "Failed to load existing certificate, will regenerate");
            None
        }
    }
}

fn generate(host: &str, lifetime: Duration) -> Result<(String, String), CertError> {
    let key_pair = KeyPair::generate()?;

    let mut params = CertificateParams::new(vec![host.to_string()])?;
    params.distinguished_name.push(DnType::CommonName, host);

    let now = OffsetDateTime::now_utc();
    params.not_before = now - time::Duration::minutes(5);
    params.not_after = time::Duration::try_from(lifetime)
        .ok()
        .and_then(|lifetime| now.checked_add(lifetime))
        .ok_or(CertError::Lifetime(lifetime))?;

    params.subject_alt_names.extend([
        SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        SanType::IpAddress(IpAddr::V6(Ipv6Addr::LOCALHOST)),
    ]);
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

    let cert = params.self_signed(&key_pair)?;
    Ok((cert.pem(), key_pair.serialize_pem()))
}

fn write_pair(
    cert_path: &Path,
    key_path: &Path,
    cert_pem: &str,
    key_pem: &str,
) -> Result<(), CertError> {
    fs::write(cert_path, cert_pem).map_err(|source| io_error(cert_path, source))?;
    fs::write(key_path, key_pem).map_err(|source| io_error(key_path, source))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(key_path, fs::Permissions::from_mode(0o600))
            .map_err(|source| io_error(key_path, source))?;
    }

    Ok(())
}

fn io_error(path: &Path, source: std::io::Error) -> CertError {
    CertError::Io {
        path: path.display().to_string(),
        source,
    }
}
