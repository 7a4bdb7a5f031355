//! PEM decoding into rustls keys, and certificate validity inspection.

use std::io::BufReader;
use std::sync::Arc;

use rustls::pki_types::CertificateDer;
use rustls::sign::CertifiedKey;
use time::OffsetDateTime;

use super::CertError;

/// Validity window of a certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validity {
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
}

impl Validity {
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now >= self.not_after
    }

    pub fn lifetime(&self) -> time::Duration {
        self.not_after - self.not_before
    }
}

/// Build a rustls certified key from a PEM certificate chain and PEM private key.
pub fn certified_key(cert_pem: &[u8], key_pem: &[u8]) -> Result<Arc<CertifiedKey>, CertError> {
    let chain = rustls_pemfile::certs(&mut BufReader::new(cert_pem))
        .collect::<Result<Vec<CertificateDer<'static>>, _>>()
        .map_err(|e| CertError::Pem(format!("certificate: {e}")))?;
    if chain.is_empty() {
        return Err(CertError::Pem("no certificate found".into()));
    }

    let key = rustls_pemfile::private_key(&mut BufReader::new(key_pem))
        .map_err(|e| CertError::Pem(format!("private key: {e}")))?
        .ok_or_else(|| CertError::Pem("no private key found".into()))?;

    let signing_key = rustls::crypto::ring::sign::any_supported_type(&key)?;
    Ok(Arc::new(CertifiedKey::new(chain, signing_key)))
}

/// Validity window of the first certificate in a PEM bundle.
pub fn validity(cert_pem: &[u8]) -> Result<Validity, CertError> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(cert_pem)
        .map_err(|e| CertError::Pem(format!("certificate: {e}")))?;
    let cert = pem
        .parse_x509()
        .map_err(|e| CertError::X509(e.to_string()))?;

    let validity = cert.validity();
    Ok(Validity {
        not_before: validity.not_before.to_datetime(),
        not_after: validity.not_after.to_datetime(),
    })
}
