//! TLS configuration helpers for the platform client.
//!
//! This module builds reqwest clients with the configured trust anchors and
//! an optional client identity, and checks certificate/key pairs before they
//! are presented for mutual TLS.

use der::Decode;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use x509_cert::Certificate;

use crate::config::{ClientIdentity, PlatformConfig, TrustAnchors};
use crate::error::{EnrollError, Result};

/// Build a reqwest Client with the appropriate TLS configuration.
///
/// When `identity` is set, the client presents it for mutual TLS.
pub fn build_http_client(
    config: &PlatformConfig,
    identity: Option<&ClientIdentity>,
) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(config.timeout)
        .user_agent(crate::USER_AGENT)
        .use_rustls_tls();

    match &config.trust_anchors {
        TrustAnchors::WebPki => {
            builder = builder.tls_built_in_root_certs(true);
        }
        TrustAnchors::Explicit(ca_certs) => {
            builder = builder.tls_built_in_root_certs(false);
            for ca_pem in ca_certs {
                let cert = reqwest::Certificate::from_pem(ca_pem)
                    .map_err(|e| EnrollError::tls(format!("Failed to parse CA certificate: {}", e)))?;
                builder = builder.add_root_certificate(cert);
            }
        }
        TrustAnchors::InsecureAcceptAny => {
            tracing::warn!("Server certificate verification is disabled");
            builder = builder
                .tls_built_in_root_certs(false)
                .danger_accept_invalid_certs(true);
        }
    }

    if let Some(identity) = identity {
        builder = builder.identity(build_reqwest_identity(identity)?);
    }

    builder = builder.min_tls_version(reqwest::tls::Version::TLS_1_2);

    builder
        .build()
        .map_err(|e| EnrollError::tls(format!("Failed to build HTTP client: {}", e)))
}

/// Build a reqwest Identity from PEM-encoded certificate and key.
fn build_reqwest_identity(identity: &ClientIdentity) -> Result<reqwest::Identity> {
    let mut pem_data = identity.cert_pem.clone();
    pem_data.extend_from_slice(b"\n");
    pem_data.extend_from_slice(&identity.key_pem);

    reqwest::Identity::from_pem(&pem_data)
        .map_err(|e| EnrollError::tls(format!("Failed to create client identity: {}", e)))
}

/// Check that a certificate and private key form a usable TLS key pair.
///
/// Both PEM blocks must parse and the key must belong to the first
/// certificate. Returns the parsed leaf certificate.
pub fn check_key_pair(identity: &ClientIdentity) -> Result<Certificate> {
    let certs = parse_pem_certificates(&identity.cert_pem)?;
    let leaf = Certificate::from_der(certs[0].as_ref())
        .map_err(|e| EnrollError::certificate_parsing(format!("Invalid certificate: {}", e)))?;

    let key = crate::csr::DeviceKey::from_pem(&identity.key_pem)?;

    let cert_public_key = leaf
        .tbs_certificate
        .subject_public_key_info
        .subject_public_key
        .raw_bytes();

    if cert_public_key != key.public_key_raw() {
        return Err(EnrollError::crypto(
            "private key does not match certificate public key",
        ));
    }

    Ok(leaf)
}

/// Parse PEM-encoded certificates.
pub fn parse_pem_certificates(pem_data: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = std::io::BufReader::new(pem_data);
    let certs: Vec<_> = rustls_pemfile::certs(&mut reader)
        .filter_map(|result| result.ok())
        .collect();

    if certs.is_empty() {
        return Err(EnrollError::invalid_pem("No certificates found in PEM data"));
    }

    Ok(certs)
}

/// Parse a PEM-encoded private key.
pub fn parse_pem_private_key(pem_data: &[u8]) -> Result<PrivateKeyDer<'static>> {
    let mut reader = std::io::BufReader::new(pem_data);

    loop {
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(rustls_pemfile::Item::Pkcs8Key(key))) => {
                return Ok(PrivateKeyDer::Pkcs8(key));
            }
            Ok(Some(rustls_pemfile::Item::Pkcs1Key(key))) => {
                return Ok(PrivateKeyDer::Pkcs1(key));
            }
            Ok(Some(rustls_pemfile::Item::Sec1Key(key))) => {
                return Ok(PrivateKeyDer::Sec1(key));
            }
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(e) => {
                return Err(EnrollError::invalid_pem(format!("Failed to parse PEM: {}", e)));
            }
        }
    }

    Err(EnrollError::invalid_pem("No private key found in PEM data"))
}
