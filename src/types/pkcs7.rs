//! PKCS#7/CMS parsing utilities.
//!
//! This module parses the bodies returned by the enrollment endpoints: a
//! base64-encoded "certs-only" SignedData structure, or a plain PEM
//! certificate.

use base64::prelude::*;
use cms::content_info::ContentInfo;
use cms::signed_data::SignedData;
use der::{Decode, DecodePem, Encode};
use x509_cert::Certificate;

use crate::error::{EnrollError, Result};

/// Parse the body of an enrollment or re-enrollment response.
///
/// Returns the issued certificate, which is the first certificate in the
/// response. Any further certificates are the CA chain and are ignored.
pub fn parse_enrollment_response(body: &[u8]) -> Result<Certificate> {
    let trimmed = body.trim_ascii_start();
    if trimmed.starts_with(b"-----BEGIN CERTIFICATE-----") {
        return Certificate::from_pem(trimmed)
            .map_err(|e| EnrollError::certificate_parsing(format!("Invalid PEM certificate: {}", e)));
    }

    let certs = parse_certs_only(body)?;
    let count = certs.len();
    let first = certs
        .into_iter()
        .next()
        .ok_or_else(|| EnrollError::certificate_parsing("No certificate in response"))?;

    if count > 1 {
        tracing::debug!("Response contains {} certificates, using first", count);
    }
    Ok(first)
}

/// Parse a PKCS#7 certs-only response.
///
/// The response body should be base64-encoded DER.
pub fn parse_certs_only(body: &[u8]) -> Result<Vec<Certificate>> {
    let der_bytes = decode_base64(body)?;

    let content_info = ContentInfo::from_der(&der_bytes).map_err(|e| {
        EnrollError::certificate_parsing(format!("Failed to parse ContentInfo: {}", e))
    })?;

    let signed_data = extract_signed_data(&content_info)?;

    extract_certificates(&signed_data)
}

/// Decode base64 data, handling various line ending formats.
fn decode_base64(data: &[u8]) -> Result<Vec<u8>> {
    let cleaned: Vec<u8> = data
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();

    BASE64_STANDARD.decode(&cleaned).map_err(EnrollError::Base64)
}

/// Extract SignedData from ContentInfo.
fn extract_signed_data(content_info: &ContentInfo) -> Result<SignedData> {
    if content_info.content_type != const_oid::db::rfc5911::ID_SIGNED_DATA {
        return Err(EnrollError::certificate_parsing(format!(
            "Expected SignedData OID, got {}",
            content_info.content_type
        )));
    }

    let content = content_info.content.to_der().map_err(|e| {
        EnrollError::certificate_parsing(format!("Failed to encode content: {}", e))
    })?;

    SignedData::from_der(&content)
        .map_err(|e| EnrollError::certificate_parsing(format!("Failed to parse SignedData: {}", e)))
}

/// Extract certificates from SignedData.
fn extract_certificates(signed_data: &SignedData) -> Result<Vec<Certificate>> {
    let cert_set = match &signed_data.certificates {
        Some(certs) => certs,
        None => return Ok(Vec::new()),
    };

    let mut certificates = Vec::new();

    for cert_choice in cert_set.0.iter() {
        // Only plain X.509 certificates are of interest
        let cert_der = cert_choice.to_der().map_err(|e| {
            EnrollError::certificate_parsing(format!("Failed to encode certificate: {}", e))
        })?;

        match Certificate::from_der(&cert_der) {
            Ok(cert) => certificates.push(cert),
            Err(e) => {
                tracing::warn!("Skipping non-X.509 certificate: {}", e);
            }
        }
    }

    Ok(certificates)
}
