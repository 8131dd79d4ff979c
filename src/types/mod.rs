// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Platform message types and certificate helpers.
//!
//! This module provides the values exchanged with the platform (tenants,
//! tokens, one-time passwords, enrollment responses) together with small
//! helpers for inspecting and encoding X.509 certificates.

mod pkcs7;

pub use pkcs7::{parse_certs_only, parse_enrollment_response};

use der::{Encode, EncodePem};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use x509_cert::name::Name;
use x509_cert::Certificate;

use crate::csr::DeviceKey;
use crate::error::{EnrollError, Result};

/// Status code and decoded body of a single platform exchange.
///
/// A body is only present when the platform answered with 200 and the
/// payload could be decoded.
#[derive(Debug, Clone)]
pub struct Exchange<T> {
    /// HTTP status code of the response.
    pub status: u16,

    /// Decoded response body.
    pub body: Option<T>,
}

impl<T> Exchange<T> {
    /// An exchange that produced a value.
    pub fn ok(body: T) -> Self {
        Self {
            status: 200,
            body: Some(body),
        }
    }

    /// An exchange that completed without a usable body.
    pub fn status(status: u16) -> Self {
        Self { status, body: None }
    }

    /// Returns the body if the status was 200.
    pub fn into_success(self) -> Option<T> {
        if self.status == 200 {
            self.body
        } else {
            None
        }
    }
}

/// Bearer token obtained by presenting a device certificate.
#[derive(Clone)]
pub struct AccessToken {
    /// The opaque token string.
    pub token: String,

    /// HTTP status code of the token exchange.
    pub status: u16,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &format_args!("<{} bytes>", self.token.len()))
            .field("status", &self.status)
            .finish()
    }
}

impl AccessToken {
    /// Create a new access token.
    pub fn new(token: impl Into<String>, status: u16) -> Self {
        Self {
            token: token.into(),
            status,
        }
    }

    /// A token is usable only when the exchange returned 200 and the token
    /// is non-empty.
    pub fn is_valid(&self) -> bool {
        self.status == 200 && !self.token.is_empty()
    }
}

/// Bootstrap secret scoped to a single device id.
#[derive(Clone, PartialEq, Eq)]
pub struct OneTimePassword(String);

impl OneTimePassword {
    /// Wrap an operator-supplied password.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The password in clear text.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns true if the password is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for OneTimePassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("OneTimePassword(<redacted>)")
    }
}

/// Tenant of the authenticated user.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    /// Tenant id, e.g. `t12345`.
    pub name: String,

    /// Domain name the tenant is served from.
    #[serde(default)]
    pub domain_name: String,
}

/// CA certificate configured in a tenant.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustAnchor {
    /// Platform id of the certificate resource.
    #[serde(default)]
    pub fingerprint: String,

    /// Display name.
    #[serde(default)]
    pub name: String,

    /// Status reported by the platform (e.g. `ENABLED`).
    #[serde(default)]
    pub status: String,
}

/// Key and, once enrolled, certificate of a single device.
#[derive(Debug)]
pub struct DeviceIdentity {
    /// External id of the device, also the certificate common name.
    pub device_id: String,

    /// Private key, owned by the run until persisted.
    pub key: DeviceKey,

    /// Issued certificate; absent until enrollment succeeds.
    pub certificate: Option<Certificate>,
}

impl DeviceIdentity {
    /// Create an identity that has a key but no certificate yet.
    pub fn new(device_id: impl Into<String>, key: DeviceKey) -> Self {
        Self {
            device_id: device_id.into(),
            key,
            certificate: None,
        }
    }

    /// Attach the certificate issued for this identity.
    pub fn with_certificate(mut self, certificate: Certificate) -> Self {
        self.certificate = Some(certificate);
        self
    }

    /// PEM encoding of the attached certificate.
    pub fn certificate_pem(&self) -> Result<String> {
        let certificate = self.certificate.as_ref().ok_or_else(|| {
            EnrollError::certificate_parsing(format!(
                "no certificate issued yet for device {}",
                self.device_id
            ))
        })?;
        certificate_to_pem(certificate)
    }
}

/// Get the common name from a distinguished name.
pub fn name_common_name(name: &Name) -> Option<String> {
    use const_oid::db::rfc4519::CN;

    for rdn in name.0.iter() {
        for atv in rdn.0.iter() {
            if atv.oid == CN {
                if let Ok(s) = std::str::from_utf8(atv.value.value()) {
                    return Some(s.to_string());
                }
            }
        }
    }
    None
}

/// Get the common name from a certificate's subject.
pub fn subject_common_name(cert: &Certificate) -> Option<String> {
    name_common_name(&cert.tbs_certificate.subject)
}

/// Encode a certificate as PEM.
///
/// An empty encoding is reported as an error rather than written out.
pub fn certificate_to_pem(cert: &Certificate) -> Result<String> {
    let pem = cert
        .to_pem(der::pem::LineEnding::LF)
        .map_err(|e| EnrollError::certificate_parsing(format!("Failed to encode PEM: {}", e)))?;

    if pem.is_empty() {
        return Err(EnrollError::certificate_parsing(
            "Error while converting certificate to PEM format: PEM length is 0",
        ));
    }
    Ok(pem)
}

/// SHA-256 fingerprint of a certificate as colon-separated hex.
pub fn certificate_fingerprint(cert: &Certificate) -> Result<String> {
    let der = cert
        .to_der()
        .map_err(|e| EnrollError::certificate_parsing(format!("Failed to encode cert: {}", e)))?;

    let digest = Sha256::digest(&der);
    Ok(digest
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":"))
}

/// Time left until the certificate expires, zero if already expired.
pub fn remaining_validity(cert: &Certificate) -> std::time::Duration {
    let not_after = cert.tbs_certificate.validity.not_after.to_system_time();
    not_after
        .duration_since(std::time::SystemTime::now())
        .unwrap_or_default()
}

/// Content types used by the platform endpoints.
pub mod content_types {
    /// PKCS#10 CSR content type.
    pub const PKCS10: &str = "application/pkcs10";

    /// PKCS#7/CMS content type.
    pub const PKCS7_MIME: &str = "application/pkcs7-mime";

    /// JSON content type.
    pub const JSON: &str = "application/json";
}

/// Platform resource paths.
pub mod paths {
    /// Tenant of the authenticated user.
    pub const CURRENT_TENANT: &str = "/tenant/currentTenant";

    /// The authenticated user, including effective roles.
    pub const CURRENT_USER: &str = "/user/currentUser";

    /// CA certificate of the tenant.
    pub const CERTIFICATE_AUTHORITY: &str = "/certificate-authority";

    /// Bulk device credentials upload.
    pub const BULK_NEW_DEVICE_REQUESTS: &str = "/devicecontrol/bulkNewDeviceRequests";

    /// Access token exchange over mutual TLS.
    pub const DEVICE_ACCESS_TOKEN: &str = "/devicecontrol/deviceAccessToken";

    /// Simple enrollment endpoint.
    pub const SIMPLE_ENROLL: &str = "/.well-known/est/simpleenroll";

    /// Simple re-enrollment endpoint.
    pub const SIMPLE_REENROLL: &str = "/.well-known/est/simplereenroll";

    /// Device registration page of the device management application.
    pub const DEVICE_REGISTRATION_UI: &str = "/apps/devicemanagement/index.html";
}
