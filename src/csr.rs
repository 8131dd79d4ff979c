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

//! Key material and CSR (Certificate Signing Request) generation.
//!
//! New device keys are ECDSA P-256 and are written as PKCS#8 PEM. Existing
//! keys are also read from SEC1 (`EC PRIVATE KEY`) and PKCS#1
//! (`RSA PRIVATE KEY`) PEM. A CSR carries only the device id as subject
//! common name; the platform fills in the rest of the subject when it
//! issues the certificate.

use const_oid::db::rfc5912::{ID_EC_PUBLIC_KEY, RSA_ENCRYPTION, SECP_256_R_1, SECP_384_R_1};
use der::asn1::AnyRef;
use der::{Decode, Encode};
use pkcs8::spki::AlgorithmIdentifierRef;
use pkcs8::PrivateKeyInfo;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rustls::pki_types::PrivateKeyDer;
use sec1::EcPrivateKey;
use x509_cert::request::CertReq;

use crate::error::{EnrollError, Result};

/// A private key owned by a device.
pub struct DeviceKey {
    key_pair: KeyPair,
}

impl std::fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceKey")
            .field("algorithm", self.key_pair.algorithm())
            .finish_non_exhaustive()
    }
}

impl DeviceKey {
    /// Generate a fresh P-256 key from the system randomness source.
    pub fn generate() -> Result<Self> {
        let key_pair = KeyPair::generate()
            .map_err(|e| EnrollError::crypto(format!("Failed to generate key pair: {}", e)))?;
        Ok(Self { key_pair })
    }

    /// Load a key from PEM.
    ///
    /// PKCS#8, SEC1 and PKCS#1 encodings are accepted.
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let pkcs8 = match crate::tls::parse_pem_private_key(pem)? {
            PrivateKeyDer::Pkcs8(der) => der.secret_pkcs8_der().to_vec(),
            PrivateKeyDer::Sec1(der) => sec1_to_pkcs8(der.secret_sec1_der())?,
            PrivateKeyDer::Pkcs1(der) => pkcs1_to_pkcs8(der.secret_pkcs1_der())?,
            _ => return Err(EnrollError::crypto("unsupported private key format")),
        };

        let key_pair = KeyPair::try_from(pkcs8.as_slice())
            .map_err(|e| EnrollError::crypto(format!("Failed to load private key: {}", e)))?;
        Ok(Self { key_pair })
    }

    /// Serialize the key as PKCS#8 PEM.
    pub fn to_pem(&self) -> String {
        self.key_pair.serialize_pem()
    }

    /// DER encoding of the SubjectPublicKeyInfo.
    pub fn public_key_der(&self) -> Vec<u8> {
        self.key_pair.public_key_der()
    }

    /// Raw public key bytes, as carried in a certificate's SPKI bit string.
    pub fn public_key_raw(&self) -> &[u8] {
        self.key_pair.public_key_raw()
    }

    /// The underlying rcgen key pair.
    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }
}

/// Wrap a SEC1 `ECPrivateKey` into a PKCS#8 `PrivateKeyInfo`.
///
/// Keys without curve parameters are assigned a curve by scalar length.
fn sec1_to_pkcs8(sec1_der: &[u8]) -> Result<Vec<u8>> {
    let key = EcPrivateKey::from_der(sec1_der)
        .map_err(|e| EnrollError::crypto(format!("Invalid EC private key: {}", e)))?;

    let curve = match key.parameters.and_then(|p| p.named_curve()) {
        Some(curve) => curve,
        None => match key.private_key.len() {
            32 => SECP_256_R_1,
            48 => SECP_384_R_1,
            n => {
                return Err(EnrollError::crypto(format!(
                    "EC private key of {} bytes names no curve",
                    n
                )))
            }
        },
    };

    let algorithm = AlgorithmIdentifierRef {
        oid: ID_EC_PUBLIC_KEY,
        parameters: Some(AnyRef::from(&curve)),
    };
    Ok(PrivateKeyInfo::new(algorithm, sec1_der).to_der()?)
}

/// Wrap a PKCS#1 `RSAPrivateKey` into a PKCS#8 `PrivateKeyInfo`.
fn pkcs1_to_pkcs8(pkcs1_der: &[u8]) -> Result<Vec<u8>> {
    let algorithm = AlgorithmIdentifierRef {
        oid: RSA_ENCRYPTION,
        parameters: Some(AnyRef::NULL),
    };
    Ok(PrivateKeyInfo::new(algorithm, pkcs1_der).to_der()?)
}

/// A signed PKCS#10 request for a device certificate.
#[derive(Debug, Clone)]
pub struct CertificateSigningRequest {
    /// DER encoding of the request.
    pub der: Vec<u8>,

    /// PEM encoding of the request.
    pub pem: String,

    /// Subject common name, always the device id.
    pub common_name: String,
}

/// Build a CSR for `device_id` signed by `key`.
///
/// The subject holds exactly one attribute, `CN=<device_id>`. The encoded
/// request is parsed back and its common name compared with the device id
/// before it is returned.
pub fn build_csr(device_id: &str, key: &DeviceKey) -> Result<CertificateSigningRequest> {
    if device_id.is_empty() {
        return Err(EnrollError::prerequisite("device id must not be empty"));
    }

    let mut params = CertificateParams::default();
    params.distinguished_name = DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::CommonName, device_id);

    let csr = params
        .serialize_request(key.key_pair())
        .map_err(|e| EnrollError::crypto(format!("Failed to serialize CSR: {}", e)))?;

    let der = csr.der().to_vec();
    let pem = csr
        .pem()
        .map_err(|e| EnrollError::crypto(format!("Failed to encode CSR as PEM: {}", e)))?;

    let parsed = CertReq::from_der(&der)?;
    let actual = crate::types::name_common_name(&parsed.info.subject);
    if actual.as_deref() != Some(device_id) {
        return Err(EnrollError::CsrSubjectMismatch {
            expected: device_id.to_string(),
            actual,
        });
    }

    tracing::debug!("Built CSR for device {}", device_id);

    Ok(CertificateSigningRequest {
        der,
        pem,
        common_name: device_id.to_string(),
    })
}
