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

//! Abstraction over the remote IoT platform.
//!
//! The enrollment, renewal and verification drivers talk to the platform
//! only through the [`Platform`] trait. [`crate::client::PlatformClient`]
//! implements it over HTTPS; tests provide in-memory implementations.

use async_trait::async_trait;
use x509_cert::Certificate;

use crate::config::ClientIdentity;
use crate::csr::CertificateSigningRequest;
use crate::error::Result;
use crate::registration::BulkRegistrationRecord;
use crate::types::{AccessToken, Exchange, OneTimePassword, Tenant, TrustAnchor};

/// Operations the enrollment engine needs from the platform.
///
/// Methods returning an [`Exchange`] report non-200 answers as a status
/// rather than an error, so callers can decide whether to retry. Transport
/// failures are returned as errors.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Tenant of the authenticated user.
    async fn current_tenant(&self) -> Result<Tenant>;

    /// Names of the effective roles of the authenticated user.
    async fn current_user_roles(&self) -> Result<Vec<String>>;

    /// CA certificate configured in the tenant.
    ///
    /// Returns [`crate::error::EnrollError::MissingTrustAnchor`] when the
    /// tenant has none.
    async fn ca_trust_anchor(&self) -> Result<TrustAnchor>;

    /// Upload a bulk registration record and return the response status.
    async fn submit_bulk_credentials(&self, record: &BulkRegistrationRecord) -> Result<u16>;

    /// Exchange device id, one-time password and CSR for a certificate.
    async fn request_enrollment_certificate(
        &self,
        device_id: &str,
        otp: &OneTimePassword,
        csr: &CertificateSigningRequest,
    ) -> Result<Exchange<Certificate>>;

    /// Exchange a certificate and key, presented over mutual TLS, for an
    /// access token.
    async fn request_access_token(&self, identity: &ClientIdentity) -> Result<AccessToken>;

    /// Request a replacement certificate for an enrolled device.
    async fn re_enroll(
        &self,
        token: &AccessToken,
        csr: &CertificateSigningRequest,
    ) -> Result<Exchange<Certificate>>;

    /// Generate a fresh one-time password.
    fn generate_otp(&self) -> Result<OneTimePassword>;
}
