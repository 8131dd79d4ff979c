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

//! Certificate renewal by re-enrollment.
//!
//! An enrolled device renews its certificate by first proving its current
//! identity (certificate and key over mutual TLS) in exchange for an access
//! token, and then sending a new CSR for the same device id, authorized by
//! that token.
//!
//! # Example
//!
//! ```no_run
//! use c8y_device_enroll::renewal::{KeyPolicy, RenewalDriver};
//! use c8y_device_enroll::{ClientIdentity, PlatformClient, PlatformConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PlatformConfig::builder()
//!     .base_url("https://example.cumulocity.com")?
//!     .build()?;
//! let client = PlatformClient::new(config).await?;
//!
//! let identity = ClientIdentity::from_files(
//!     "c8y-certificate-kobu-edge-01.pem",
//!     "c8y-private-key-kobu-edge-01.pem",
//! )?;
//!
//! let renewed = RenewalDriver::new(&client)
//!     .key_policy(KeyPolicy::Reuse)
//!     .renew("kobu-edge-01", &identity)
//!     .await?;
//! println!("{}", renewed.identity.certificate_pem()?);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};
use x509_cert::Certificate;

use crate::config::ClientIdentity;
use crate::csr::{build_csr, DeviceKey};
use crate::error::{EnrollError, Result};
use crate::platform::Platform;
use crate::types::{remaining_validity, subject_common_name, DeviceIdentity};
use crate::verify::verify_credential;

/// Which key a renewed certificate is bound to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyPolicy {
    /// Keep the current private key.
    #[default]
    Reuse,

    /// Generate a new private key for the renewed certificate.
    Rotate,
}

/// A replacement certificate together with the key it is bound to.
#[derive(Debug)]
pub struct RenewedIdentity {
    /// Device id, key and the newly issued certificate.
    pub identity: DeviceIdentity,

    /// Whether `identity.key` was generated for this renewal.
    pub key_rotated: bool,
}

/// Renews device certificates through a [`Platform`].
pub struct RenewalDriver<'a, P: Platform + ?Sized> {
    platform: &'a P,
    key_policy: KeyPolicy,
}

impl<'a, P: Platform + ?Sized> RenewalDriver<'a, P> {
    /// Create a driver that reuses the current key.
    pub fn new(platform: &'a P) -> Self {
        Self {
            platform,
            key_policy: KeyPolicy::default(),
        }
    }

    /// Set the key policy.
    pub fn key_policy(mut self, policy: KeyPolicy) -> Self {
        self.key_policy = policy;
        self
    }

    /// Obtain a replacement certificate for `device_id`.
    ///
    /// `identity` is the current certificate and key. The renewal fails if
    /// the identity is not accepted by the platform or if the re-enrollment
    /// is not answered with 200.
    pub async fn renew(&self, device_id: &str, identity: &ClientIdentity) -> Result<RenewedIdentity> {
        let current = crate::tls::check_key_pair(identity)?;
        log_current_certificate(device_id, &current);

        let token = verify_credential(self.platform, identity).await?;
        debug!("Access token obtained for re-enrollment");

        let (key, rotated) = match self.key_policy {
            KeyPolicy::Reuse => (DeviceKey::from_pem(&identity.key_pem)?, false),
            KeyPolicy::Rotate => {
                info!("Generating a new private key for the renewed certificate");
                (DeviceKey::generate()?, true)
            }
        };

        let renewing = DeviceIdentity::new(device_id, key);
        let csr = build_csr(device_id, &renewing.key)?;

        let exchange = self.platform.re_enroll(&token, &csr).await?;
        let status = exchange.status;
        let certificate = exchange
            .into_success()
            .ok_or(EnrollError::ReEnrollment { status })?;

        info!("Certificate renewed for device {}", device_id);

        Ok(RenewedIdentity {
            identity: renewing.with_certificate(certificate),
            key_rotated: rotated,
        })
    }
}

fn log_current_certificate(device_id: &str, current: &Certificate) {
    match subject_common_name(current) {
        Some(cn) if cn == device_id => {}
        Some(cn) => warn!(
            "Common name of the current certificate ('{}') differs from device id '{}'",
            cn, device_id
        ),
        None => warn!("Current certificate has no common name"),
    }

    let remaining = remaining_validity(current);
    if remaining == Duration::ZERO {
        warn!("Current certificate has expired");
    } else {
        info!(
            "Current certificate expires in {} days",
            remaining.as_secs() / 86400
        );
    }
}
