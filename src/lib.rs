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

//! # c8y-device-enroll
//!
//! X.509 certificate enrollment and renewal of device identities against
//! Cumulocity IoT.
//!
//! A device proves its identity to the platform with a client certificate
//! over mutual TLS. This library obtains that certificate and keeps it
//! fresh:
//!
//! - **Password-based registration**: a user with the device control admin
//!   role announces the device with a one-time password, and the device
//!   enrolls right away with a bounded number of attempts.
//! - **Self-service registration**: the device polls the enrollment
//!   endpoint while an operator registers it in the platform UI.
//! - **Renewal**: an enrolled device exchanges its current certificate for
//!   an access token and re-enrolls.
//! - **Verification**: check that a certificate and key are accepted.
//!
//! ## Quick Start
//!
//! ```no_run
//! use c8y_device_enroll::workflow::{register_with_password, PasswordRegistrationOptions};
//! use c8y_device_enroll::{PlatformClient, PlatformConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PlatformConfig::builder()
//!         .base_url("https://example.cumulocity.com")?
//!         .tenant("t12345")
//!         .http_auth("admin", "secret")
//!         .build()?;
//!
//!     let client = PlatformClient::new(config).await?;
//!
//!     let options = PasswordRegistrationOptions::new("kobu-edge-01");
//!     let report = register_with_password(&client, &options, std::future::pending()).await?;
//!     println!("Certificate written to {}", report.certificate_path.display());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Testing Against Other Platforms
//!
//! The drivers only depend on the [`Platform`] trait, so they can be run
//! against an in-memory implementation.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod client;
pub mod config;
pub mod csr;
pub mod enrollment;
pub mod error;
pub mod logging;
pub mod platform;
pub mod precheck;
pub mod registration;
pub mod renewal;
pub mod settings;
pub mod storage;
pub mod tls;
pub mod types;
pub mod verify;
pub mod workflow;

// Re-export main types at crate root for convenience
pub use client::PlatformClient;
pub use config::{ClientIdentity, HttpAuth, PlatformConfig, PlatformConfigBuilder, TrustAnchors};
pub use csr::{build_csr, CertificateSigningRequest, DeviceKey};
pub use enrollment::{EnrollmentDriver, EnrollmentObserver, RetryPolicy};
pub use error::{EnrollError, Result, VerificationFailure};
pub use platform::Platform;
pub use renewal::{KeyPolicy, RenewalDriver};
pub use types::{AccessToken, DeviceIdentity, Exchange, OneTimePassword, Tenant, TrustAnchor};

// Re-export x509_cert::Certificate for convenience
pub use x509_cert::Certificate;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// User-Agent string for HTTP requests.
pub const USER_AGENT: &str = concat!("c8y-device-enroll/", env!("CARGO_PKG_VERSION"));
