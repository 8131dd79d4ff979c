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

//! End-to-end device provisioning workflows.
//!
//! Each workflow is an independent async function taking the platform and
//! an options struct. Files are written only after the workflow has
//! reached a terminal success.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;
use url::Url;

use crate::config::{join_path, ClientIdentity};
use crate::csr::{build_csr, DeviceKey};
use crate::enrollment::{
    EnrollmentDriver, EnrollmentObserver, EnrollmentRequest, RetryPolicy, TracingObserver,
};
use crate::error::Result;
use crate::platform::Platform;
use crate::precheck::{AccessPrecheck, DEVICE_CONTROL_ADMIN_ROLE};
use crate::registration::{BootstrapRegistrar, DEFAULT_DEVICE_TYPE};
use crate::renewal::{KeyPolicy, RenewalDriver};
use crate::storage::{ArtifactStore, RENEWED_SUFFIX};
use crate::types::{paths, AccessToken, DeviceIdentity, OneTimePassword};
use crate::verify::verify_credential;

/// Files written by a successful registration.
#[derive(Debug, Clone)]
pub struct RegistrationReport {
    /// Path of the private key file.
    pub key_path: PathBuf,

    /// Path of the certificate file.
    pub certificate_path: PathBuf,
}

/// Files written by a successful renewal.
#[derive(Debug, Clone)]
pub struct RenewalReport {
    /// Path of the renewed certificate file.
    pub certificate_path: PathBuf,

    /// Path of the new private key, when the key was rotated.
    pub key_path: Option<PathBuf>,
}

/// Options for [`register_with_password`].
#[derive(Debug, Clone)]
pub struct PasswordRegistrationOptions {
    /// External id of the device.
    pub device_id: String,

    /// Role the user must hold.
    pub required_role: String,

    /// Managed object type used in the bulk registration.
    pub device_type: String,

    /// Retry policy for the enrollment that follows the registration.
    pub policy: RetryPolicy,

    /// Where to write the key and certificate.
    pub store: ArtifactStore,
}

impl PasswordRegistrationOptions {
    /// Options with default role, device type, policy and store.
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            required_role: DEVICE_CONTROL_ADMIN_ROLE.to_string(),
            device_type: DEFAULT_DEVICE_TYPE.to_string(),
            policy: RetryPolicy::bounded(),
            store: ArtifactStore::default(),
        }
    }
}

/// Register a device as a user and enroll its certificate right away.
///
/// The platform must be configured with user credentials. Steps: check
/// tenant, role and CA; register the device with a generated one-time
/// password; enroll with bounded retries; verify the new credential;
/// write key and certificate.
pub async fn register_with_password<P, F>(
    platform: &P,
    options: &PasswordRegistrationOptions,
    cancel: F,
) -> Result<RegistrationReport>
where
    P: Platform + ?Sized,
    F: Future<Output = ()>,
{
    let device_id = options.device_id.as_str();

    AccessPrecheck::new(platform)
        .run(&options.required_role)
        .await?;

    let otp = platform.generate_otp()?;
    BootstrapRegistrar::new(platform)
        .device_type(options.device_type.clone())
        .submit_bulk_registration(device_id, &otp)
        .await?;

    let identity = DeviceIdentity::new(device_id, DeviceKey::generate()?);
    let csr = build_csr(device_id, &identity.key)?;

    info!("Starting device enrollment for {}", device_id);
    let request = EnrollmentRequest::new(device_id, otp, csr);
    let certificate = EnrollmentDriver::new(platform, options.policy)
        .enroll_until(&request, cancel)
        .await?;
    let identity = identity.with_certificate(certificate);

    let client_identity = ClientIdentity::new(identity.certificate_pem()?, identity.key.to_pem());
    verify_credential(platform, &client_identity).await?;
    info!("Platform access verified with the new certificate");

    let (key_path, certificate_path) = options
        .store
        .write_device_identity(device_id, &identity)
        .await?;

    info!(
        "Certificate retrieval succeeded. Placed files '{}' and '{}'",
        key_path.display(),
        certificate_path.display()
    );

    Ok(RegistrationReport {
        key_path,
        certificate_path,
    })
}

/// Options for [`register_with_poller`].
#[derive(Clone)]
pub struct PollerRegistrationOptions {
    /// External id of the device.
    pub device_id: String,

    /// Operator-supplied one-time password; generated when absent.
    pub otp: Option<OneTimePassword>,

    /// Platform URL, used for the registration link in the banner.
    pub platform_url: Url,

    /// Retry policy, normally polling.
    pub policy: RetryPolicy,

    /// Progress observer.
    pub observer: Arc<dyn EnrollmentObserver>,

    /// Where to write the key and certificate.
    pub store: ArtifactStore,
}

impl std::fmt::Debug for PollerRegistrationOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollerRegistrationOptions")
            .field("device_id", &self.device_id)
            .field("otp", &self.otp)
            .field("platform_url", &self.platform_url.as_str())
            .field("policy", &self.policy)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl PollerRegistrationOptions {
    /// Options with a generated password, default polling and a tracing
    /// observer.
    pub fn new(device_id: impl Into<String>, platform_url: Url) -> Self {
        Self {
            device_id: device_id.into(),
            otp: None,
            platform_url,
            policy: RetryPolicy::polling(),
            observer: Arc::new(TracingObserver),
            store: ArtifactStore::default(),
        }
    }
}

/// Link to the device registration page, prefilled with id and password.
pub fn registration_url(platform_url: &Url, device_id: &str, otp: &OneTimePassword) -> Url {
    let mut url = join_path(platform_url, paths::DEVICE_REGISTRATION_UI);
    url.set_query(None);

    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("externalId", device_id)
        .append_pair("one-time-password", otp.expose())
        .finish();
    url.set_fragment(Some(&format!("/deviceregistration?{}", query)));
    url
}

/// Text shown to the operator who has to approve the device.
pub fn registration_banner(platform_url: &Url, device_id: &str, otp: &OneTimePassword) -> String {
    format!(
        "\nRegister the device in the platform to continue:\n\n  \
         External ID:       {}\n  \
         One-time password: {}\n\n  \
         {}\n",
        device_id,
        otp.expose(),
        registration_url(platform_url, device_id, otp)
    )
}

/// Enroll a device that an operator approves out of band.
///
/// No user credentials are needed. The key and CSR are created first, the
/// registration banner is printed with the one-time password (supplied or
/// generated), then the enrollment endpoint is polled until the device has
/// been registered with the same password.
pub async fn register_with_poller<P, F>(
    platform: &P,
    options: &PollerRegistrationOptions,
    cancel: F,
) -> Result<RegistrationReport>
where
    P: Platform + ?Sized,
    F: Future<Output = ()>,
{
    let device_id = options.device_id.as_str();

    let identity = DeviceIdentity::new(device_id, DeviceKey::generate()?);
    info!("Starting device enrollment for {}", device_id);
    let csr = build_csr(device_id, &identity.key)?;

    let otp = poller_otp(platform, options.otp.as_ref())?;
    options
        .observer
        .on_registration_pending(&registration_banner(&options.platform_url, device_id, &otp));

    let request = EnrollmentRequest::new(device_id, otp, csr);
    let certificate = EnrollmentDriver::new(platform, options.policy)
        .with_observer(Arc::clone(&options.observer))
        .enroll_until(&request, cancel)
        .await?;
    info!("Successfully downloaded the device certificate");

    let identity = identity.with_certificate(certificate);
    let (key_path, certificate_path) = options
        .store
        .write_device_identity(device_id, &identity)
        .await?;

    info!(
        "Certificate retrieval succeeded. Placed files '{}' and '{}'",
        key_path.display(),
        certificate_path.display()
    );

    Ok(RegistrationReport {
        key_path,
        certificate_path,
    })
}

/// The operator's password if one was given, otherwise a generated one.
fn poller_otp<P>(platform: &P, supplied: Option<&OneTimePassword>) -> Result<OneTimePassword>
where
    P: Platform + ?Sized,
{
    match supplied {
        Some(otp) if !otp.is_empty() => Ok(otp.clone()),
        _ => {
            info!("No one-time password provided. Generating it...");
            platform.generate_otp()
        }
    }
}

/// Paths of an existing certificate and private key.
#[derive(Debug, Clone)]
pub struct CredentialFiles {
    /// Certificate PEM file.
    pub certificate: PathBuf,

    /// Private key PEM file.
    pub private_key: PathBuf,
}

impl CredentialFiles {
    /// Create a new pair of paths.
    pub fn new(certificate: impl Into<PathBuf>, private_key: impl Into<PathBuf>) -> Self {
        Self {
            certificate: certificate.into(),
            private_key: private_key.into(),
        }
    }

    /// Read both files.
    pub fn load(&self) -> Result<ClientIdentity> {
        ClientIdentity::from_files(&self.certificate, &self.private_key)
    }
}

/// Options for [`renew_certificate`].
#[derive(Debug, Clone)]
pub struct RenewalOptions {
    /// External id of the device.
    pub device_id: String,

    /// The current certificate and key.
    pub credentials: CredentialFiles,

    /// Whether the renewed certificate keeps the current key.
    pub key_policy: KeyPolicy,

    /// Where to write the renewed files.
    pub store: ArtifactStore,
}

/// Renew the certificate of an enrolled device.
///
/// The renewed certificate is written under `<device_id>.new`; the current
/// files are left untouched.
pub async fn renew_certificate<P>(platform: &P, options: &RenewalOptions) -> Result<RenewalReport>
where
    P: Platform + ?Sized,
{
    let identity = options.credentials.load()?;

    let renewed = RenewalDriver::new(platform)
        .key_policy(options.key_policy)
        .renew(&options.device_id, &identity)
        .await?;

    let new_id = format!("{}{}", options.device_id, RENEWED_SUFFIX);
    let (certificate_path, key_path) = if renewed.key_rotated {
        let (key_path, certificate_path) = options
            .store
            .write_device_identity(&new_id, &renewed.identity)
            .await?;
        (certificate_path, Some(key_path))
    } else {
        let certificate_pem = renewed.identity.certificate_pem()?;
        let certificate_path = options
            .store
            .write_certificate(&new_id, &certificate_pem)
            .await?;
        (certificate_path, None)
    };

    info!(
        "Certificate renewal succeeded. Placed file '{}'",
        certificate_path.display()
    );

    Ok(RenewalReport {
        certificate_path,
        key_path,
    })
}

/// Exchange a certificate and key for an access token.
pub async fn get_access_token<P>(platform: &P, credentials: &CredentialFiles) -> Result<AccessToken>
where
    P: Platform + ?Sized,
{
    let identity = credentials.load()?;
    verify_credential(platform, &identity).await
}

/// Check that a certificate and key are accepted by the platform.
pub async fn verify_certificate<P>(platform: &P, credentials: &CredentialFiles) -> Result<()>
where
    P: Platform + ?Sized,
{
    let identity = credentials.load()?;
    verify_credential(platform, &identity).await?;
    Ok(())
}
