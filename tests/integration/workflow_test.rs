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

//! End-to-end tests of the registration, renewal and verification workflows

use std::future::pending;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use tokio::time::sleep;
use url::Url;

use c8y_device_enroll::enrollment::{EnrollmentObserver, NoopObserver};
use c8y_device_enroll::error::{EXIT_GENERAL_PROCESSING_ERROR, EXIT_PREREQUISITES_NOT_FULFILLED};
use c8y_device_enroll::storage::{certificate_file_name, private_key_file_name, ArtifactStore};
use c8y_device_enroll::tls::check_key_pair;
use c8y_device_enroll::verify::verify_credential;
use c8y_device_enroll::workflow::{
    get_access_token, register_with_password, register_with_poller, renew_certificate,
    verify_certificate, CredentialFiles, PasswordRegistrationOptions, PollerRegistrationOptions,
    RenewalOptions,
};
use c8y_device_enroll::{
    ClientIdentity, DeviceKey, EnrollError, KeyPolicy, OneTimePassword, RenewalDriver,
    VerificationFailure,
};

use crate::integration::{MockPlatform, TestCa, TEST_TOKEN};

const DEVICE_ID: &str = "kobu-edge-01";

fn password_options(dir: &Path) -> PasswordRegistrationOptions {
    let mut options = PasswordRegistrationOptions::new(DEVICE_ID);
    options.store = ArtifactStore::new(dir);
    options
}

fn poller_options(dir: &Path) -> PollerRegistrationOptions {
    let mut options = PollerRegistrationOptions::new(
        DEVICE_ID,
        Url::parse("https://acme.cumulocity.com").unwrap(),
    );
    options.observer = Arc::new(NoopObserver);
    options.store = ArtifactStore::new(dir);
    options
}

/// Keeps the banners shown while waiting for the operator.
#[derive(Default)]
struct BannerRecorder {
    banners: Mutex<Vec<String>>,
}

impl EnrollmentObserver for BannerRecorder {
    fn on_registration_pending(&self, banner: &str) {
        self.banners.lock().unwrap().push(banner.to_string());
    }
}

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

/// Copy an OpenSSL-written certificate and key into `dir` under the usual
/// file names.
fn openssl_identity(dir: &Path, cert_fixture: &str, key_fixture: &str) -> CredentialFiles {
    let store = ArtifactStore::new(dir);
    let cert_path = store.certificate_path(DEVICE_ID);
    let key_path = store.key_path(DEVICE_ID);
    std::fs::copy(fixture(cert_fixture), &cert_path).unwrap();
    std::fs::copy(fixture(key_fixture), &key_path).unwrap();
    CredentialFiles::new(cert_path, key_path)
}

fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Write an identity issued by the mock CA, as an earlier enrollment would.
async fn enrolled_identity(platform: &MockPlatform, dir: &Path) -> (CredentialFiles, DeviceKey) {
    let key = DeviceKey::generate().unwrap();
    let cert_pem = platform.ca.issue_pem(DEVICE_ID, &key);
    let (key_path, cert_path) = ArtifactStore::new(dir)
        .write_identity(DEVICE_ID, &key.to_pem(), &cert_pem)
        .await
        .unwrap();
    (CredentialFiles::new(cert_path, key_path), key)
}

// ============================================================================
// Password-based registration
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_password_registration_writes_identity() {
    let dir = TempDir::new().unwrap();
    let platform = MockPlatform::new().failing_enrollments(2);

    let report = register_with_password(&platform, &password_options(dir.path()), pending::<()>())
        .await
        .expect("registration");

    assert_eq!(platform.enroll_calls(), 3);
    assert_eq!(
        files_in(dir.path()),
        vec![
            certificate_file_name(DEVICE_ID),
            private_key_file_name(DEVICE_ID)
        ]
    );

    // The written pair is usable as a client identity.
    let identity = ClientIdentity::from_files(&report.certificate_path, &report.key_path).unwrap();
    check_key_pair(&identity).expect("key matches certificate");

    // The device enrolled with the password it was registered with.
    let registered = platform.registered.lock().unwrap();
    assert_eq!(registered.len(), 1);
    assert_eq!(registered[0].device_id(), DEVICE_ID);
    let otp = registered[0].field("ENROLLMENT_OTP").unwrap();
    assert!(platform.enroll_otps.lock().unwrap().iter().all(|o| *o == otp));

    // The new credential was proven before it was written.
    assert_eq!(platform.token_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_password_registration_requires_role() {
    let dir = TempDir::new().unwrap();
    let platform = MockPlatform::new().roles(&["ROLE_INVENTORY_READ"]);

    let result =
        register_with_password(&platform, &password_options(dir.path()), pending::<()>()).await;

    let err = result.unwrap_err();
    assert!(matches!(err, EnrollError::Permission { .. }));
    assert_eq!(err.exit_code(), EXIT_PREREQUISITES_NOT_FULFILLED);
    assert!(platform.registered.lock().unwrap().is_empty());
    assert_eq!(platform.enroll_calls(), 0);
    assert!(files_in(dir.path()).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_password_registration_requires_ca() {
    let dir = TempDir::new().unwrap();
    let platform = MockPlatform::new().without_ca();

    let err = register_with_password(&platform, &password_options(dir.path()), pending::<()>())
        .await
        .unwrap_err();

    assert!(matches!(err, EnrollError::MissingTrustAnchor(_)));
    assert_eq!(err.exit_code(), EXIT_PREREQUISITES_NOT_FULFILLED);
    assert_eq!(platform.enroll_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_password_registration_rejected_bulk_upload() {
    let dir = TempDir::new().unwrap();
    let platform = MockPlatform::new().bulk_status(409);

    let err = register_with_password(&platform, &password_options(dir.path()), pending::<()>())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EnrollError::Registration {
            status: Some(409),
            ..
        }
    ));
    assert_eq!(err.exit_code(), EXIT_GENERAL_PROCESSING_ERROR);
    assert_eq!(platform.enroll_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_password_registration_unverified_credential_is_not_written() {
    let dir = TempDir::new().unwrap();
    let platform = MockPlatform::new().token_answer(401, "");

    let err = register_with_password(&platform, &password_options(dir.path()), pending::<()>())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EnrollError::Verification(VerificationFailure::Status(401))
    ));
    assert!(files_in(dir.path()).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_password_registration_exhausted() {
    let dir = TempDir::new().unwrap();
    let platform = MockPlatform::new().never_enrolls();

    let err = register_with_password(&platform, &password_options(dir.path()), pending::<()>())
        .await
        .unwrap_err();

    assert!(matches!(err, EnrollError::AttemptsExhausted { attempts: 5 }));
    assert_eq!(platform.enroll_calls(), 5);
    assert!(files_in(dir.path()).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_password_registration_cancelled() {
    let dir = TempDir::new().unwrap();
    let platform = MockPlatform::new().never_enrolls();

    let err = register_with_password(
        &platform,
        &password_options(dir.path()),
        sleep(Duration::from_secs(1)),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, EnrollError::Cancelled));
    assert_eq!(err.exit_code(), 130);
    assert!(files_in(dir.path()).is_empty());
}

// ============================================================================
// Self-service registration
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_poller_registration_with_operator_password() {
    let dir = TempDir::new().unwrap();
    let platform = MockPlatform::new().failing_enrollments(4);

    let mut options = poller_options(dir.path());
    options.otp = Some(OneTimePassword::new("operator-chosen"));

    register_with_poller(&platform, &options, pending::<()>())
        .await
        .expect("registration");

    assert_eq!(platform.enroll_calls(), 5);
    assert!(platform
        .enroll_otps
        .lock()
        .unwrap()
        .iter()
        .all(|o| o == "operator-chosen"));
    assert_eq!(files_in(dir.path()).len(), 2);

    // Self-service enrollment does not register or verify.
    assert!(platform.registered.lock().unwrap().is_empty());
    assert_eq!(platform.token_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_poller_registration_generates_password() {
    let dir = TempDir::new().unwrap();
    let platform = MockPlatform::new();

    let mut options = poller_options(dir.path());
    options.otp = Some(OneTimePassword::new(""));

    register_with_poller(&platform, &options, pending::<()>())
        .await
        .expect("registration");

    let otps = platform.enroll_otps.lock().unwrap();
    assert_eq!(otps.as_slice(), ["Zq8vN2xKp4LmR7tY"]);
}

#[tokio::test(start_paused = true)]
async fn test_poller_banner_shows_operator_password() {
    let dir = TempDir::new().unwrap();
    let platform = MockPlatform::new();
    let recorder = Arc::new(BannerRecorder::default());

    let mut options = poller_options(dir.path());
    options.otp = Some(OneTimePassword::new("operator-chosen"));
    options.observer = recorder.clone();

    register_with_poller(&platform, &options, pending::<()>())
        .await
        .expect("registration");

    let banners = recorder.banners.lock().unwrap();
    assert_eq!(banners.len(), 1);
    assert!(banners[0].contains("External ID:       kobu-edge-01"));
    assert!(banners[0].contains("One-time password: operator-chosen"));
    assert!(banners[0].contains("one-time-password=operator-chosen"));
}

#[tokio::test(start_paused = true)]
async fn test_poller_banner_shows_generated_password() {
    let dir = TempDir::new().unwrap();
    let platform = MockPlatform::new();
    let recorder = Arc::new(BannerRecorder::default());

    let mut options = poller_options(dir.path());
    options.observer = recorder.clone();

    register_with_poller(&platform, &options, pending::<()>())
        .await
        .expect("registration");

    let banners = recorder.banners.lock().unwrap();
    assert_eq!(banners.len(), 1);
    assert!(banners[0].contains("One-time password: Zq8vN2xKp4LmR7tY"));
}

#[tokio::test(start_paused = true)]
async fn test_poller_registration_times_out() {
    let dir = TempDir::new().unwrap();
    let platform = MockPlatform::new().never_enrolls();

    let err = register_with_poller(&platform, &poller_options(dir.path()), pending::<()>())
        .await
        .unwrap_err();

    assert!(matches!(err, EnrollError::TimedOut { .. }));
    assert!(files_in(dir.path()).is_empty());
}

// ============================================================================
// Renewal
// ============================================================================

#[tokio::test]
async fn test_renewal_reusing_key() {
    let dir = TempDir::new().unwrap();
    let platform = MockPlatform::new();
    let (credentials, key) = enrolled_identity(&platform, dir.path()).await;
    let original_cert = std::fs::read(&credentials.certificate).unwrap();
    let original_key = std::fs::read(&credentials.private_key).unwrap();

    let options = RenewalOptions {
        device_id: DEVICE_ID.to_string(),
        credentials: credentials.clone(),
        key_policy: KeyPolicy::Reuse,
        store: ArtifactStore::new(dir.path()),
    };

    let report = renew_certificate(&platform, &options).await.expect("renewal");

    assert!(report.key_path.is_none());
    assert_eq!(
        report.certificate_path,
        dir.path().join(certificate_file_name("kobu-edge-01.new"))
    );
    assert_eq!(files_in(dir.path()).len(), 3);

    // Current files are untouched.
    assert_eq!(std::fs::read(&credentials.certificate).unwrap(), original_cert);
    assert_eq!(std::fs::read(&credentials.private_key).unwrap(), original_key);

    // The renewed certificate carries the same key.
    let renewed = ClientIdentity::new(
        std::fs::read(&report.certificate_path).unwrap(),
        key.to_pem(),
    );
    check_key_pair(&renewed).expect("renewed certificate matches current key");
    assert_eq!(platform.reenroll_calls(), 1);
}

#[tokio::test]
async fn test_renewal_rotating_key() {
    let dir = TempDir::new().unwrap();
    let platform = MockPlatform::new();
    let (credentials, _) = enrolled_identity(&platform, dir.path()).await;

    let options = RenewalOptions {
        device_id: DEVICE_ID.to_string(),
        credentials,
        key_policy: KeyPolicy::Rotate,
        store: ArtifactStore::new(dir.path()),
    };

    let report = renew_certificate(&platform, &options).await.expect("renewal");

    let key_path = report.key_path.expect("new key written");
    assert_eq!(
        key_path,
        dir.path().join(private_key_file_name("kobu-edge-01.new"))
    );
    let renewed = ClientIdentity::from_files(&report.certificate_path, &key_path).unwrap();
    check_key_pair(&renewed).expect("renewed certificate matches new key");
}

#[tokio::test]
async fn test_renewal_rejected_credential_is_not_re_enrolled() {
    let dir = TempDir::new().unwrap();
    let platform = MockPlatform::new().token_answer(401, "");
    let (credentials, _) = enrolled_identity(&platform, dir.path()).await;

    let options = RenewalOptions {
        device_id: DEVICE_ID.to_string(),
        credentials,
        key_policy: KeyPolicy::Reuse,
        store: ArtifactStore::new(dir.path()),
    };

    let err = renew_certificate(&platform, &options).await.unwrap_err();

    assert!(matches!(
        err,
        EnrollError::Verification(VerificationFailure::Status(401))
    ));
    assert_eq!(platform.reenroll_calls(), 0);
    assert_eq!(files_in(dir.path()).len(), 2);
}

#[tokio::test]
async fn test_renewal_refused_by_platform() {
    let dir = TempDir::new().unwrap();
    let platform = MockPlatform::new().reenroll_status(500);
    let (credentials, _) = enrolled_identity(&platform, dir.path()).await;

    let options = RenewalOptions {
        device_id: DEVICE_ID.to_string(),
        credentials,
        key_policy: KeyPolicy::Reuse,
        store: ArtifactStore::new(dir.path()),
    };

    let err = renew_certificate(&platform, &options).await.unwrap_err();

    assert!(matches!(err, EnrollError::ReEnrollment { status: 500 }));
    assert_eq!(files_in(dir.path()).len(), 2);
}

#[tokio::test]
async fn test_renewal_driver_returns_device_identity() {
    let dir = TempDir::new().unwrap();
    let platform = MockPlatform::new();
    let (credentials, key) = enrolled_identity(&platform, dir.path()).await;
    let current = credentials.load().unwrap();

    let reused = RenewalDriver::new(&platform)
        .renew(DEVICE_ID, &current)
        .await
        .expect("renewal");
    assert!(!reused.key_rotated);
    assert_eq!(reused.identity.device_id, DEVICE_ID);
    assert_eq!(reused.identity.key.public_key_raw(), key.public_key_raw());
    assert!(reused.identity.certificate.is_some());

    let rotated = RenewalDriver::new(&platform)
        .key_policy(KeyPolicy::Rotate)
        .renew(DEVICE_ID, &current)
        .await
        .expect("renewal");
    assert!(rotated.key_rotated);
    assert_ne!(rotated.identity.key.public_key_raw(), key.public_key_raw());
    let pair = ClientIdentity::new(
        rotated.identity.certificate_pem().unwrap(),
        rotated.identity.key.to_pem(),
    );
    check_key_pair(&pair).expect("renewed certificate matches rotated key");
}

#[tokio::test]
async fn test_renewal_rotating_key_leaves_no_partial_files() {
    let dir = TempDir::new().unwrap();
    let platform = MockPlatform::new();
    let (credentials, _) = enrolled_identity(&platform, dir.path()).await;
    let store = ArtifactStore::new(dir.path());
    // A directory in place of the renewed certificate makes its write fail.
    std::fs::create_dir(store.certificate_path("kobu-edge-01.new")).unwrap();

    let options = RenewalOptions {
        device_id: DEVICE_ID.to_string(),
        credentials,
        key_policy: KeyPolicy::Rotate,
        store: store.clone(),
    };

    let err = renew_certificate(&platform, &options).await.unwrap_err();

    assert!(matches!(err, EnrollError::Io(_)));
    assert!(!store.key_path("kobu-edge-01.new").exists());
}

#[tokio::test]
async fn test_renewal_rotating_key_writes_key_before_certificate() {
    let dir = TempDir::new().unwrap();
    let platform = MockPlatform::new();
    let (credentials, _) = enrolled_identity(&platform, dir.path()).await;
    let store = ArtifactStore::new(dir.path());
    std::fs::create_dir(store.key_path("kobu-edge-01.new")).unwrap();

    let options = RenewalOptions {
        device_id: DEVICE_ID.to_string(),
        credentials,
        key_policy: KeyPolicy::Rotate,
        store: store.clone(),
    };

    assert!(renew_certificate(&platform, &options).await.is_err());
    // No renewed certificate without its key.
    assert!(!store.certificate_path("kobu-edge-01.new").exists());
}

#[tokio::test]
async fn test_renewal_reusing_sec1_key() {
    let dir = TempDir::new().unwrap();
    let platform = MockPlatform::new();
    let credentials = openssl_identity(dir.path(), "sec1-device-cert.pem", "sec1-device-key.pem");

    let options = RenewalOptions {
        device_id: DEVICE_ID.to_string(),
        credentials: credentials.clone(),
        key_policy: KeyPolicy::Reuse,
        store: ArtifactStore::new(dir.path()),
    };

    let report = renew_certificate(&platform, &options).await.expect("renewal");

    assert!(report.key_path.is_none());
    let renewed = ClientIdentity::new(
        std::fs::read(&report.certificate_path).unwrap(),
        std::fs::read(&credentials.private_key).unwrap(),
    );
    check_key_pair(&renewed).expect("renewed certificate matches the SEC1 key");
}

#[tokio::test]
async fn test_renewal_with_foreign_key() {
    let dir = TempDir::new().unwrap();
    let platform = MockPlatform::new();
    let (credentials, _) = enrolled_identity(&platform, dir.path()).await;

    let foreign = DeviceKey::generate().unwrap();
    std::fs::write(&credentials.private_key, foreign.to_pem()).unwrap();

    let options = RenewalOptions {
        device_id: DEVICE_ID.to_string(),
        credentials,
        key_policy: KeyPolicy::Reuse,
        store: ArtifactStore::new(dir.path()),
    };

    let err = renew_certificate(&platform, &options).await.unwrap_err();

    assert!(matches!(err, EnrollError::Crypto(_)));
    assert_eq!(platform.token_calls(), 0);
}

// ============================================================================
// Access token and verification
// ============================================================================

#[tokio::test]
async fn test_get_access_token() {
    let dir = TempDir::new().unwrap();
    let platform = MockPlatform::new();
    let (credentials, _) = enrolled_identity(&platform, dir.path()).await;

    let token = get_access_token(&platform, &credentials).await.unwrap();

    assert_eq!(token.token, TEST_TOKEN);
}

#[tokio::test]
async fn test_verify_accepted_certificate() {
    let dir = TempDir::new().unwrap();
    let platform = MockPlatform::new();
    let (credentials, _) = enrolled_identity(&platform, dir.path()).await;

    verify_certificate(&platform, &credentials)
        .await
        .expect("certificate accepted");
}

#[tokio::test]
async fn test_verify_empty_token() {
    let dir = TempDir::new().unwrap();
    let platform = MockPlatform::new().token_answer(200, "");
    let (credentials, _) = enrolled_identity(&platform, dir.path()).await;

    let err = verify_certificate(&platform, &credentials).await.unwrap_err();

    assert!(matches!(
        err,
        EnrollError::Verification(VerificationFailure::EmptyToken)
    ));
}

#[tokio::test]
async fn test_verify_certificate_with_sec1_key() {
    let dir = TempDir::new().unwrap();
    let platform = MockPlatform::new();
    let credentials = openssl_identity(dir.path(), "sec1-device-cert.pem", "sec1-device-key.pem");

    verify_certificate(&platform, &credentials)
        .await
        .expect("certificate accepted");
    assert_eq!(platform.token_calls(), 1);
}

#[tokio::test]
async fn test_get_access_token_with_pkcs1_key() {
    let dir = TempDir::new().unwrap();
    let platform = MockPlatform::new();
    let credentials =
        openssl_identity(dir.path(), "pkcs1-device-cert.pem", "pkcs1-device-key.pem");

    let token = get_access_token(&platform, &credentials).await.unwrap();

    assert_eq!(token.token, TEST_TOKEN);
}

#[tokio::test]
async fn test_verify_transport_failure() {
    let dir = TempDir::new().unwrap();
    let platform = MockPlatform::new().failing_token_exchange("handshake failure: unknown ca");
    let (credentials, _) = enrolled_identity(&platform, dir.path()).await;

    let err = verify_credential(&platform, &credentials.load().unwrap())
        .await
        .unwrap_err();
    match err {
        EnrollError::Verification(VerificationFailure::Transport(ref msg)) => {
            assert!(msg.contains("unknown ca"));
        }
        other => panic!("Expected a transport failure, got {:?}", other),
    }

    let err = verify_certificate(&platform, &credentials).await.unwrap_err();
    assert!(matches!(
        err,
        EnrollError::Verification(VerificationFailure::Transport(_))
    ));
    assert_eq!(platform.token_calls(), 2);
}

#[tokio::test]
async fn test_renewal_transport_failure_is_not_re_enrolled() {
    let dir = TempDir::new().unwrap();
    let platform = MockPlatform::new().failing_token_exchange("connection reset by peer");
    let (credentials, _) = enrolled_identity(&platform, dir.path()).await;

    let options = RenewalOptions {
        device_id: DEVICE_ID.to_string(),
        credentials,
        key_policy: KeyPolicy::Reuse,
        store: ArtifactStore::new(dir.path()),
    };

    let err = renew_certificate(&platform, &options).await.unwrap_err();

    assert!(matches!(
        err,
        EnrollError::Verification(VerificationFailure::Transport(_))
    ));
    assert_eq!(platform.reenroll_calls(), 0);
    assert_eq!(files_in(dir.path()).len(), 2);
}

#[tokio::test]
async fn test_verify_rejected_certificate() {
    let dir = TempDir::new().unwrap();
    let platform = MockPlatform::new().token_answer(401, "");
    let other_ca = TestCa::new();
    let key = DeviceKey::generate().unwrap();
    let (key_path, cert_path) = ArtifactStore::new(dir.path())
        .write_identity(DEVICE_ID, &key.to_pem(), &other_ca.issue_pem(DEVICE_ID, &key))
        .await
        .unwrap();

    let err = verify_certificate(&platform, &CredentialFiles::new(cert_path, key_path))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EnrollError::Verification(VerificationFailure::Status(401))
    ));
}

#[tokio::test]
async fn test_missing_credential_file() {
    let dir = TempDir::new().unwrap();
    let platform = MockPlatform::new();
    let credentials = CredentialFiles::new(
        dir.path().join("missing-cert.pem"),
        dir.path().join("missing-key.pem"),
    );

    let err = verify_certificate(&platform, &credentials).await.unwrap_err();

    assert!(matches!(err, EnrollError::ReadFile { .. }));
    assert_eq!(err.exit_code(), EXIT_GENERAL_PROCESSING_ERROR);
    assert_eq!(platform.token_calls(), 0);
}
