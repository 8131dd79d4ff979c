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

//! Integration tests for the HTTP platform client

use base64::prelude::*;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, ResponseTemplate};

use c8y_device_enroll::registration::BulkRegistrationRecord;
use c8y_device_enroll::types::paths;
use c8y_device_enroll::verify::verify_credential;
use c8y_device_enroll::{
    build_csr, AccessToken, DeviceKey, EnrollError, OneTimePassword, Platform, PlatformClient,
    PlatformConfig, VerificationFailure,
};

use crate::integration::{MockPlatformServer, TestCa};

async fn client_for(mock: &MockPlatformServer) -> PlatformClient {
    let config = PlatformConfig::builder()
        .base_url(mock.url())
        .expect("Valid URL")
        .tenant("t4009123")
        .http_auth("john.doe@example.org", "s3cret")
        .build()
        .expect("Valid config");

    PlatformClient::new(config)
        .await
        .expect("Client creation failed")
}

fn basic(user: &str, password: &str) -> String {
    format!(
        "Basic {}",
        BASE64_STANDARD.encode(format!("{}:{}", user, password))
    )
}

#[tokio::test]
async fn test_current_tenant_uses_tenant_qualified_user() {
    let mock = MockPlatformServer::start().await;

    Mock::given(method("GET"))
        .and(path(paths::CURRENT_TENANT))
        .and(header(
            "Authorization",
            basic("t4009123/john.doe@example.org", "s3cret").as_str(),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": "t4009123",
            "domainName": "acme.cumulocity.com",
            "allowCreateTenants": false
        })))
        .expect(1)
        .mount(mock.inner())
        .await;

    let client = client_for(&mock).await;
    let tenant = client.current_tenant().await.expect("tenant lookup");

    assert_eq!(tenant.name, "t4009123");
    assert_eq!(tenant.domain_name, "acme.cumulocity.com");
}

#[tokio::test]
async fn test_current_user_roles() {
    let mock = MockPlatformServer::start().await;

    Mock::given(method("GET"))
        .and(path(paths::CURRENT_USER))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "userName": "john.doe@example.org",
            "effectiveRoles": [
                { "id": "ROLE_INVENTORY_READ", "name": "ROLE_INVENTORY_READ" },
                { "id": "ROLE_DEVICE_CONTROL_ADMIN", "name": "ROLE_DEVICE_CONTROL_ADMIN" }
            ]
        })))
        .mount(mock.inner())
        .await;

    let client = client_for(&mock).await;
    let roles = client.current_user_roles().await.expect("role lookup");

    assert_eq!(
        roles,
        vec!["ROLE_INVENTORY_READ", "ROLE_DEVICE_CONTROL_ADMIN"]
    );
}

#[tokio::test]
async fn test_unauthorized_tenant_lookup() {
    let mock = MockPlatformServer::start().await;

    Mock::given(method("GET"))
        .and(path(paths::CURRENT_TENANT))
        .respond_with(ResponseTemplate::new(401).set_body_string("Bad credentials"))
        .mount(mock.inner())
        .await;

    let client = client_for(&mock).await;
    let result = client.current_tenant().await;

    assert!(matches!(result, Err(EnrollError::ServerError { status: 401, .. })));
}

#[tokio::test]
async fn test_missing_ca_certificate() {
    let mock = MockPlatformServer::start().await;

    Mock::given(method("GET"))
        .and(path(paths::CERTIFICATE_AUTHORITY))
        .respond_with(ResponseTemplate::new(404))
        .mount(mock.inner())
        .await;

    let client = client_for(&mock).await;
    let result = client.ca_trust_anchor().await;

    assert!(matches!(result, Err(EnrollError::MissingTrustAnchor(_))));
}

#[tokio::test]
async fn test_ca_certificate_present() {
    let mock = MockPlatformServer::start().await;

    Mock::given(method("GET"))
        .and(path(paths::CERTIFICATE_AUTHORITY))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "fingerprint": "9f:86:d0:81",
            "name": "t4009123 CA",
            "status": "ENABLED",
            "certInPemFormat": "MIIB..."
        })))
        .mount(mock.inner())
        .await;

    let client = client_for(&mock).await;
    let anchor = client.ca_trust_anchor().await.expect("CA lookup");

    assert_eq!(anchor.name, "t4009123 CA");
    assert_eq!(anchor.status, "ENABLED");
}

#[tokio::test]
async fn test_bulk_registration_upload() {
    let mock = MockPlatformServer::start().await;

    Mock::given(method("POST"))
        .and(path(paths::BULK_NEW_DEVICE_REQUESTS))
        .and(body_string_contains("kobu-edge-01\tCERTIFICATES\tZq8vN2xK"))
        .and(body_string_contains("filename=\"bulk-registration.csv\""))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "numberOfAll": 1,
            "numberOfSuccessful": 1
        })))
        .expect(1)
        .mount(mock.inner())
        .await;

    let client = client_for(&mock).await;
    let record = BulkRegistrationRecord::new(
        "kobu-edge-01",
        OneTimePassword::new("Zq8vN2xK"),
        "c8y_Device",
    );
    let status = client
        .submit_bulk_credentials(&record)
        .await
        .expect("bulk upload");

    assert_eq!(status, 201);
}

#[tokio::test]
async fn test_enrollment_uses_device_credentials() {
    let mock = MockPlatformServer::start().await;
    let ca = TestCa::new();
    let key = DeviceKey::generate().unwrap();
    let csr = build_csr("kobu-edge-01", &key).unwrap();

    Mock::given(method("POST"))
        .and(path(paths::SIMPLE_ENROLL))
        .and(header(
            "Authorization",
            basic("kobu-edge-01", "Zq8vN2xK").as_str(),
        ))
        .and(header("Content-Type", "application/pkcs10"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(ca.issue_pem("kobu-edge-01", &key)),
        )
        .expect(1)
        .mount(mock.inner())
        .await;

    let client = client_for(&mock).await;
    let exchange = client
        .request_enrollment_certificate("kobu-edge-01", &OneTimePassword::new("Zq8vN2xK"), &csr)
        .await
        .expect("enrollment request");

    assert_eq!(exchange.status, 200);
    let certificate = exchange.into_success().expect("certificate issued");
    assert_eq!(
        c8y_device_enroll::types::subject_common_name(&certificate).as_deref(),
        Some("kobu-edge-01")
    );
}

#[tokio::test]
async fn test_enrollment_not_ready_is_reported_as_status() {
    let mock = MockPlatformServer::start().await;
    mock.mock_enroll_pending(404).await;

    let key = DeviceKey::generate().unwrap();
    let csr = build_csr("kobu-edge-01", &key).unwrap();

    let client = client_for(&mock).await;
    let exchange = client
        .request_enrollment_certificate("kobu-edge-01", &OneTimePassword::new("x"), &csr)
        .await
        .expect("a status answer is not an error");

    assert_eq!(exchange.status, 404);
    assert!(exchange.body.is_none());
}

#[tokio::test]
async fn test_access_token_exchange() {
    let mock = MockPlatformServer::start().await;
    mock.mock_access_token(200, "eyJ.token").await;

    let ca = TestCa::new();
    let key = DeviceKey::generate().unwrap();
    let identity = ca.issue_identity("kobu-edge-01", &key);

    let client = client_for(&mock).await;
    let token = client
        .request_access_token(&identity)
        .await
        .expect("token request");

    assert_eq!(token.status, 200);
    assert_eq!(token.token, "eyJ.token");
    assert!(token.is_valid());
}

#[tokio::test]
async fn test_access_token_rejected() {
    let mock = MockPlatformServer::start().await;
    mock.mock_access_token(401, "").await;

    let ca = TestCa::new();
    let key = DeviceKey::generate().unwrap();
    let identity = ca.issue_identity("kobu-edge-01", &key);

    let client = client_for(&mock).await;
    let token = client.request_access_token(&identity).await.unwrap();

    assert_eq!(token.status, 401);
    assert!(token.token.is_empty());
}

#[tokio::test]
async fn test_unreachable_platform_is_a_transport_failure() {
    let config = PlatformConfig::builder()
        .base_url("http://127.0.0.1:1")
        .expect("Valid URL")
        .build()
        .expect("Valid config");
    let client = PlatformClient::new(config)
        .await
        .expect("Client creation failed");

    let ca = TestCa::new();
    let key = DeviceKey::generate().unwrap();
    let identity = ca.issue_identity("kobu-edge-01", &key);

    let err = verify_credential(&client, &identity).await.unwrap_err();

    assert!(matches!(
        err,
        EnrollError::Verification(VerificationFailure::Transport(_))
    ));
}

#[tokio::test]
async fn test_re_enrollment_uses_bearer_token() {
    let mock = MockPlatformServer::start().await;
    let ca = TestCa::new();
    let key = DeviceKey::generate().unwrap();
    let csr = build_csr("kobu-edge-01", &key).unwrap();

    Mock::given(method("POST"))
        .and(path(paths::SIMPLE_REENROLL))
        .and(header("Authorization", "Bearer eyJ.token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(ca.issue_pem("kobu-edge-01", &key)),
        )
        .expect(1)
        .mount(mock.inner())
        .await;

    let client = client_for(&mock).await;
    let exchange = client
        .re_enroll(&AccessToken::new("eyJ.token", 200), &csr)
        .await
        .expect("re-enrollment request");

    assert_eq!(exchange.status, 200);
    assert!(exchange.body.is_some());
}

#[tokio::test]
async fn test_generated_otp_shape() {
    let mock = MockPlatformServer::start().await;
    let client = client_for(&mock).await;

    let first = client.generate_otp().unwrap();
    let second = client.generate_otp().unwrap();

    assert_eq!(first.expose().len(), 32);
    assert!(first.expose().chars().all(|c| c.is_ascii_alphanumeric()));
    assert_ne!(first.expose(), second.expose());
}
