//! Platform client implementation.
//!
//! This module provides [`PlatformClient`], the HTTPS implementation of the
//! [`Platform`] trait against the Cumulocity IoT REST and EST endpoints.

use async_trait::async_trait;
use base64::prelude::*;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use x509_cert::Certificate;

use crate::config::{ClientIdentity, PlatformConfig};
use crate::csr::CertificateSigningRequest;
use crate::error::{EnrollError, Result};
use crate::platform::Platform;
use crate::registration::BulkRegistrationRecord;
use crate::tls::build_http_client;
use crate::types::{
    content_types, parse_enrollment_response, paths, AccessToken, Exchange, OneTimePassword,
    Tenant, TrustAnchor,
};

/// Length of generated one-time passwords.
const OTP_LENGTH: usize = 32;

/// HTTPS client for a single platform tenant.
///
/// # Example
///
/// ```no_run
/// use c8y_device_enroll::{PlatformClient, PlatformConfig, Platform};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = PlatformConfig::builder()
///     .base_url("https://example.cumulocity.com")?
///     .tenant("t12345")
///     .http_auth("admin", "secret")
///     .build()?;
///
/// let client = PlatformClient::new(config).await?;
/// let tenant = client.current_tenant().await?;
/// println!("Tenant domain: {}", tenant.domain_name);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct PlatformClient {
    config: PlatformConfig,
    http: reqwest::Client,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrentUser {
    #[serde(default)]
    effective_roles: Vec<Role>,
}

#[derive(Deserialize)]
struct Role {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccessTokenResponse {
    #[serde(default)]
    access_token: String,
}

impl PlatformClient {
    /// Create a new platform client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if TLS configuration fails.
    pub async fn new(config: PlatformConfig) -> Result<Self> {
        let http = build_http_client(&config, None)?;

        Ok(Self { config, http })
    }

    /// Get the client configuration.
    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    /// Add HTTP Basic auth header for the configured user.
    fn add_auth_header(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match (self.config.qualified_username(), self.config.http_auth.as_ref()) {
            (Some(username), Some(auth)) => {
                let credentials = BASE64_STANDARD.encode(format!("{}:{}", username, auth.password));
                request.header(AUTHORIZATION, format!("Basic {}", credentials))
            }
            _ => request,
        }
    }

    /// GET a JSON resource as the configured user.
    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.config.build_url(path);
        tracing::debug!("GET {}", url);

        let request = self.http.get(url).header(ACCEPT, content_types::JSON);
        let response = self.add_auth_header(request).send().await?;
        let response = handle_error_response(response).await?;

        Ok(response.json().await?)
    }

    /// Send a CSR and interpret the answer as an enrollment response.
    async fn send_csr(
        &self,
        request: reqwest::RequestBuilder,
        csr: &CertificateSigningRequest,
    ) -> Result<Exchange<Certificate>> {
        let body = BASE64_STANDARD.encode(&csr.der);

        let response = request
            .header(CONTENT_TYPE, content_types::PKCS10)
            .header(ACCEPT, content_types::PKCS7_MIME)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            tracing::debug!("Enrollment endpoint answered {}", status);
            return Ok(Exchange::status(status.as_u16()));
        }

        let body = response.bytes().await?;
        let certificate = parse_enrollment_response(&body)?;
        Ok(Exchange::ok(certificate))
    }
}

#[async_trait]
impl Platform for PlatformClient {
    async fn current_tenant(&self) -> Result<Tenant> {
        self.get_json(paths::CURRENT_TENANT).await
    }

    async fn current_user_roles(&self) -> Result<Vec<String>> {
        let user: CurrentUser = self.get_json(paths::CURRENT_USER).await?;
        Ok(user.effective_roles.into_iter().map(|r| r.name).collect())
    }

    async fn ca_trust_anchor(&self) -> Result<TrustAnchor> {
        let url = self.config.build_url(paths::CERTIFICATE_AUTHORITY);
        tracing::debug!("GET {}", url);

        let request = self.http.get(url).header(ACCEPT, content_types::JSON);
        let response = self.add_auth_header(request).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(EnrollError::missing_trust_anchor(
                "the tenant has no CA certificate",
            ));
        }

        let response = handle_error_response(response).await?;
        Ok(response.json().await?)
    }

    async fn submit_bulk_credentials(&self, record: &BulkRegistrationRecord) -> Result<u16> {
        let url = self.config.build_url(paths::BULK_NEW_DEVICE_REQUESTS);
        tracing::debug!("POST {}", url);

        let part = reqwest::multipart::Part::text(record.to_tsv())
            .file_name("bulk-registration.csv")
            .mime_str("text/csv")?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let request = self
            .http
            .post(url)
            .header(ACCEPT, content_types::JSON)
            .multipart(form);
        let response = self.add_auth_header(request).send().await?;

        Ok(response.status().as_u16())
    }

    async fn request_enrollment_certificate(
        &self,
        device_id: &str,
        otp: &OneTimePassword,
        csr: &CertificateSigningRequest,
    ) -> Result<Exchange<Certificate>> {
        let url = self.config.build_url(paths::SIMPLE_ENROLL);
        tracing::debug!("POST {}", url);

        let credentials = BASE64_STANDARD.encode(format!("{}:{}", device_id, otp.expose()));
        let request = self
            .http
            .post(url)
            .header(AUTHORIZATION, format!("Basic {}", credentials));

        self.send_csr(request, csr).await
    }

    async fn request_access_token(&self, identity: &ClientIdentity) -> Result<AccessToken> {
        let url = self.config.build_url(paths::DEVICE_ACCESS_TOKEN);
        tracing::debug!("POST {}", url);

        // The client certificate is bound at connection setup, so the token
        // request gets its own client.
        let http = build_http_client(&self.config, Some(identity))?;
        let response = http
            .post(url)
            .header(ACCEPT, content_types::JSON)
            .send()
            .await?;

        let status = response.status().as_u16();
        if status != 200 {
            return Ok(AccessToken::new("", status));
        }

        let body: AccessTokenResponse = response.json().await?;
        Ok(AccessToken::new(body.access_token, status))
    }

    async fn re_enroll(
        &self,
        token: &AccessToken,
        csr: &CertificateSigningRequest,
    ) -> Result<Exchange<Certificate>> {
        let url = self.config.build_url(paths::SIMPLE_REENROLL);
        tracing::debug!("POST {}", url);

        let request = self.http.post(url).bearer_auth(&token.token);
        self.send_csr(request, csr).await
    }

    fn generate_otp(&self) -> Result<OneTimePassword> {
        Ok(generate_otp())
    }
}

/// Generate a one-time password from the operating system RNG.
pub fn generate_otp() -> OneTimePassword {
    let value: String = OsRng
        .sample_iter(&Alphanumeric)
        .take(OTP_LENGTH)
        .map(char::from)
        .collect();
    OneTimePassword::new(value)
}

/// Handle error responses from the platform.
async fn handle_error_response(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();

    if status.is_success() {
        return Ok(response);
    }

    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());

    Err(EnrollError::server_error(status.as_u16(), message))
}
