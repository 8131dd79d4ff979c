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

//! Configuration types for the platform client.
//!
//! This module provides configuration structures for talking to the
//! platform, including base URL, tenant, user credentials and TLS settings.

use std::path::Path;
use std::time::Duration;

use url::Url;

use crate::error::{EnrollError, Result};

/// Configuration for a platform client.
#[derive(Clone)]
pub struct PlatformConfig {
    /// Platform base URL (e.g., "https://example.cumulocity.com").
    pub base_url: Url,

    /// Tenant id, required for user-authenticated requests.
    pub tenant: Option<String>,

    /// User credentials for the password bootstrap path.
    pub http_auth: Option<HttpAuth>,

    /// Trust anchor configuration for server certificate verification.
    pub trust_anchors: TrustAnchors,

    /// Request timeout duration.
    pub timeout: Duration,
}

impl std::fmt::Debug for PlatformConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformConfig")
            .field("base_url", &self.base_url)
            .field("tenant", &self.tenant)
            .field("http_auth", &self.http_auth.is_some())
            .field("trust_anchors", &self.trust_anchors)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl PlatformConfig {
    /// Create a new configuration builder.
    pub fn builder() -> PlatformConfigBuilder {
        PlatformConfigBuilder::new()
    }

    /// Build the URL for a platform resource path.
    pub fn build_url(&self, path: &str) -> Url {
        join_path(&self.base_url, path)
    }

    /// Host name of the platform, used in user-facing messages.
    pub fn host(&self) -> &str {
        self.base_url.host_str().unwrap_or_default()
    }

    /// Username for Basic authentication in the `<tenant>/<user>` form.
    pub fn qualified_username(&self) -> Option<String> {
        let auth = self.http_auth.as_ref()?;
        Some(match self.tenant {
            Some(ref tenant) if !tenant.is_empty() => format!("{}/{}", tenant, auth.username),
            _ => auth.username.clone(),
        })
    }
}

/// Builder for [`PlatformConfig`].
#[derive(Default)]
pub struct PlatformConfigBuilder {
    base_url: Option<Url>,
    tenant: Option<String>,
    http_auth: Option<HttpAuth>,
    trust_anchors: Option<TrustAnchors>,
    timeout: Option<Duration>,
}

impl PlatformConfigBuilder {
    /// Create a new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the platform URL.
    ///
    /// A bare host name is accepted and gets an `https://` scheme.
    pub fn base_url(mut self, url: impl AsRef<str>) -> std::result::Result<Self, url::ParseError> {
        let raw = url.as_ref().trim();
        let url = if raw.contains("://") {
            Url::parse(raw)?
        } else {
            Url::parse(&format!("https://{raw}"))?
        };
        self.base_url = Some(url);
        Ok(self)
    }

    /// Set the tenant id.
    pub fn tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    /// Set user credentials for HTTP Basic authentication.
    pub fn http_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.http_auth = Some(HttpAuth::new(username, password));
        self
    }

    /// Use the built-in WebPKI roots for server verification.
    pub fn trust_webpki_roots(mut self) -> Self {
        self.trust_anchors = Some(TrustAnchors::WebPki);
        self
    }

    /// Use explicit CA certificates (PEM) for server verification.
    pub fn trust_explicit(mut self, ca_certs: Vec<Vec<u8>>) -> Self {
        self.trust_anchors = Some(TrustAnchors::Explicit(ca_certs));
        self
    }

    /// Accept any server certificate (insecure, for testing only).
    pub fn trust_any_insecure(mut self) -> Self {
        self.trust_anchors = Some(TrustAnchors::InsecureAcceptAny);
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is not set.
    pub fn build(self) -> Result<PlatformConfig> {
        let base_url = self
            .base_url
            .ok_or_else(|| EnrollError::config("platform host is required"))?;

        Ok(PlatformConfig {
            base_url,
            tenant: self.tenant,
            http_auth: self.http_auth,
            trust_anchors: self.trust_anchors.unwrap_or(TrustAnchors::WebPki),
            timeout: self.timeout.unwrap_or(Duration::from_secs(30)),
        })
    }
}

/// Certificate and private key used as mutual-TLS client identity.
#[derive(Clone)]
pub struct ClientIdentity {
    /// PEM-encoded certificate, optionally followed by its chain.
    pub cert_pem: Vec<u8>,

    /// PEM-encoded private key.
    pub key_pem: Vec<u8>,
}

impl std::fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("cert_pem", &self.cert_pem.len())
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

impl ClientIdentity {
    /// Create a new client identity from PEM-encoded data.
    pub fn new(cert_pem: impl Into<Vec<u8>>, key_pem: impl Into<Vec<u8>>) -> Self {
        Self {
            cert_pem: cert_pem.into(),
            key_pem: key_pem.into(),
        }
    }

    /// Create a client identity from file paths.
    pub fn from_files(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<Self> {
        let cert_path = cert_path.as_ref();
        let key_path = key_path.as_ref();
        let cert_pem =
            std::fs::read(cert_path).map_err(|e| EnrollError::read_file(cert_path, e))?;
        let key_pem = std::fs::read(key_path).map_err(|e| EnrollError::read_file(key_path, e))?;
        Ok(Self { cert_pem, key_pem })
    }
}

/// HTTP Basic authentication credentials.
#[derive(Clone)]
pub struct HttpAuth {
    /// Platform user name.
    pub username: String,

    /// Password.
    pub password: String,
}

impl HttpAuth {
    /// Create new HTTP auth credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Trust anchor configuration for server certificate verification.
#[derive(Clone)]
pub enum TrustAnchors {
    /// Use the WebPKI root CA store.
    WebPki,

    /// Use explicit CA certificates (PEM-encoded).
    Explicit(Vec<Vec<u8>>),

    /// Accept any server certificate (insecure, for testing only).
    ///
    /// **WARNING**: This disables all server certificate verification.
    InsecureAcceptAny,
}

impl std::fmt::Debug for TrustAnchors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WebPki => write!(f, "WebPki"),
            Self::Explicit(certs) => write!(f, "Explicit({} certs)", certs.len()),
            Self::InsecureAcceptAny => write!(f, "InsecureAcceptAny"),
        }
    }
}

/// Append `path` to the path of `base`, keeping any prefix such as the
/// `/c8y` of `https://proxy.example/c8y`.
pub fn join_path(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    let joined = format!(
        "{}/{}",
        base.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);
    url
}
