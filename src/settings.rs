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

//! TOML settings file.
//!
//! All sections are optional; a missing file yields the built-in defaults.
//! Command line flags override values read from the file.
//!
//! ```toml
//! [platform]
//! host = "https://example.cumulocity.com"
//! tenant = "t12345"
//!
//! [enrollment]
//! max_attempts = 5
//! retry_delay_secs = 3
//!
//! [renewal]
//! key_policy = "rotate"
//!
//! [output]
//! directory = "/etc/c8y"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::config::{PlatformConfig, PlatformConfigBuilder};
use crate::enrollment::{self, RetryPolicy};
use crate::error::{EnrollError, Result};
use crate::precheck::DEVICE_CONTROL_ADMIN_ROLE;
use crate::registration::DEFAULT_DEVICE_TYPE;
use crate::renewal::KeyPolicy;
use crate::storage::ArtifactStore;

/// Environment variable naming the settings file.
pub const SETTINGS_ENV_VAR: &str = "C8Y_ENROLL_CONFIG";

/// Settings file looked up in the current directory.
pub const DEFAULT_SETTINGS_FILE: &str = "c8y-enroll.toml";

/// Complete settings file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Platform connection.
    pub platform: PlatformSettings,

    /// Enrollment timing and registration details.
    pub enrollment: EnrollmentSettings,

    /// Renewal behavior.
    pub renewal: RenewalSettings,

    /// Where key and certificate files go.
    pub output: OutputSettings,
}

/// `[platform]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlatformSettings {
    /// Platform URL or host name.
    pub host: Option<String>,

    /// Tenant id.
    pub tenant: Option<String>,

    /// Skip server certificate verification.
    pub insecure: bool,

    /// PEM bundle of CA certificates to trust instead of the WebPKI roots.
    pub ca_bundle: Option<PathBuf>,

    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            host: None,
            tenant: None,
            insecure: false,
            ca_bundle: None,
            timeout_secs: 30,
        }
    }
}

/// `[enrollment]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnrollmentSettings {
    /// Attempts in bounded mode.
    pub max_attempts: u32,

    /// Seconds between bounded attempts.
    pub retry_delay_secs: u64,

    /// Seconds before the first polling attempt.
    pub poll_initial_delay_secs: u64,

    /// Seconds between polling attempts.
    pub poll_interval_secs: u64,

    /// Overall polling deadline in seconds.
    pub poll_timeout_secs: u64,

    /// Managed object type of registered devices.
    pub device_type: String,

    /// Role the user needs for password-based registration.
    pub required_role: String,
}

impl Default for EnrollmentSettings {
    fn default() -> Self {
        Self {
            max_attempts: enrollment::DEFAULT_MAX_ATTEMPTS,
            retry_delay_secs: enrollment::DEFAULT_RETRY_DELAY.as_secs(),
            poll_initial_delay_secs: enrollment::DEFAULT_POLL_INITIAL_DELAY.as_secs(),
            poll_interval_secs: enrollment::DEFAULT_POLL_INTERVAL.as_secs(),
            poll_timeout_secs: enrollment::DEFAULT_POLL_TIMEOUT.as_secs(),
            device_type: DEFAULT_DEVICE_TYPE.to_string(),
            required_role: DEVICE_CONTROL_ADMIN_ROLE.to_string(),
        }
    }
}

impl EnrollmentSettings {
    /// Retry policy for enrollment after a bootstrap registration.
    pub fn bounded_policy(&self) -> RetryPolicy {
        RetryPolicy::Bounded {
            max_attempts: self.max_attempts,
            delay: Duration::from_secs(self.retry_delay_secs),
        }
    }

    /// Retry policy for self-service enrollment.
    pub fn polling_policy(&self) -> RetryPolicy {
        RetryPolicy::Polling {
            initial_delay: Duration::from_secs(self.poll_initial_delay_secs),
            interval: Duration::from_secs(self.poll_interval_secs),
            timeout: Duration::from_secs(self.poll_timeout_secs),
        }
    }
}

/// `[renewal]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenewalSettings {
    /// Whether renewal keeps or replaces the private key.
    pub key_policy: KeyPolicy,
}

/// `[output]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputSettings {
    /// Directory for key and certificate files.
    pub directory: PathBuf,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
        }
    }
}

impl Settings {
    /// Parse settings from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| EnrollError::config(format!("Invalid TOML: {e}")))
    }

    /// Check values that parse but cannot work.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.enrollment.max_attempts == 0 {
            errors.push("enrollment.max_attempts must be at least 1".to_string());
        }
        if self.enrollment.poll_interval_secs == 0 {
            errors.push("enrollment.poll_interval_secs must be greater than zero".to_string());
        }
        if self.enrollment.poll_timeout_secs < self.enrollment.poll_interval_secs {
            errors.push(
                "enrollment.poll_timeout_secs must not be shorter than poll_interval_secs"
                    .to_string(),
            );
        }
        if let Some(ref host) = self.platform.host {
            if PlatformConfigBuilder::new().base_url(host).is_err() {
                errors.push(format!("platform.host is not a valid URL: {host}"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(EnrollError::config(errors.join("; ")))
        }
    }

    /// Store for output files.
    pub fn artifact_store(&self) -> ArtifactStore {
        ArtifactStore::new(&self.output.directory)
    }

    /// Start a platform configuration from these settings.
    ///
    /// `host` and `tenant` override the file values when given.
    pub fn platform_config(
        &self,
        host: Option<&str>,
        tenant: Option<&str>,
    ) -> Result<PlatformConfigBuilder> {
        let host = host
            .or(self.platform.host.as_deref())
            .ok_or_else(|| EnrollError::config("platform host is required"))?;

        let mut builder = PlatformConfig::builder()
            .base_url(host)?
            .timeout(Duration::from_secs(self.platform.timeout_secs));

        if let Some(tenant) = tenant.or(self.platform.tenant.as_deref()) {
            builder = builder.tenant(tenant);
        }

        builder = if self.platform.insecure {
            builder.trust_any_insecure()
        } else if let Some(ref bundle) = self.platform.ca_bundle {
            let pem = std::fs::read(bundle).map_err(|e| {
                EnrollError::config(format!("Failed to read {}: {e}", bundle.display()))
            })?;
            builder.trust_explicit(vec![pem])
        } else {
            builder.trust_webpki_roots()
        };

        Ok(builder)
    }
}

/// Finds and loads the settings file.
///
/// Lookup order, first match wins:
///
/// 1. Explicit path (if set via `with_path()`); must exist
/// 2. Environment variable `C8Y_ENROLL_CONFIG`; must exist
/// 3. `./c8y-enroll.toml`; defaults are used when it is absent
#[derive(Debug, Clone)]
pub struct SettingsLoader {
    explicit_path: Option<PathBuf>,
    env_var_name: String,
}

impl Default for SettingsLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsLoader {
    /// Create a loader with the default lookup.
    pub fn new() -> Self {
        Self {
            explicit_path: None,
            env_var_name: SETTINGS_ENV_VAR.to_string(),
        }
    }

    /// Use this file and skip discovery.
    pub fn with_path(mut self, path: impl AsRef<Path>) -> Self {
        self.explicit_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the environment variable naming the file.
    pub fn with_env_var(mut self, name: impl Into<String>) -> Self {
        self.env_var_name = name.into();
        self
    }

    /// Locate the settings file, if any.
    pub fn find_settings_file(&self) -> Result<Option<PathBuf>> {
        if let Some(ref path) = self.explicit_path {
            if path.exists() {
                return Ok(Some(path.clone()));
            }
            return Err(EnrollError::config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        if let Ok(env_path) = std::env::var(&self.env_var_name) {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(EnrollError::config(format!(
                "Configuration file from {} not found: {}",
                self.env_var_name, env_path
            )));
        }

        let local = PathBuf::from(DEFAULT_SETTINGS_FILE);
        Ok(local.exists().then_some(local))
    }

    /// Load and validate the settings.
    pub fn load(&self) -> Result<Settings> {
        let settings = match self.find_settings_file()? {
            Some(path) => {
                tracing::debug!("Loading settings from {}", path.display());
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    EnrollError::config(format!("Failed to read {}: {e}", path.display()))
                })?;
                Settings::from_toml(&content)?
            }
            None => Settings::default(),
        };

        settings.validate()?;
        Ok(settings)
    }
}
