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

//! Persistence of keys and certificates as PEM files.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::types::DeviceIdentity;

/// Suffix appended to the device id for renewed artifacts.
pub const RENEWED_SUFFIX: &str = ".new";

/// File name of the private key of `device_id`.
pub fn private_key_file_name(device_id: &str) -> String {
    format!("c8y-private-key-{}.pem", device_id)
}

/// File name of the certificate of `device_id`.
pub fn certificate_file_name(device_id: &str) -> String {
    format!("c8y-certificate-{}.pem", device_id)
}

/// Directory where key and certificate files are read and written.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl Default for ArtifactStore {
    fn default() -> Self {
        Self::new(".")
    }
}

impl ArtifactStore {
    /// Create a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory of this store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the private key file for `device_id`.
    pub fn key_path(&self, device_id: &str) -> PathBuf {
        self.dir.join(private_key_file_name(device_id))
    }

    /// Path of the certificate file for `device_id`.
    pub fn certificate_path(&self, device_id: &str) -> PathBuf {
        self.dir.join(certificate_file_name(device_id))
    }

    /// Write a key and its certificate. Returns the two paths written.
    pub async fn write_identity(
        &self,
        device_id: &str,
        key_pem: &str,
        certificate_pem: &str,
    ) -> Result<(PathBuf, PathBuf)> {
        let key_path = self.write_key(device_id, key_pem).await?;
        match self.write_certificate(device_id, certificate_pem).await {
            Ok(cert_path) => Ok((key_path, cert_path)),
            Err(e) => {
                // A key without its certificate is never left behind.
                if let Err(remove) = tokio::fs::remove_file(&key_path).await {
                    tracing::warn!("Failed to remove {}: {}", key_path.display(), remove);
                }
                Err(e)
            }
        }
    }

    /// Write the key and certificate of an enrolled identity under `device_id`.
    pub async fn write_device_identity(
        &self,
        device_id: &str,
        identity: &DeviceIdentity,
    ) -> Result<(PathBuf, PathBuf)> {
        let certificate_pem = identity.certificate_pem()?;
        self.write_identity(device_id, &identity.key.to_pem(), &certificate_pem)
            .await
    }

    /// Write a certificate file.
    pub async fn write_certificate(&self, device_id: &str, certificate_pem: &str) -> Result<PathBuf> {
        let path = self.certificate_path(device_id);
        tokio::fs::write(&path, certificate_pem).await?;
        tracing::debug!("Wrote {}", path.display());
        Ok(path)
    }

    /// Write a private key file, readable by the owner only on Unix.
    pub async fn write_key(&self, device_id: &str, key_pem: &str) -> Result<PathBuf> {
        let path = self.key_path(device_id);
        tokio::fs::write(&path, key_pem).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).await?;
        }

        tracing::debug!("Wrote {}", path.display());
        Ok(path)
    }
}
