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

//! Bootstrap registration of a device id.
//!
//! Before a device can enroll with a one-time password, the platform must
//! expect it. This module builds the bulk registration record announcing
//! the device and submits it.

use crate::error::{EnrollError, Result};
use crate::platform::Platform;
use crate::types::OneTimePassword;

/// Column names of the bulk registration record.
pub const BULK_HEADER: [&str; 7] = [
    "ID",
    "AUTH_TYPE",
    "ENROLLMENT_OTP",
    "NAME",
    "TYPE",
    "IDTYPE",
    "com_cumulocity_model_Agent.active",
];

/// Authentication type marker for certificate-based devices.
pub const AUTH_TYPE_CERTIFICATES: &str = "CERTIFICATES";

/// Identity type under which the device id is registered.
pub const ID_TYPE_SERIAL: &str = "c8y_Serial";

/// Default managed object type of registered devices.
pub const DEFAULT_DEVICE_TYPE: &str = "c8y_Device";

/// Single-device bulk registration record.
#[derive(Clone)]
pub struct BulkRegistrationRecord {
    device_id: String,
    otp: OneTimePassword,
    device_type: String,
}

impl std::fmt::Debug for BulkRegistrationRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkRegistrationRecord")
            .field("device_id", &self.device_id)
            .field("otp", &self.otp)
            .field("device_type", &self.device_type)
            .finish()
    }
}

impl BulkRegistrationRecord {
    /// Create a record announcing `device_id` with the given password.
    pub fn new(
        device_id: impl Into<String>,
        otp: OneTimePassword,
        device_type: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            otp,
            device_type: device_type.into(),
        }
    }

    /// Device id the record announces.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Header row.
    pub fn header(&self) -> Vec<String> {
        BULK_HEADER.iter().map(|s| s.to_string()).collect()
    }

    /// Data row, in header order.
    pub fn row(&self) -> Vec<String> {
        vec![
            self.device_id.clone(),
            AUTH_TYPE_CERTIFICATES.to_string(),
            self.otp.expose().to_string(),
            self.device_id.clone(),
            self.device_type.clone(),
            ID_TYPE_SERIAL.to_string(),
            "true".to_string(),
        ]
    }

    /// Value of the named column, if it exists.
    pub fn field(&self, column: &str) -> Option<String> {
        let index = BULK_HEADER.iter().position(|c| *c == column)?;
        self.row().into_iter().nth(index)
    }

    /// Tab-separated document with one header line and one data line.
    pub fn to_tsv(&self) -> String {
        let mut out = String::new();
        for line in [self.header(), self.row()] {
            let fields: Vec<String> = line.iter().map(|f| quote_field(f)).collect();
            out.push_str(&fields.join("\t"));
            out.push('\n');
        }
        out
    }
}

/// Quote a field that would otherwise break the tab-separated layout.
fn quote_field(field: &str) -> String {
    if field.contains(['\t', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Announces devices to the platform ahead of enrollment.
pub struct BootstrapRegistrar<'a, P: Platform + ?Sized> {
    platform: &'a P,
    device_type: String,
}

impl<'a, P: Platform + ?Sized> BootstrapRegistrar<'a, P> {
    /// Create a registrar using the default device type.
    pub fn new(platform: &'a P) -> Self {
        Self {
            platform,
            device_type: DEFAULT_DEVICE_TYPE.to_string(),
        }
    }

    /// Set the managed object type of registered devices.
    pub fn device_type(mut self, device_type: impl Into<String>) -> Self {
        self.device_type = device_type.into();
        self
    }

    /// Submit the bulk registration for `device_id`.
    ///
    /// Succeeds only when the platform answers 201. The call is not
    /// retried.
    pub async fn submit_bulk_registration(
        &self,
        device_id: &str,
        otp: &OneTimePassword,
    ) -> Result<()> {
        let record = BulkRegistrationRecord::new(device_id, otp.clone(), self.device_type.clone());

        let status = self
            .platform
            .submit_bulk_credentials(&record)
            .await
            .map_err(|e| EnrollError::registration(None, e.to_string()))?;

        if status != 201 {
            return Err(EnrollError::registration(
                Some(status),
                format!("expected status 201, received {}", status),
            ));
        }

        tracing::info!("Bulk registration submitted for device {}", device_id);
        Ok(())
    }
}
