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

//! Checks that must pass before a password-based registration starts.
//!
//! The acting user must hold the device control admin role and the tenant
//! must have a CA certificate, otherwise the platform cannot sign the
//! device certificate.

use crate::error::{EnrollError, Result};
use crate::platform::Platform;
use crate::types::{Tenant, TrustAnchor};

/// Role needed to register devices in bulk.
pub const DEVICE_CONTROL_ADMIN_ROLE: &str = "ROLE_DEVICE_CONTROL_ADMIN";

/// Runs the user and tenant checks against a [`Platform`].
pub struct AccessPrecheck<'a, P: Platform + ?Sized> {
    platform: &'a P,
}

impl<'a, P: Platform + ?Sized> AccessPrecheck<'a, P> {
    /// Create a new precheck.
    pub fn new(platform: &'a P) -> Self {
        Self { platform }
    }

    /// Resolve the tenant, then check the role and the trust anchor.
    pub async fn run(&self, required_role: &str) -> Result<Tenant> {
        let tenant = self.platform.current_tenant().await.map_err(|e| {
            EnrollError::prerequisite(format!("Failed to get current tenant: {}", e))
        })?;
        tracing::info!("Current tenant: {} ({})", tenant.name, tenant.domain_name);

        self.check_role(required_role).await?;
        self.check_trust_anchor().await?;

        Ok(tenant)
    }

    /// Fail unless the current user holds `required_role`.
    ///
    /// Role names are compared case-insensitively.
    pub async fn check_role(&self, required_role: &str) -> Result<()> {
        let roles = self.platform.current_user_roles().await.map_err(|e| {
            EnrollError::prerequisite(format!("Failed to get current user: {}", e))
        })?;

        if has_role(&roles, required_role) {
            tracing::debug!("User has role {}", required_role);
            Ok(())
        } else {
            Err(EnrollError::permission(required_role))
        }
    }

    /// Fail unless the tenant has a CA certificate.
    pub async fn check_trust_anchor(&self) -> Result<TrustAnchor> {
        match self.platform.ca_trust_anchor().await {
            Ok(anchor) => {
                tracing::debug!("Tenant CA certificate: {}", anchor.fingerprint);
                Ok(anchor)
            }
            Err(e @ EnrollError::MissingTrustAnchor(_)) => Err(e),
            Err(e) => Err(EnrollError::missing_trust_anchor(e.to_string())),
        }
    }
}

/// Case-insensitive role membership.
pub fn has_role(roles: &[String], required_role: &str) -> bool {
    roles.iter().any(|r| r.eq_ignore_ascii_case(required_role))
}
