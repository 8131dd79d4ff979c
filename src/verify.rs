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

//! Verification of a device credential.

use crate::config::ClientIdentity;
use crate::error::{EnrollError, Result, VerificationFailure};
use crate::platform::Platform;
use crate::types::AccessToken;

/// Prove that `identity` is accepted by the platform.
///
/// The certificate and key are first checked locally, then exchanged for
/// an access token. The returned token is always valid: status 200 and a
/// non-empty token string.
pub async fn verify_credential<P>(platform: &P, identity: &ClientIdentity) -> Result<AccessToken>
where
    P: Platform + ?Sized,
{
    crate::tls::check_key_pair(identity)?;

    let token = platform
        .request_access_token(identity)
        .await
        .map_err(|e| EnrollError::Verification(VerificationFailure::Transport(e.to_string())))?;

    classify_token(token)
}

/// Map an access token exchange to the failing condition, if any.
pub fn classify_token(token: AccessToken) -> Result<AccessToken> {
    if token.status != 200 {
        return Err(EnrollError::Verification(VerificationFailure::Status(
            token.status,
        )));
    }
    if token.token.is_empty() {
        return Err(EnrollError::Verification(VerificationFailure::EmptyToken));
    }
    Ok(token)
}
