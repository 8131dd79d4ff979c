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

//! Enrollment of a device certificate with a one-time password.
//!
//! Two retry disciplines share one single-attempt exchange:
//!
//! - **Bounded**: a fixed number of attempts separated by a fixed delay,
//!   used right after a bootstrap registration.
//! - **Polling**: keep asking at a fixed interval until a certificate is
//!   issued or an overall deadline passes, used when an operator approves
//!   the device out of band.
//!
//! # Example
//!
//! ```no_run
//! use c8y_device_enroll::enrollment::{EnrollmentDriver, EnrollmentRequest, RetryPolicy};
//! use c8y_device_enroll::{build_csr, DeviceKey, OneTimePassword, PlatformClient, PlatformConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PlatformConfig::builder()
//!     .base_url("https://example.cumulocity.com")?
//!     .build()?;
//! let client = PlatformClient::new(config).await?;
//!
//! let key = DeviceKey::generate()?;
//! let request = EnrollmentRequest::new(
//!     "kobu-edge-01",
//!     OneTimePassword::new("AbC123"),
//!     build_csr("kobu-edge-01", &key)?,
//! );
//!
//! let certificate = EnrollmentDriver::new(&client, RetryPolicy::polling())
//!     .enroll(&request)
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout_at, Instant};
use x509_cert::Certificate;

use crate::csr::CertificateSigningRequest;
use crate::error::{EnrollError, Result};
use crate::platform::Platform;
use crate::types::OneTimePassword;

/// Default number of attempts in bounded mode.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default delay between attempts in bounded mode.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Default wait before the first polling attempt.
pub const DEFAULT_POLL_INITIAL_DELAY: Duration = Duration::from_secs(2);

/// Default interval between polling attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default overall polling deadline.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// How failed enrollment attempts are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// At most `max_attempts` attempts, `delay` apart.
    Bounded {
        /// Total number of attempts, including the first.
        max_attempts: u32,
        /// Fixed wait between attempts.
        delay: Duration,
    },

    /// Attempts every `interval` until `timeout` has passed.
    Polling {
        /// Wait before the first attempt.
        initial_delay: Duration,
        /// Fixed wait between attempts.
        interval: Duration,
        /// Hard ceiling measured from the start of the first attempt.
        timeout: Duration,
    },
}

impl RetryPolicy {
    /// Bounded policy with default settings (5 attempts, 3s apart).
    pub fn bounded() -> Self {
        Self::Bounded {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Polling policy with default settings (2s, then every 5s, for 10 minutes).
    pub fn polling() -> Self {
        Self::Polling {
            initial_delay: DEFAULT_POLL_INITIAL_DELAY,
            interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    /// Check the policy for settings that can never succeed.
    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::Bounded { max_attempts, .. } if max_attempts == 0 => {
                Err(EnrollError::config("max_attempts must be at least 1"))
            }
            Self::Polling { interval, .. } if interval.is_zero() => {
                Err(EnrollError::config("poll interval must be greater than zero"))
            }
            Self::Polling {
                interval, timeout, ..
            } if timeout < interval => Err(EnrollError::config(
                "poll timeout must not be shorter than the poll interval",
            )),
            _ => Ok(()),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::bounded()
    }
}

/// States of a single enrollment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentState {
    /// Not started.
    Idle,
    /// An attempt is in flight.
    Requesting {
        /// Attempt number (1-based).
        attempt: u32,
    },
    /// A certificate was issued.
    Succeeded,
    /// The last attempt failed and another one will follow.
    Retrying {
        /// Attempt number that failed.
        attempt: u32,
    },
    /// The polling deadline passed.
    TimedOut,
    /// The run ended without a certificate.
    Failed,
}

impl std::fmt::Display for EnrollmentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Requesting { attempt } => write!(f, "requesting (attempt {attempt})"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Retrying { attempt } => write!(f, "retrying after attempt {attempt}"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Result of one enrollment attempt.
#[derive(Debug)]
pub enum EnrollmentOutcome {
    /// The platform issued a certificate.
    Success(Box<Certificate>),
    /// No certificate yet; the attempt may be repeated.
    Pending {
        /// Status code of the answer, if one was received.
        status: Option<u16>,
    },
    /// The attempt failed in a way retrying cannot fix.
    Failed(EnrollError),
}

/// Receives progress notifications during enrollment.
///
/// Observers cannot influence the run.
pub trait EnrollmentObserver: Send + Sync {
    /// An attempt is about to be sent.
    fn on_attempt_start(&self, _attempt: u32) {}

    /// An attempt ended without a certificate.
    fn on_attempt_failed(&self, _attempt: u32, _status: Option<u16>) {}

    /// The device is waiting for an operator to register it; `banner`
    /// holds the external id, password and registration link.
    fn on_registration_pending(&self, _banner: &str) {}
}

/// Observer that ignores all notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl EnrollmentObserver for NoopObserver {}

/// Observer that logs attempts through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl EnrollmentObserver for TracingObserver {
    fn on_attempt_start(&self, attempt: u32) {
        tracing::info!("Sending device enrollment request (attempt {})", attempt);
    }

    fn on_attempt_failed(&self, attempt: u32, status: Option<u16>) {
        match status {
            Some(status) => tracing::warn!(
                "Device enrollment attempt {} failed with status code {}",
                attempt,
                status
            ),
            None => tracing::warn!("Device enrollment attempt {} failed", attempt),
        }
    }

    fn on_registration_pending(&self, banner: &str) {
        eprintln!("{}", banner);
    }
}

/// Observer that prints a progress line to stderr for every attempt.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleProgress;

impl EnrollmentObserver for ConsoleProgress {
    fn on_attempt_start(&self, _attempt: u32) {
        eprint!("\rTrying to download certificate: ");
    }

    fn on_attempt_failed(&self, _attempt: u32, status: Option<u16>) {
        let status = status.map_or_else(|| "none".to_string(), |s| s.to_string());
        let now = time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default();
        eprintln!("WAITING (last statusCode={}, time={})", status, now);
    }

    fn on_registration_pending(&self, banner: &str) {
        eprintln!("{}", banner);
    }
}

/// Everything a single enrollment exchange sends.
#[derive(Debug, Clone)]
pub struct EnrollmentRequest {
    /// External id of the device.
    pub device_id: String,

    /// Bootstrap password for the device id.
    pub otp: OneTimePassword,

    /// Request for the device certificate.
    pub csr: CertificateSigningRequest,
}

impl EnrollmentRequest {
    /// Create a new enrollment request.
    pub fn new(
        device_id: impl Into<String>,
        otp: OneTimePassword,
        csr: CertificateSigningRequest,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            otp,
            csr,
        }
    }
}

/// Drives enrollment attempts under a [`RetryPolicy`].
pub struct EnrollmentDriver<'a, P: Platform + ?Sized> {
    platform: &'a P,
    policy: RetryPolicy,
    observer: Arc<dyn EnrollmentObserver>,
}

impl<'a, P: Platform + ?Sized> EnrollmentDriver<'a, P> {
    /// Create a driver with a tracing observer.
    pub fn new(platform: &'a P, policy: RetryPolicy) -> Self {
        Self {
            platform,
            policy,
            observer: Arc::new(TracingObserver),
        }
    }

    /// Replace the progress observer.
    pub fn with_observer(mut self, observer: Arc<dyn EnrollmentObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// The retry policy in use.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run enrollment to completion.
    pub async fn enroll(&self, request: &EnrollmentRequest) -> Result<Certificate> {
        self.enroll_until(request, std::future::pending()).await
    }

    /// Run enrollment until it completes or `cancel` resolves.
    ///
    /// Cancellation returns [`EnrollError::Cancelled`]. In-flight requests
    /// and pending waits are dropped.
    pub async fn enroll_until<F>(&self, request: &EnrollmentRequest, cancel: F) -> Result<Certificate>
    where
        F: Future<Output = ()>,
    {
        self.policy.validate()?;
        self.transition(EnrollmentState::Idle);

        tokio::select! {
            result = self.run(request) => result,
            _ = cancel => {
                tracing::info!("Device enrollment cancelled");
                Err(EnrollError::Cancelled)
            }
        }
    }

    async fn run(&self, request: &EnrollmentRequest) -> Result<Certificate> {
        match self.policy {
            RetryPolicy::Bounded {
                max_attempts,
                delay,
            } => self.run_bounded(request, max_attempts, delay).await,
            RetryPolicy::Polling {
                initial_delay,
                interval,
                timeout,
            } => {
                self.run_polling(request, initial_delay, interval, timeout)
                    .await
            }
        }
    }

    async fn run_bounded(
        &self,
        request: &EnrollmentRequest,
        max_attempts: u32,
        delay: Duration,
    ) -> Result<Certificate> {
        for attempt in 1..=max_attempts {
            match self.attempt(attempt, request).await {
                EnrollmentOutcome::Success(certificate) => {
                    self.transition(EnrollmentState::Succeeded);
                    return Ok(*certificate);
                }
                EnrollmentOutcome::Failed(e) => {
                    self.transition(EnrollmentState::Failed);
                    return Err(e);
                }
                EnrollmentOutcome::Pending { status } => {
                    self.observer.on_attempt_failed(attempt, status);
                    if attempt == max_attempts {
                        break;
                    }
                    self.transition(EnrollmentState::Retrying { attempt });
                    sleep(delay).await;
                }
            }
        }

        self.transition(EnrollmentState::Failed);
        tracing::error!(
            "Giving up device enrollment request after {} attempts",
            max_attempts
        );
        Err(EnrollError::AttemptsExhausted {
            attempts: max_attempts,
        })
    }

    async fn run_polling(
        &self,
        request: &EnrollmentRequest,
        initial_delay: Duration,
        interval: Duration,
        timeout: Duration,
    ) -> Result<Certificate> {
        sleep(initial_delay).await;

        let start = Instant::now();
        let poll = async {
            let mut attempt = 0;
            loop {
                attempt += 1;
                match self.attempt(attempt, request).await {
                    EnrollmentOutcome::Success(certificate) => return Ok(*certificate),
                    EnrollmentOutcome::Failed(e) => return Err(e),
                    EnrollmentOutcome::Pending { status } => {
                        self.observer.on_attempt_failed(attempt, status);
                        self.transition(EnrollmentState::Retrying { attempt });
                        sleep(interval).await;
                    }
                }
            }
        };

        match timeout_at(start + timeout, poll).await {
            Ok(Ok(certificate)) => {
                self.transition(EnrollmentState::Succeeded);
                Ok(certificate)
            }
            Ok(Err(e)) => {
                self.transition(EnrollmentState::Failed);
                Err(e)
            }
            Err(_) => {
                self.transition(EnrollmentState::TimedOut);
                Err(EnrollError::TimedOut {
                    elapsed: start.elapsed(),
                })
            }
        }
    }

    /// Perform one exchange and classify its result.
    async fn attempt(&self, attempt: u32, request: &EnrollmentRequest) -> EnrollmentOutcome {
        self.observer.on_attempt_start(attempt);
        self.transition(EnrollmentState::Requesting { attempt });

        let result = self
            .platform
            .request_enrollment_certificate(&request.device_id, &request.otp, &request.csr)
            .await;

        match result {
            Ok(exchange) => match (exchange.status, exchange.body) {
                (200, Some(certificate)) => EnrollmentOutcome::Success(Box::new(certificate)),
                (status, _) => EnrollmentOutcome::Pending {
                    status: Some(status),
                },
            },
            Err(e) if e.is_retryable() => {
                tracing::debug!("Enrollment attempt {} failed: {}", attempt, e);
                let status = match e {
                    EnrollError::ServerError { status, .. } => Some(status),
                    _ => None,
                };
                EnrollmentOutcome::Pending { status }
            }
            Err(e) => EnrollmentOutcome::Failed(e),
        }
    }

    fn transition(&self, state: EnrollmentState) {
        tracing::debug!("Enrollment state: {}", state);
    }
}
