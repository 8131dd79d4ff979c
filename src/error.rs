//! Error types for device enrollment.
//!
//! This module defines all error types that can occur while provisioning or
//! renewing a device identity, including prerequisite failures, cryptographic
//! errors, platform rejections and enrollment budget exhaustion.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using [`EnrollError`].
pub type Result<T> = std::result::Result<T, EnrollError>;

/// Exit code for a successful run.
pub const EXIT_SUCCESS: u8 = 0;

/// Exit code when prerequisites (input, permissions, trust anchor) are not met.
pub const EXIT_PREREQUISITES_NOT_FULFILLED: u8 = 101;

/// Exit code for failures while processing an otherwise valid request.
pub const EXIT_GENERAL_PROCESSING_ERROR: u8 = 11;

/// Exit code when the user interrupted a running command.
pub const EXIT_CANCELLED: u8 = 130;

/// Errors that can occur during enrollment, renewal and verification.
#[derive(Debug, Error)]
pub enum EnrollError {
    /// A precondition for the run is not satisfied (tenant lookup, bad input).
    #[error("Prerequisite not fulfilled: {0}")]
    Prerequisite(String),

    /// The acting user lacks a required role.
    #[error("User does not have the required permission {role}")]
    Permission {
        /// Role that was required.
        role: String,
    },

    /// No CA certificate is configured in the tenant.
    #[error("No CA certificate available in tenant: {0}")]
    MissingTrustAnchor(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Key or CSR generation/parsing failure.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// The built CSR does not carry the device id as common name.
    #[error("Common name of CSR ({actual:?}) does not match device id '{expected}'")]
    CsrSubjectMismatch {
        /// The device id the CSR was built for.
        expected: String,
        /// The common name found in the CSR, if any.
        actual: Option<String>,
    },

    /// Invalid PEM data.
    #[error("Invalid PEM data: {0}")]
    InvalidPem(String),

    /// The platform rejected the bulk registration record.
    #[error("Bulk registration rejected (status {status:?}): {message}")]
    Registration {
        /// HTTP status code, if a response was received.
        status: Option<u16>,
        /// Description of the failure.
        message: String,
    },

    /// Every bounded enrollment attempt failed.
    #[error("Giving up device enrollment request after {attempts} attempts")]
    AttemptsExhausted {
        /// Number of attempts performed.
        attempts: u32,
    },

    /// Polling enrollment did not succeed within the configured ceiling.
    #[error("Enrollment timed out after {}s", elapsed.as_secs())]
    TimedOut {
        /// Time spent polling.
        elapsed: Duration,
    },

    /// The operation was cancelled by the caller.
    #[error("Operation cancelled")]
    Cancelled,

    /// The credential was not accepted when exchanged for an access token.
    #[error("Credential verification failed: {0}")]
    Verification(VerificationFailure),

    /// The re-enrollment request was not answered with a certificate.
    #[error("Re-enrollment failed with status {status}")]
    ReEnrollment {
        /// HTTP status code of the re-enrollment response.
        status: u16,
    },

    /// TLS configuration error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// HTTP request or response error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Platform returned an unexpected status.
    #[error("Server error {status}: {message}")]
    ServerError {
        /// HTTP status code.
        status: u16,
        /// Response body or description.
        message: String,
    },

    /// Failed to parse the certificate response.
    #[error("Certificate parsing error: {0}")]
    CertificateParsing(String),

    /// Base64 decoding error.
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// DER encoding/decoding error.
    #[error("DER error: {0}")]
    Der(#[from] der::Error),

    /// URL parsing error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// A key or certificate file could not be read.
    #[error("Error when reading file {}: {source}", path.display())]
    ReadFile {
        /// The file that was read.
        path: std::path::PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The condition that made a credential verification fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationFailure {
    /// The token exchange did not complete.
    Transport(String),
    /// The exchange completed with a status other than 200.
    Status(u16),
    /// Status was 200 but the token was empty.
    EmptyToken,
}

impl std::fmt::Display for VerificationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(msg) => write!(
                f,
                "error while requesting access token with client certificate: {msg}"
            ),
            Self::Status(status) => write!(
                f,
                "invalid status code received while requesting access token (expected 200, received {status})"
            ),
            Self::EmptyToken => write!(f, "received an access token from platform but it's empty"),
        }
    }
}

impl EnrollError {
    /// Create a prerequisite error with the given message.
    pub fn prerequisite(msg: impl Into<String>) -> Self {
        Self::Prerequisite(msg.into())
    }

    /// Create a permission error for the given role.
    pub fn permission(role: impl Into<String>) -> Self {
        Self::Permission { role: role.into() }
    }

    /// Create a missing trust anchor error.
    pub fn missing_trust_anchor(msg: impl Into<String>) -> Self {
        Self::MissingTrustAnchor(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a cryptographic error.
    pub fn crypto(msg: impl Into<String>) -> Self {
        Self::Crypto(msg.into())
    }

    /// Create an invalid PEM error.
    pub fn invalid_pem(msg: impl Into<String>) -> Self {
        Self::InvalidPem(msg.into())
    }

    /// Create a registration error.
    pub fn registration(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Registration {
            status,
            message: message.into(),
        }
    }

    /// Create a file read error.
    pub fn read_file(path: impl Into<std::path::PathBuf>, source: std::io::Error) -> Self {
        Self::ReadFile {
            path: path.into(),
            source,
        }
    }

    /// Create a TLS error with the given message.
    pub fn tls(msg: impl Into<String>) -> Self {
        Self::Tls(msg.into())
    }

    /// Create a server error with status and message.
    pub fn server_error(status: u16, message: impl Into<String>) -> Self {
        Self::ServerError {
            status,
            message: message.into(),
        }
    }

    /// Create a certificate parsing error.
    pub fn certificate_parsing(msg: impl Into<String>) -> Self {
        Self::CertificateParsing(msg.into())
    }

    /// Returns true if a single enrollment attempt failing with this error
    /// may be retried within the enrollment budget.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Http(_)
                | Self::Tls(_)
                | Self::ServerError { .. }
                | Self::CertificateParsing(_)
                | Self::Base64(_)
                | Self::Der(_)
        )
    }

    /// Returns true if this error means the run could not start.
    pub fn is_prerequisite(&self) -> bool {
        matches!(
            self,
            Self::Prerequisite(_)
                | Self::Permission { .. }
                | Self::MissingTrustAnchor(_)
                | Self::Config(_)
        )
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        if self.is_prerequisite() {
            EXIT_PREREQUISITES_NOT_FULFILLED
        } else if matches!(self, Self::Cancelled) {
            EXIT_CANCELLED
        } else {
            EXIT_GENERAL_PROCESSING_ERROR
        }
    }
}
