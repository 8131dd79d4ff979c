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

//! Device Enrollment Command-Line Tool
//!
//! Provisions and renews X.509 device certificates against Cumulocity IoT.
//!
//! # Usage
//!
//! ```text
//! c8y-enroll [OPTIONS] <COMMAND>
//!
//! Commands:
//!   register-with-password  Register a device as a user and enroll it
//!   register-with-poller    Enroll a device that is registered in the UI
//!   renew                   Renew the certificate of an enrolled device
//!   get-access-token        Exchange a certificate for an access token
//!   verify-certificate      Check that a certificate is accepted
//!
//! Options:
//!   -c, --config <PATH>            Path to configuration file
//!       --cumulocity-host <URL>    Platform endpoint
//!   -v, --verbose                  Enable verbose output
//!   -q, --quiet                    Suppress non-error output
//!       --log-level <LEVEL>        Log level (trace..error) [env: C8Y_LOG_LEVEL]
//!       --log-format <FORMAT>      Log format (text, json) [env: C8Y_LOG_FORMAT]
//!   -h, --help                     Print help
//!   -V, --version                  Print version
//! ```
//!
//! # Examples
//!
//! ```bash
//! # Register and enroll a device with user credentials
//! c8y-enroll --cumulocity-host https://iot.eu-latest.cumulocity.com \
//!     register-with-password --cumulocity-tenant-id t4009123 \
//!     --cumulocity-user john.doe@example.org --device-id kobu-edge-01
//!
//! # Renew the certificate, keeping the key
//! c8y-enroll renew --device-id kobu-edge-01 \
//!     --current-certificate c8y-certificate-kobu-edge-01.pem \
//!     --private-key c8y-private-key-kobu-edge-01.pem
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::error::ErrorKind;
use clap::{Parser, Subcommand};

use c8y_device_enroll::enrollment::ConsoleProgress;
use c8y_device_enroll::error::{EXIT_PREREQUISITES_NOT_FULFILLED, EXIT_SUCCESS};
use c8y_device_enroll::logging::{self, obfuscate, LogFormat, LogLevel};
use c8y_device_enroll::settings::{Settings, SettingsLoader};
use c8y_device_enroll::workflow::{
    self, CredentialFiles, PasswordRegistrationOptions, PollerRegistrationOptions, RenewalOptions,
};
use c8y_device_enroll::{
    EnrollError, KeyPolicy, OneTimePassword, PlatformClient, PlatformConfig, Result,
};

/// Exit code of a failed verification.
const EXIT_VERIFICATION_NOT_OK: u8 = 1;

/// Device Enrollment Command-Line Tool
#[derive(Parser)]
#[command(name = "c8y-enroll")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "X.509 device certificate enrollment for Cumulocity IoT", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Platform endpoint, e.g. 'https://iot.eu-latest.cumulocity.com'
    #[arg(long = "cumulocity-host", global = true, env = "C8Y_HOST", value_name = "URL")]
    host: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log level: trace, debug, info, warn or error
    #[arg(long, global = true, env = "C8Y_LOG_LEVEL", value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Log output format: text or json
    #[arg(long, global = true, env = "C8Y_LOG_FORMAT", value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a device with user credentials and enroll it
    RegisterWithPassword {
        /// Platform tenant id, e.g. 't4009123'
        #[arg(long = "cumulocity-tenant-id", env = "C8Y_TENANT", value_name = "TENANT")]
        tenant: Option<String>,

        /// Platform user, e.g. 'john.doe@example.org'
        #[arg(long = "cumulocity-user", env = "C8Y_USER", value_name = "USER")]
        user: String,

        /// Password of the platform user
        #[arg(
            long = "cumulocity-password",
            env = "C8Y_PASSWORD",
            value_name = "PASSWORD",
            hide_env_values = true
        )]
        password: String,

        /// Identifier of the device, e.g. 'kobu-edge-01'; must be unique
        #[arg(long, env = "C8Y_DEVICE_ID", value_name = "ID")]
        device_id: String,
    },

    /// Enroll a device that an operator registers in the platform UI
    RegisterWithPoller {
        /// Identifier of the device, e.g. 'kobu-edge-01'; must be unique
        #[arg(long, env = "C8Y_DEVICE_ID", value_name = "ID")]
        device_id: String,

        /// One-time password; generated when missing
        #[arg(long, value_name = "OTP")]
        one_time_password: Option<String>,
    },

    /// Renew the certificate of an enrolled device
    Renew {
        /// Identifier of the device the certificate belongs to
        #[arg(long, env = "C8Y_DEVICE_ID", value_name = "ID")]
        device_id: String,

        /// Current certificate (PEM)
        #[arg(long, value_name = "PATH")]
        current_certificate: PathBuf,

        /// Private key of the current certificate (PEM)
        #[arg(long, value_name = "PATH")]
        private_key: PathBuf,

        /// Generate a new key pair instead of reusing the current one
        #[arg(long)]
        rotate_key: bool,
    },

    /// Exchange a certificate and key for an access token
    GetAccessToken {
        /// Certificate (PEM)
        #[arg(long, value_name = "PATH")]
        certificate: PathBuf,

        /// Private key (PEM)
        #[arg(long, value_name = "PATH")]
        private_key: PathBuf,
    },

    /// Check that a certificate and key are accepted by the platform
    VerifyCertificate {
        /// Certificate (PEM)
        #[arg(long, value_name = "PATH")]
        certificate: PathBuf,

        /// Private key (PEM)
        #[arg(long, value_name = "PATH")]
        private_key: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => EXIT_SUCCESS,
                _ => EXIT_PREREQUISITES_NOT_FULFILLED,
            };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    logging::init(cli.log_level.with_flags(cli.verbose, cli.quiet), cli.log_format);

    // Create runtime for async operations
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {}", e);
            return ExitCode::from(c8y_device_enroll::error::EXIT_GENERAL_PROCESSING_ERROR);
        }
    };

    let code = runtime.block_on(run_command(cli));
    ExitCode::from(code)
}

async fn run_command(cli: Cli) -> u8 {
    let settings = {
        let mut loader = SettingsLoader::new();
        if let Some(ref path) = cli.config {
            loader = loader.with_path(path);
        }
        match loader.load() {
            Ok(settings) => settings,
            Err(e) => return report_error(&e),
        }
    };

    let result = match &cli.command {
        Commands::RegisterWithPassword {
            tenant,
            user,
            password,
            device_id,
        } => {
            cmd_register_with_password(&cli, &settings, tenant.as_deref(), user, password, device_id)
                .await
        }
        Commands::RegisterWithPoller {
            device_id,
            one_time_password,
        } => cmd_register_with_poller(&cli, &settings, device_id, one_time_password.clone()).await,
        Commands::Renew {
            device_id,
            current_certificate,
            private_key,
            rotate_key,
        } => {
            let credentials = CredentialFiles::new(current_certificate, private_key);
            cmd_renew(&cli, &settings, device_id, credentials, *rotate_key).await
        }
        Commands::GetAccessToken {
            certificate,
            private_key,
        } => cmd_get_access_token(&cli, &settings, CredentialFiles::new(certificate, private_key)).await,
        Commands::VerifyCertificate {
            certificate,
            private_key,
        } => {
            let credentials = CredentialFiles::new(certificate, private_key);
            return cmd_verify_certificate(&cli, &settings, credentials).await;
        }
    };

    match result {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => report_error(&e),
    }
}

fn report_error(e: &EnrollError) -> u8 {
    tracing::error!("{}", e);
    e.exit_code()
}

/// Resolves when the user presses Ctrl-C.
async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        // Without a signal handler the run can only end on its own.
        std::future::pending::<()>().await;
    }
}

fn platform_config(
    cli: &Cli,
    settings: &Settings,
    tenant: Option<&str>,
    credentials: Option<(&str, &str)>,
) -> Result<PlatformConfig> {
    let mut builder = settings.platform_config(cli.host.as_deref(), tenant)?;
    if let Some((user, password)) = credentials {
        builder = builder.http_auth(user, password);
    }
    builder.build()
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_register_with_password(
    cli: &Cli,
    settings: &Settings,
    tenant: Option<&str>,
    user: &str,
    password: &str,
    device_id: &str,
) -> Result<()> {
    tracing::info!(
        "Started register-with-password with arguments: C8yHost={} C8yTenantId={} C8yUser={} C8yPassword={} DeviceId={}",
        cli.host.as_deref().unwrap_or_default(),
        tenant.unwrap_or_default(),
        user,
        obfuscate(password),
        device_id
    );

    if device_id.is_empty() {
        return Err(EnrollError::prerequisite("Missing input for device-id argument"));
    }
    if tenant.or(settings.platform.tenant.as_deref()).is_none() {
        return Err(EnrollError::prerequisite(
            "Missing input for cumulocity-tenant-id argument",
        ));
    }

    let config = platform_config(cli, settings, tenant, Some((user, password)))?;
    let client = PlatformClient::new(config).await?;

    let options = PasswordRegistrationOptions {
        device_id: device_id.to_string(),
        required_role: settings.enrollment.required_role.clone(),
        device_type: settings.enrollment.device_type.clone(),
        policy: settings.enrollment.bounded_policy(),
        store: settings.artifact_store(),
    };

    workflow::register_with_password(&client, &options, ctrl_c()).await?;
    Ok(())
}

async fn cmd_register_with_poller(
    cli: &Cli,
    settings: &Settings,
    device_id: &str,
    one_time_password: Option<String>,
) -> Result<()> {
    tracing::info!(
        "Started register-with-poller with arguments: C8yHost={} DeviceId={}",
        cli.host.as_deref().unwrap_or_default(),
        device_id
    );

    if device_id.is_empty() {
        return Err(EnrollError::prerequisite("Missing input for device-id argument"));
    }

    let config = platform_config(cli, settings, None, None)?;
    let platform_url = config.base_url.clone();
    let client = PlatformClient::new(config).await?;

    let options = PollerRegistrationOptions {
        device_id: device_id.to_string(),
        otp: one_time_password.map(OneTimePassword::new),
        platform_url,
        policy: settings.enrollment.polling_policy(),
        observer: Arc::new(ConsoleProgress),
        store: settings.artifact_store(),
    };

    workflow::register_with_poller(&client, &options, ctrl_c()).await?;
    Ok(())
}

async fn cmd_renew(
    cli: &Cli,
    settings: &Settings,
    device_id: &str,
    credentials: CredentialFiles,
    rotate_key: bool,
) -> Result<()> {
    tracing::info!(
        "Started renew with arguments: C8yHost={} DeviceId={} CertFile={} PrivKeyFile={}",
        cli.host.as_deref().unwrap_or_default(),
        device_id,
        credentials.certificate.display(),
        credentials.private_key.display()
    );

    let config = platform_config(cli, settings, None, None)?;
    let client = PlatformClient::new(config).await?;

    let key_policy = if rotate_key {
        KeyPolicy::Rotate
    } else {
        settings.renewal.key_policy
    };

    let options = RenewalOptions {
        device_id: device_id.to_string(),
        credentials,
        key_policy,
        store: settings.artifact_store(),
    };

    workflow::renew_certificate(&client, &options).await?;
    Ok(())
}

async fn cmd_get_access_token(
    cli: &Cli,
    settings: &Settings,
    credentials: CredentialFiles,
) -> Result<()> {
    tracing::info!(
        "Started get-access-token with arguments: C8yHost={} CertFile={} PrivKeyFile={}",
        cli.host.as_deref().unwrap_or_default(),
        credentials.certificate.display(),
        credentials.private_key.display()
    );

    let config = platform_config(cli, settings, None, None)?;
    let host = config.host().to_string();
    let client = PlatformClient::new(config).await?;

    let token = workflow::get_access_token(&client, &credentials).await?;
    println!("Access Token obtained from {}:\n{}", host, token.token);
    Ok(())
}

async fn cmd_verify_certificate(cli: &Cli, settings: &Settings, credentials: CredentialFiles) -> u8 {
    tracing::info!(
        "Started verify-certificate with arguments: C8yHost={} CertFile={} PrivKeyFile={}",
        cli.host.as_deref().unwrap_or_default(),
        credentials.certificate.display(),
        credentials.private_key.display()
    );

    match verify(cli, settings, &credentials).await {
        Ok(()) => {
            println!("Verification result: OK");
            EXIT_SUCCESS
        }
        Err(e) => {
            println!("Verification result: NOT_OK");
            println!("Reason: {}", e);
            EXIT_VERIFICATION_NOT_OK
        }
    }
}

async fn verify(cli: &Cli, settings: &Settings, credentials: &CredentialFiles) -> Result<()> {
    let config = platform_config(cli, settings, None, None)?;
    let client = PlatformClient::new(config).await?;
    workflow::verify_certificate(&client, credentials).await
}
