// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Startup errors and their exit codes.
//!
//! Every failure is fatal. Each variant maps to a distinct process exit code
//! so container orchestrators can tell failure classes apart from the exit
//! status alone.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub const EXIT_MISSING_CONFIGURATION: u8 = 10;
pub const EXIT_INVALID_AUTH_CONFIG: u8 = 11;
pub const EXIT_NO_AUTH_METHOD: u8 = 12;
pub const EXIT_CERTIFICATE_PROVISIONING: u8 = 20;
pub const EXIT_KEY_PROVISIONING: u8 = 21;
pub const EXIT_BINARY_NOT_FOUND: u8 = 30;
pub const EXIT_KEY_FILE_MISSING: u8 = 31;
pub const EXIT_LAUNCH_FAILED: u8 = 40;

/// Fatal startup error.
#[derive(Debug, Error)]
pub enum StartupError {
    /// One or more required variables are absent or empty.
    #[error("missing required configuration: {}", .missing.join(", "))]
    MissingConfiguration { missing: Vec<String> },

    /// An enabled auth provider lacks mandatory fields.
    #[error("{provider} is enabled but missing required settings: {}", .fields.join(", "))]
    InvalidAuthConfig {
        provider: String,
        fields: Vec<String>,
    },

    /// No auth provider survived validation.
    #[error("no authentication method is enabled (checked: {})", .checked.join(", "))]
    NoAuthMethodEnabled { checked: Vec<String> },

    /// Neither authority issuance nor the self-signed fallback produced a pair.
    #[error("certificate provisioning failed: {0}")]
    CertificateProvisioningFailed(String),

    /// The GPG key could not be generated or exported.
    #[error("encryption key provisioning failed: {0}")]
    KeyProvisioningFailed(String),

    /// Every discovery strategy came up empty.
    #[error("could not locate `{name}` (tried: {})", .attempted.join("; "))]
    BinaryNotFound { name: String, attempted: Vec<String> },

    /// The key file that provisioning should have guaranteed is not usable.
    #[error("encryption key file {} is missing or unreadable: {reason}", .path.display())]
    KeyFileMissingAtLaunch { path: PathBuf, reason: String },

    /// `exec` itself failed.
    #[error("failed to exec {}: {source}", .program.display())]
    LaunchFailed {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StartupError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            StartupError::MissingConfiguration { .. } => EXIT_MISSING_CONFIGURATION,
            StartupError::InvalidAuthConfig { .. } => EXIT_INVALID_AUTH_CONFIG,
            StartupError::NoAuthMethodEnabled { .. } => EXIT_NO_AUTH_METHOD,
            StartupError::CertificateProvisioningFailed(_) => EXIT_CERTIFICATE_PROVISIONING,
            StartupError::KeyProvisioningFailed(_) => EXIT_KEY_PROVISIONING,
            StartupError::BinaryNotFound { .. } => EXIT_BINARY_NOT_FOUND,
            StartupError::KeyFileMissingAtLaunch { .. } => EXIT_KEY_FILE_MISSING,
            StartupError::LaunchFailed { .. } => EXIT_LAUNCH_FAILED,
        }
    }

    /// Stable machine-readable error code, logged next to the message.
    pub fn error_code(&self) -> &'static str {
        match self {
            StartupError::MissingConfiguration { .. } => "missing_configuration",
            StartupError::InvalidAuthConfig { .. } => "invalid_auth_config",
            StartupError::NoAuthMethodEnabled { .. } => "no_auth_method_enabled",
            StartupError::CertificateProvisioningFailed(_) => "certificate_provisioning_failed",
            StartupError::KeyProvisioningFailed(_) => "key_provisioning_failed",
            StartupError::BinaryNotFound { .. } => "binary_not_found",
            StartupError::KeyFileMissingAtLaunch { .. } => "key_file_missing_at_launch",
            StartupError::LaunchFailed { .. } => "launch_failed",
        }
    }
}
