// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Credential Provisioning
//!
//! Ensures the node finds a usable TLS pair and a GPG key export on disk.
//!
//! ## Idempotence
//!
//! Both halves inspect what is already present first. A valid certificate
//! pair and an existing key export cause no tool invocation and no write.
//!
//! ## Failure Model
//!
//! Authority issuance failing is recoverable (self-signed fallback). The
//! fallback failing, or the key failing to generate/export, aborts startup.
//! Temporary files are removed on every failure path.

pub mod gpg;
pub mod paths;
pub mod secure_fs;
pub mod tls;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::StartupError;
use crate::tools::ToolRunner;
use crate::validator::{CertificateSettings, ResolvedConfig};

pub use gpg::KeySource;
pub use paths::{key_uri, resolve_key_path, CredentialPaths};
pub use tls::{CertificateSource, CertificateStatus};

/// What provisioning did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProvisionReport {
    pub certificate: CertificateSource,
    pub key: KeySource,
}

impl ProvisionReport {
    /// True when nothing on disk was touched.
    pub fn unchanged(&self) -> bool {
        self.certificate == CertificateSource::Existing && self.key == KeySource::Existing
    }
}

/// Provisions the credential bundle for one run.
pub struct CredentialProvisioner<'a, R> {
    runner: &'a R,
    paths: CredentialPaths,
    domain: &'a str,
    certificates: &'a CertificateSettings,
}

impl<'a, R: ToolRunner> CredentialProvisioner<'a, R> {
    pub fn new(runner: &'a R, config: &'a ResolvedConfig) -> Self {
        Self {
            runner,
            paths: CredentialPaths::from_layout(&config.layout),
            domain: &config.site.domain,
            certificates: &config.certificates,
        }
    }

    /// Override the layout (useful for testing).
    pub fn with_paths(mut self, paths: CredentialPaths) -> Self {
        self.paths = paths;
        self
    }

    pub fn paths(&self) -> &CredentialPaths {
        &self.paths
    }

    /// Run both halves in order: certificate, then encryption key.
    ///
    /// # Errors
    /// `CertificateProvisioningFailed` or `KeyProvisioningFailed`.
    pub async fn provision(&self) -> Result<ProvisionReport, StartupError> {
        let certificate = self.ensure_certificate().await?;
        let key = gpg::ensure_key(self.runner, &self.paths)
            .await
            .map_err(StartupError::KeyProvisioningFailed)?;

        let report = ProvisionReport { certificate, key };
        info!(
            certificate = ?report.certificate,
            key = ?report.key,
            unchanged = report.unchanged(),
            "Credentials provisioned"
        );
        Ok(report)
    }

    async fn ensure_certificate(&self) -> Result<CertificateSource, StartupError> {
        match tls::inspect(&self.paths, Utc::now()) {
            CertificateStatus::Valid {
                not_after,
                fingerprint,
            } => {
                info!(
                    expires = %not_after,
                    sha256 = %fingerprint,
                    "TLS certificate valid, skipping issuance"
                );
                return Ok(CertificateSource::Existing);
            }
            CertificateStatus::Missing { path } => {
                info!(path = %path.display(), "TLS credential missing");
            }
            CertificateStatus::Expiring { not_after } => {
                info!(
                    expires = %not_after,
                    window_hours = tls::RENEWAL_WINDOW_HOURS,
                    "TLS certificate expires soon, replacing it"
                );
            }
            CertificateStatus::Unreadable { reason } => {
                warn!(reason = %reason, "TLS credential unusable, replacing it");
            }
        }

        secure_fs::ensure_dir(self.paths.cert_dir(), None).map_err(|e| {
            StartupError::CertificateProvisioningFailed(format!(
                "failed to create {}: {e}",
                self.paths.cert_dir().display()
            ))
        })?;

        match (&self.certificates.authority, self.certificates.generation_enabled) {
            (Some(authority), true) => {
                match tls::issue_with_authority(self.runner, &self.paths, self.domain, authority)
                    .await
                {
                    Ok(()) => {
                        self.log_installed();
                        return Ok(CertificateSource::Authority);
                    }
                    Err(reason) => {
                        warn!(
                            reason = %reason,
                            "Certificate issuance failed, falling back to self-signed"
                        );
                    }
                }
            }
            (None, true) => {
                warn!("Certificate generation enabled but no DNS API token configured");
            }
            (_, false) => {}
        }

        tls::issue_self_signed(self.runner, &self.paths, self.domain)
            .await
            .map_err(StartupError::CertificateProvisioningFailed)?;
        self.log_installed();
        Ok(CertificateSource::SelfSigned)
    }

    fn log_installed(&self) {
        if let CertificateStatus::Valid {
            not_after,
            fingerprint,
        } = tls::inspect(&self.paths, Utc::now())
        {
            info!(expires = %not_after, sha256 = %fingerprint, "TLS certificate installed");
        }
    }
}
