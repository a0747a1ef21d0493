// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Path constants and utilities for the credential directory layout.
//!
//! ```text
//! /certs/
//!   cert.pem               # TLS certificate chain (0644)
//!   key.pem                # TLS private key (0600)
//!   .self-signed           # present while the pair is a self-signed fallback
//!   .cloudflare.ini        # DNS challenge credentials, removed after issuance
//!   encryption-key.asc     # armored GPG private key export (0600)
//!   .gnupg/                # GPG home used to generate the key (0700)
//! ```

use std::path::{Path, PathBuf};

use url::Url;

use crate::config::{DEFAULT_CERT_DIR, DEFAULT_ENCRYPTION_KEY_FILE, DEFAULT_LETSENCRYPT_DIR};
use crate::validator::LayoutSettings;

/// Credential path utilities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPaths {
    cert_dir: PathBuf,
    letsencrypt_dir: PathBuf,
    encryption_key: PathBuf,
    gnupg_home: PathBuf,
}

impl Default for CredentialPaths {
    fn default() -> Self {
        Self {
            cert_dir: PathBuf::from(DEFAULT_CERT_DIR),
            letsencrypt_dir: PathBuf::from(DEFAULT_LETSENCRYPT_DIR),
            encryption_key: PathBuf::from(DEFAULT_ENCRYPTION_KEY_FILE),
            gnupg_home: Path::new(DEFAULT_CERT_DIR).join(".gnupg"),
        }
    }
}

impl CredentialPaths {
    /// Create a layout rooted at `cert_dir` (useful for testing).
    ///
    /// The letsencrypt directory, key export and GPG home all live below it.
    pub fn new(cert_dir: impl AsRef<Path>) -> Self {
        let cert_dir = cert_dir.as_ref().to_path_buf();
        Self {
            letsencrypt_dir: cert_dir.join("letsencrypt"),
            encryption_key: cert_dir.join("encryption-key.asc"),
            gnupg_home: cert_dir.join(".gnupg"),
            cert_dir,
        }
    }

    pub fn from_layout(layout: &LayoutSettings) -> Self {
        Self {
            cert_dir: layout.cert_dir.clone(),
            letsencrypt_dir: layout.letsencrypt_dir.clone(),
            encryption_key: resolve_key_path(&layout.encryption_key_file),
            gnupg_home: layout.gnupg_home.clone(),
        }
    }

    pub fn cert_dir(&self) -> &Path {
        &self.cert_dir
    }

    // ========== TLS Pair ==========

    pub fn certificate(&self) -> PathBuf {
        self.cert_dir.join("cert.pem")
    }

    pub fn private_key(&self) -> PathBuf {
        self.cert_dir.join("key.pem")
    }

    /// Marker written next to a self-signed pair.
    pub fn self_signed_marker(&self) -> PathBuf {
        self.cert_dir.join(".self-signed")
    }

    /// DNS provider credentials handed to certbot.
    pub fn dns_credentials(&self) -> PathBuf {
        self.cert_dir.join(".cloudflare.ini")
    }

    // ========== Authority Output ==========

    pub fn letsencrypt_dir(&self) -> &Path {
        &self.letsencrypt_dir
    }

    /// Directory certbot writes the current lineage for `domain` to.
    pub fn live_dir(&self, domain: &str) -> PathBuf {
        self.letsencrypt_dir.join("live").join(domain)
    }

    pub fn live_chain(&self, domain: &str) -> PathBuf {
        self.live_dir(domain).join("fullchain.pem")
    }

    pub fn live_key(&self, domain: &str) -> PathBuf {
        self.live_dir(domain).join("privkey.pem")
    }

    // ========== Encryption Key ==========

    pub fn encryption_key(&self) -> &Path {
        &self.encryption_key
    }

    pub fn gnupg_home(&self) -> &Path {
        &self.gnupg_home
    }
}

/// Resolve a key file setting to a filesystem path.
///
/// `file://` URLs are converted to paths; any other `scheme://` prefix is
/// stripped; plain paths pass through.
pub fn resolve_key_path(raw: &str) -> PathBuf {
    if let Ok(url) = Url::parse(raw) {
        if url.scheme() == "file" {
            if let Ok(path) = url.to_file_path() {
                return path;
            }
        }
    }
    match raw.split_once("://") {
        Some((scheme, rest)) if !scheme.is_empty() && !scheme.contains('/') => {
            PathBuf::from(rest)
        }
        _ => PathBuf::from(raw),
    }
}

/// `file://` URL form of a path, as some node builds expect.
pub fn key_uri(path: &Path) -> String {
    Url::from_file_path(path)
        .map(String::from)
        .unwrap_or_else(|_| format!("file://{}", path.display()))
}
