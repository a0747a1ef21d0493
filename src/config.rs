// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names and default values used
//! throughout the launcher. The environment is captured exactly once at
//! startup into an [`EnvSnapshot`]; every later stage reads from that
//! snapshot rather than from the live process environment.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DOMAIN` | Domain the node is served on | Required |
//! | `PUBLIC_IP` | Public address of the host | Required |
//! | `ACCOUNT_ID` | Operator account identifier | Required |
//! | `ADVERTISED_API_URL` | Advertised API URL | Required |
//! | `ADVERTISED_APP_URL` | Advertised web app URL | Required |
//! | `ADVERTISED_GATEWAY_URL` | Advertised gateway URL | Required |
//! | `INITIAL_USERS` | Comma-separated initial users | Required |
//! | `CERT_GENERATION_ENABLED` | Request a certificate from the authority | `false` |
//! | `CLOUDFLARE_API_TOKEN` | DNS challenge API token | Optional |
//! | `CLOUDFLARE_ZONE_ID` | DNS zone identifier | Optional |
//! | `ACME_EMAIL` | Contact email for the authority | Optional |
//! | `ACME_STAGING` | Use the staging endpoint | `false` |
//! | `CERT_DIR` | Certificate directory | `/certs` |
//! | `LETSENCRYPT_DIR` | certbot configuration directory | `/etc/letsencrypt` |
//! | `ENCRYPTION_KEY_FILE` | Armored GPG key export (`file://` allowed) | `/certs/encryption-key.asc` |
//! | `GNUPGHOME` | GPG home used for key generation | `<CERT_DIR>/.gnupg` |
//! | `STORAGE_PATH` | Storage path handed to the node | `/data` |
//! | `NODE_BINARY_NAME` | Executable name to locate | `relational-node` |
//! | `NODE_BINARY_PATH` | Explicit executable override | Optional |
//! | `TOOL_TIMEOUT_SECS` | Bound on each external tool call | `300` |
//! | `LOG_FORMAT` | Logging format (`json` or `text`) | `text` |
//! | `RUST_LOG` | Log level filter | `info` |
//!
//! Auth provider variables are declared in [`crate::validator::auth`].

use std::collections::BTreeMap;
use std::ffi::OsString;

// ========== Site Identity (required) ==========

pub const DOMAIN_ENV: &str = "DOMAIN";
pub const PUBLIC_IP_ENV: &str = "PUBLIC_IP";
pub const ACCOUNT_ID_ENV: &str = "ACCOUNT_ID";
pub const ADVERTISED_API_URL_ENV: &str = "ADVERTISED_API_URL";
pub const ADVERTISED_APP_URL_ENV: &str = "ADVERTISED_APP_URL";
pub const ADVERTISED_GATEWAY_URL_ENV: &str = "ADVERTISED_GATEWAY_URL";
pub const INITIAL_USERS_ENV: &str = "INITIAL_USERS";

/// Keys that must be present and non-empty, in reporting order.
pub const REQUIRED_ENV: [&str; 7] = [
    DOMAIN_ENV,
    PUBLIC_IP_ENV,
    ACCOUNT_ID_ENV,
    ADVERTISED_API_URL_ENV,
    ADVERTISED_APP_URL_ENV,
    ADVERTISED_GATEWAY_URL_ENV,
    INITIAL_USERS_ENV,
];

// ========== Certificate Issuance ==========

pub const CERT_GENERATION_ENV: &str = "CERT_GENERATION_ENABLED";
pub const CLOUDFLARE_API_TOKEN_ENV: &str = "CLOUDFLARE_API_TOKEN";
pub const CLOUDFLARE_ZONE_ID_ENV: &str = "CLOUDFLARE_ZONE_ID";
pub const ACME_EMAIL_ENV: &str = "ACME_EMAIL";
pub const ACME_STAGING_ENV: &str = "ACME_STAGING";

// ========== Filesystem Layout ==========

pub const CERT_DIR_ENV: &str = "CERT_DIR";
pub const DEFAULT_CERT_DIR: &str = "/certs";

pub const LETSENCRYPT_DIR_ENV: &str = "LETSENCRYPT_DIR";
pub const DEFAULT_LETSENCRYPT_DIR: &str = "/etc/letsencrypt";

pub const ENCRYPTION_KEY_FILE_ENV: &str = "ENCRYPTION_KEY_FILE";
pub const DEFAULT_ENCRYPTION_KEY_FILE: &str = "/certs/encryption-key.asc";

pub const GNUPG_HOME_ENV: &str = "GNUPGHOME";

pub const STORAGE_PATH_ENV: &str = "STORAGE_PATH";
pub const DEFAULT_STORAGE_PATH: &str = "/data";

// ========== Binary Discovery ==========

pub const BINARY_NAME_ENV: &str = "NODE_BINARY_NAME";
pub const DEFAULT_BINARY_NAME: &str = "relational-node";

/// Explicit executable override, consulted by the last discovery strategy.
pub const BINARY_PATH_ENV: &str = "NODE_BINARY_PATH";

pub const PATH_ENV: &str = "PATH";

// ========== Runtime ==========

pub const TOOL_TIMEOUT_ENV: &str = "TOOL_TIMEOUT_SECS";
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 300;

pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Prefix of the variable names the node binary itself reads.
pub const NODE_ENV_PREFIX: &str = "NODE_";

/// Values accepted as `true` for boolean toggles (case-insensitive).
const TRUTHY_VALUES: [&str; 5] = ["true", "1", "yes", "on", "enabled"];

/// Substrings marking a value as template text rather than a real credential.
const PLACEHOLDER_PATTERNS: [&str; 8] = [
    "your-",
    "your_",
    "example",
    "placeholder",
    "change-me",
    "changeme",
    "replace",
    "xxx",
];

/// Immutable copy of the process environment.
///
/// Values are trimmed and empty values are treated as absent.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    vars: BTreeMap<String, String>,
}

impl EnvSnapshot {
    /// Capture the current process environment.
    ///
    /// Variables whose name or value is not valid UTF-8 are skipped.
    pub fn capture() -> Self {
        Self::from_pairs(std::env::vars_os().filter_map(|(k, v)| {
            Some((k.into_string().ok()?, v.into_string().ok()?))
        }))
    }

    /// Build a snapshot from explicit pairs (useful for testing).
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars = pairs
            .into_iter()
            .filter_map(|(k, v)| {
                let value = v.into().trim().to_string();
                (!value.is_empty()).then(|| (k.into(), value))
            })
            .collect();
        Self { vars }
    }

    /// Get a non-empty, trimmed value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Get a value or fall back to a default.
    pub fn get_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.get(name).unwrap_or(default)
    }

    /// `PATH` as captured, for executable resolution.
    pub fn search_path(&self) -> Option<OsString> {
        self.get(PATH_ENV).map(OsString::from)
    }
}

/// Parse a tolerant boolean. Absent or unrecognized values are `false`.
pub fn parse_bool(raw: Option<&str>) -> bool {
    raw.map(|v| {
        let v = v.trim().to_ascii_lowercase();
        TRUTHY_VALUES.contains(&v.as_str())
    })
    .unwrap_or(false)
}

/// Canonical string form of a boolean, as exported to the node.
pub fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

/// Whether a raw boolean value needed rewriting to reach its canonical form.
pub fn needs_normalization(raw: Option<&str>) -> bool {
    match raw {
        Some(v) => v != bool_str(parse_bool(Some(v))),
        None => false,
    }
}

/// Whether a value looks like template text (`your-domain`, `example.com`, ...).
pub fn is_placeholder(value: &str) -> bool {
    let lowered = value.to_ascii_lowercase();
    PLACEHOLDER_PATTERNS.iter().any(|p| lowered.contains(p))
}
