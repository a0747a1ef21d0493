// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Configuration Validation
//!
//! Turns the raw [`EnvSnapshot`] into a [`ResolvedConfig`]:
//!
//! 1. Every required key must be present. All absent keys are reported at
//!    once.
//! 2. Auth provider toggles are normalized and each enabled provider is
//!    resolved (see [`auth`]). Placeholder-only providers are disabled.
//! 3. At least one provider must remain enabled.
//!
//! The resolved value is passed explicitly to every later stage. It also
//! produces the environment overlay applied to the launched node, so the
//! node observes normalized booleans under both the raw and the `NODE_`
//! prefixed variable names.

pub mod auth;

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{
    self, bool_str, is_placeholder, needs_normalization, parse_bool, EnvSnapshot,
};
use crate::error::StartupError;

pub use auth::{AuthProviderKind, ProviderResolution, ResolvedProvider};

/// Identity of the deployment, all required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteIdentity {
    pub domain: String,
    pub public_ip: String,
    pub account_id: String,
    pub api_url: String,
    pub app_url: String,
    pub gateway_url: String,
    pub initial_users: Vec<String>,
}

/// DNS-challenge credentials for the certificate authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityCredentials {
    pub api_token: String,
    pub zone_id: Option<String>,
    pub email: Option<String>,
    pub staging: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateSettings {
    /// `CERT_GENERATION_ENABLED`
    pub generation_enabled: bool,
    /// Present only when a real API token is configured.
    pub authority: Option<AuthorityCredentials>,
}

/// Where credentials and data live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutSettings {
    pub cert_dir: PathBuf,
    pub letsencrypt_dir: PathBuf,
    /// Raw value, possibly carrying a `file://` prefix
    pub encryption_key_file: String,
    pub gnupg_home: PathBuf,
    pub storage_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinarySettings {
    pub name: String,
    pub override_path: Option<PathBuf>,
}

/// Fully validated configuration.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub site: SiteIdentity,
    pub providers: Vec<ResolvedProvider>,
    pub certificates: CertificateSettings,
    pub layout: LayoutSettings,
    pub binary: BinarySettings,
    pub search_path: Option<OsString>,
    pub tool_timeout: Duration,
}

/// Secret-free view of the resolved configuration, for `--validate-only`.
#[derive(Debug, Serialize)]
pub struct ConfigSummary<'a> {
    pub site: &'a SiteIdentity,
    pub auth_providers: Vec<AuthProviderKind>,
    pub cert_generation_enabled: bool,
    pub authority_configured: bool,
    pub cert_dir: &'a std::path::Path,
    pub encryption_key_file: &'a str,
    pub storage_path: &'a str,
    pub binary_name: &'a str,
}

impl ResolvedConfig {
    pub fn is_enabled(&self, kind: AuthProviderKind) -> bool {
        self.providers.iter().any(|p| p.kind == kind)
    }

    pub fn summary(&self) -> ConfigSummary<'_> {
        ConfigSummary {
            site: &self.site,
            auth_providers: self.providers.iter().map(|p| p.kind).collect(),
            cert_generation_enabled: self.certificates.generation_enabled,
            authority_configured: self.certificates.authority.is_some(),
            cert_dir: &self.layout.cert_dir,
            encryption_key_file: &self.layout.encryption_key_file,
            storage_path: &self.layout.storage_path,
            binary_name: &self.binary.name,
        }
    }

    /// Environment handed to the launched process.
    ///
    /// Each entry is set under its raw name and under the `NODE_` prefixed
    /// name the node reads.
    pub fn env_overlay(&self) -> BTreeMap<String, String> {
        let mut overlay = BTreeMap::new();
        let mut set = |name: &str, value: &str| {
            overlay.insert(name.to_string(), value.to_string());
            if !name.starts_with(config::NODE_ENV_PREFIX) {
                overlay.insert(format!("{}{name}", config::NODE_ENV_PREFIX), value.to_string());
            }
        };

        set(config::DOMAIN_ENV, &self.site.domain);
        set(config::PUBLIC_IP_ENV, &self.site.public_ip);
        set(config::ACCOUNT_ID_ENV, &self.site.account_id);
        set(config::ADVERTISED_API_URL_ENV, &self.site.api_url);
        set(config::ADVERTISED_APP_URL_ENV, &self.site.app_url);
        set(config::ADVERTISED_GATEWAY_URL_ENV, &self.site.gateway_url);
        set(config::INITIAL_USERS_ENV, &self.site.initial_users.join(","));

        for kind in AuthProviderKind::ALL {
            set(kind.enabled_env(), bool_str(self.is_enabled(kind)));
        }
        for provider in &self.providers {
            for (name, value) in &provider.fields {
                set(name, value);
            }
        }

        set(
            config::CERT_GENERATION_ENV,
            bool_str(self.certificates.generation_enabled),
        );
        let staging = self
            .certificates
            .authority
            .as_ref()
            .is_some_and(|a| a.staging);
        set(config::ACME_STAGING_ENV, bool_str(staging));
        set(config::STORAGE_PATH_ENV, &self.layout.storage_path);

        overlay
    }
}

/// Validate the snapshot.
///
/// # Errors
/// `MissingConfiguration`, `InvalidAuthConfig` or `NoAuthMethodEnabled`.
pub fn validate(env: &EnvSnapshot) -> Result<ResolvedConfig, StartupError> {
    let site = validate_site(env)?;

    for url_var in [
        config::ADVERTISED_API_URL_ENV,
        config::ADVERTISED_APP_URL_ENV,
        config::ADVERTISED_GATEWAY_URL_ENV,
    ] {
        if let Some(raw) = env.get(url_var) {
            if url::Url::parse(raw).is_err() {
                warn!(variable = url_var, value = raw, "Advertised URL is not an absolute URL");
            }
        }
    }

    let providers = validate_auth(env)?;
    let certificates = certificate_settings(env);
    let layout = layout_settings(env);

    let binary = BinarySettings {
        name: env
            .get_or(config::BINARY_NAME_ENV, config::DEFAULT_BINARY_NAME)
            .to_string(),
        override_path: env.get(config::BINARY_PATH_ENV).map(PathBuf::from),
    };

    let tool_timeout = match env.get(config::TOOL_TIMEOUT_ENV) {
        None => Duration::from_secs(config::DEFAULT_TOOL_TIMEOUT_SECS),
        Some(raw) => match raw.parse::<u64>() {
            Ok(secs) if secs > 0 => Duration::from_secs(secs),
            _ => {
                warn!(
                    variable = config::TOOL_TIMEOUT_ENV,
                    value = raw,
                    default = config::DEFAULT_TOOL_TIMEOUT_SECS,
                    "Invalid timeout, using default"
                );
                Duration::from_secs(config::DEFAULT_TOOL_TIMEOUT_SECS)
            }
        },
    };

    info!(
        domain = %site.domain,
        providers = ?providers.iter().map(|p| p.kind).collect::<Vec<_>>(),
        cert_generation = certificates.generation_enabled,
        "Configuration validated"
    );

    Ok(ResolvedConfig {
        site,
        providers,
        certificates,
        layout,
        binary,
        search_path: env.search_path(),
        tool_timeout,
    })
}

fn validate_site(env: &EnvSnapshot) -> Result<SiteIdentity, StartupError> {
    let mut missing: Vec<String> = config::REQUIRED_ENV
        .iter()
        .filter(|name| env.get(name).is_none())
        .map(|name| name.to_string())
        .collect();

    let initial_users: Vec<String> = env
        .get(config::INITIAL_USERS_ENV)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if initial_users.is_empty() && !missing.iter().any(|m| m == config::INITIAL_USERS_ENV) {
        missing.push(config::INITIAL_USERS_ENV.to_string());
    }

    if !missing.is_empty() {
        return Err(StartupError::MissingConfiguration { missing });
    }

    let get = |name: &str| env.get(name).unwrap_or_default().to_string();
    Ok(SiteIdentity {
        domain: get(config::DOMAIN_ENV),
        public_ip: get(config::PUBLIC_IP_ENV),
        account_id: get(config::ACCOUNT_ID_ENV),
        api_url: get(config::ADVERTISED_API_URL_ENV),
        app_url: get(config::ADVERTISED_APP_URL_ENV),
        gateway_url: get(config::ADVERTISED_GATEWAY_URL_ENV),
        initial_users,
    })
}

fn validate_auth(env: &EnvSnapshot) -> Result<Vec<ResolvedProvider>, StartupError> {
    let mut providers = Vec::new();
    for kind in AuthProviderKind::ALL {
        if let ProviderResolution::Enabled(provider) = auth::resolve_provider(kind, env)? {
            providers.push(provider);
        }
    }

    if providers.is_empty() {
        return Err(StartupError::NoAuthMethodEnabled {
            checked: AuthProviderKind::ALL.iter().map(ToString::to_string).collect(),
        });
    }
    Ok(providers)
}

fn normalized_bool(env: &EnvSnapshot, name: &str) -> bool {
    let raw = env.get(name);
    if needs_normalization(raw) {
        warn!(
            variable = name,
            raw = raw.unwrap_or_default(),
            normalized = parse_bool(raw),
            "Normalized boolean setting"
        );
    }
    parse_bool(raw)
}

fn certificate_settings(env: &EnvSnapshot) -> CertificateSettings {
    let generation_enabled = normalized_bool(env, config::CERT_GENERATION_ENV);
    let staging = normalized_bool(env, config::ACME_STAGING_ENV);

    let real = |name: &str| {
        env.get(name).and_then(|v| {
            if is_placeholder(v) {
                warn!(variable = name, "Ignoring placeholder value");
                None
            } else {
                Some(v.to_string())
            }
        })
    };

    let authority = real(config::CLOUDFLARE_API_TOKEN_ENV).map(|api_token| AuthorityCredentials {
        api_token,
        zone_id: real(config::CLOUDFLARE_ZONE_ID_ENV),
        email: real(config::ACME_EMAIL_ENV),
        staging,
    });

    CertificateSettings {
        generation_enabled,
        authority,
    }
}

fn layout_settings(env: &EnvSnapshot) -> LayoutSettings {
    let cert_dir = PathBuf::from(env.get_or(config::CERT_DIR_ENV, config::DEFAULT_CERT_DIR));
    let gnupg_home = env
        .get(config::GNUPG_HOME_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| cert_dir.join(".gnupg"));

    LayoutSettings {
        letsencrypt_dir: PathBuf::from(
            env.get_or(config::LETSENCRYPT_DIR_ENV, config::DEFAULT_LETSENCRYPT_DIR),
        ),
        encryption_key_file: env
            .get_or(config::ENCRYPTION_KEY_FILE_ENV, config::DEFAULT_ENCRYPTION_KEY_FILE)
            .to_string(),
        storage_path: env
            .get_or(config::STORAGE_PATH_ENV, config::DEFAULT_STORAGE_PATH)
            .to_string(),
        cert_dir,
        gnupg_home,
    }
}
