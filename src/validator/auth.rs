// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication provider blocks.
//!
//! The node supports three independent sign-in providers. Each block has an
//! enabled toggle, mandatory fields and optional fields:
//!
//! | Provider | Toggle | Mandatory | Optional |
//! |----------|--------|-----------|----------|
//! | Auth0 | `AUTH0_ENABLED` | `AUTH0_DOMAIN`, `AUTH0_CLIENT_ID` | `AUTH0_API_TOKEN` |
//! | Federation | `FEDERATION_ENABLED` | `FEDERATION_URL` | |
//! | OIDC | `OIDC_ENABLED` | `OIDC_PROVIDER_URL`, `OIDC_CLIENT_ID`, `OIDC_CLIENT_SECRET` | `OIDC_LOGOUT_URL` |

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;

use crate::config::{is_placeholder, needs_normalization, parse_bool, EnvSnapshot};
use crate::error::StartupError;

/// Supported sign-in providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProviderKind {
    /// Token/domain/client-id style tenant
    Auth0,
    /// Federation metadata URL
    Federation,
    /// Generic OpenID Connect provider
    Oidc,
}

impl AuthProviderKind {
    pub const ALL: [AuthProviderKind; 3] = [
        AuthProviderKind::Auth0,
        AuthProviderKind::Federation,
        AuthProviderKind::Oidc,
    ];

    /// Name of the enabled toggle.
    pub fn enabled_env(&self) -> &'static str {
        match self {
            AuthProviderKind::Auth0 => "AUTH0_ENABLED",
            AuthProviderKind::Federation => "FEDERATION_ENABLED",
            AuthProviderKind::Oidc => "OIDC_ENABLED",
        }
    }

    /// Fields that must hold real values when the provider is enabled.
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            AuthProviderKind::Auth0 => &["AUTH0_DOMAIN", "AUTH0_CLIENT_ID"],
            AuthProviderKind::Federation => &["FEDERATION_URL"],
            AuthProviderKind::Oidc => &["OIDC_PROVIDER_URL", "OIDC_CLIENT_ID", "OIDC_CLIENT_SECRET"],
        }
    }

    pub fn optional_fields(&self) -> &'static [&'static str] {
        match self {
            AuthProviderKind::Auth0 => &["AUTH0_API_TOKEN"],
            AuthProviderKind::Federation => &[],
            AuthProviderKind::Oidc => &["OIDC_LOGOUT_URL"],
        }
    }
}

impl std::fmt::Display for AuthProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthProviderKind::Auth0 => write!(f, "auth0"),
            AuthProviderKind::Federation => write!(f, "federation"),
            AuthProviderKind::Oidc => write!(f, "oidc"),
        }
    }
}

/// An enabled provider with its resolved, non-placeholder fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedProvider {
    pub kind: AuthProviderKind,
    /// Variable name -> value
    pub fields: BTreeMap<String, String>,
}

/// Outcome of resolving one provider block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderResolution {
    /// Toggle off
    Disabled,
    /// Toggle on but every value is template text
    DisabledPlaceholder,
    Enabled(ResolvedProvider),
}

enum FieldValue<'a> {
    Missing,
    Placeholder,
    Real(&'a str),
}

fn classify<'a>(env: &'a EnvSnapshot, name: &str) -> FieldValue<'a> {
    match env.get(name) {
        None => FieldValue::Missing,
        Some(v) if is_placeholder(v) => FieldValue::Placeholder,
        Some(v) => FieldValue::Real(v),
    }
}

/// Resolve a provider block.
///
/// # Errors
/// `InvalidAuthConfig` when the provider is enabled, at least one mandatory
/// field is real, and another is missing or a placeholder. Also when the
/// provider is enabled with every mandatory field absent.
pub fn resolve_provider(
    kind: AuthProviderKind,
    env: &EnvSnapshot,
) -> Result<ProviderResolution, StartupError> {
    let raw_toggle = env.get(kind.enabled_env());
    if needs_normalization(raw_toggle) {
        warn!(
            variable = kind.enabled_env(),
            raw = raw_toggle.unwrap_or_default(),
            normalized = parse_bool(raw_toggle),
            "Normalized boolean setting"
        );
    }
    if !parse_bool(raw_toggle) {
        return Ok(ProviderResolution::Disabled);
    }

    let mut fields = BTreeMap::new();
    let mut offending = Vec::new();
    let mut placeholders = 0usize;

    for name in kind.required_fields() {
        match classify(env, name) {
            FieldValue::Real(v) => {
                fields.insert(name.to_string(), v.to_string());
            }
            FieldValue::Placeholder => {
                placeholders += 1;
                offending.push(name.to_string());
            }
            FieldValue::Missing => offending.push(name.to_string()),
        }
    }

    if fields.is_empty() && placeholders > 0 {
        warn!(
            provider = %kind,
            "Provider enabled with placeholder values only, disabling it"
        );
        return Ok(ProviderResolution::DisabledPlaceholder);
    }

    if !offending.is_empty() {
        return Err(StartupError::InvalidAuthConfig {
            provider: kind.to_string(),
            fields: offending,
        });
    }

    for name in kind.optional_fields() {
        match classify(env, name) {
            FieldValue::Real(v) => {
                fields.insert(name.to_string(), v.to_string());
            }
            FieldValue::Placeholder => {
                warn!(provider = %kind, variable = name, "Ignoring placeholder value");
            }
            FieldValue::Missing => {}
        }
    }

    Ok(ProviderResolution::Enabled(ResolvedProvider { kind, fields }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> EnvSnapshot {
        EnvSnapshot::from_pairs(pairs.iter().copied())
    }

    /// Real values for every mandatory field of `kind`.
    fn real_fields(kind: AuthProviderKind) -> Vec<(&'static str, &'static str)> {
        match kind {
            AuthProviderKind::Auth0 => vec![
                ("AUTH0_DOMAIN", "relational.eu.auth0.com"),
                ("AUTH0_CLIENT_ID", "k2x9QzLmP0"),
            ],
            AuthProviderKind::Federation => {
                vec![("FEDERATION_URL", "https://idp.relational.network/metadata")]
            }
            AuthProviderKind::Oidc => vec![
                ("OIDC_PROVIDER_URL", "https://login.relational.network"),
                ("OIDC_CLIENT_ID", "node"),
                ("OIDC_CLIENT_SECRET", "s3cr3t-v4lue"),
            ],
        }
    }

    #[test]
    fn disabled_toggle_short_circuits() {
        for kind in AuthProviderKind::ALL {
            let e = env(&[(kind.enabled_env(), "off")]);
            assert_eq!(resolve_provider(kind, &e).unwrap(), ProviderResolution::Disabled);
        }
    }

    #[test]
    fn enabled_without_mandatory_fields_is_fatal() {
        for kind in AuthProviderKind::ALL {
            let e = env(&[(kind.enabled_env(), "true")]);
            let err = resolve_provider(kind, &e).unwrap_err();
            match err {
                StartupError::InvalidAuthConfig { provider, fields } => {
                    assert_eq!(provider, kind.to_string());
                    assert_eq!(fields.len(), kind.required_fields().len());
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }

    #[test]
    fn placeholder_only_provider_is_disabled() {
        for kind in AuthProviderKind::ALL {
            let mut pairs = vec![(kind.enabled_env(), "yes")];
            for name in kind.required_fields() {
                pairs.push((*name, "your-value-here"));
            }
            let e = env(&pairs);
            assert_eq!(
                resolve_provider(kind, &e).unwrap(),
                ProviderResolution::DisabledPlaceholder
            );
        }
    }

    #[test]
    fn mixed_real_and_placeholder_names_offending_field() {
        let e = env(&[
            ("OIDC_ENABLED", "1"),
            ("OIDC_PROVIDER_URL", "https://login.relational.network"),
            ("OIDC_CLIENT_ID", "node"),
            ("OIDC_CLIENT_SECRET", "change-me"),
        ]);
        let err = resolve_provider(AuthProviderKind::Oidc, &e).unwrap_err();
        match err {
            StartupError::InvalidAuthConfig { fields, .. } => {
                assert_eq!(fields, vec!["OIDC_CLIENT_SECRET".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn enabled_provider_resolves_fields() {
        for kind in AuthProviderKind::ALL {
            let mut pairs = vec![(kind.enabled_env(), "Enabled")];
            pairs.extend(real_fields(kind));
            let e = env(&pairs);
            match resolve_provider(kind, &e).unwrap() {
                ProviderResolution::Enabled(p) => {
                    assert_eq!(p.kind, kind);
                    assert_eq!(p.fields.len(), kind.required_fields().len());
                }
                other => panic!("unexpected resolution: {other:?}"),
            }
        }
    }

    #[test]
    fn optional_placeholder_is_dropped() {
        let mut pairs = vec![("AUTH0_ENABLED", "true"), ("AUTH0_API_TOKEN", "placeholder")];
        pairs.extend(real_fields(AuthProviderKind::Auth0));
        let e = env(&pairs);
        match resolve_provider(AuthProviderKind::Auth0, &e).unwrap() {
            ProviderResolution::Enabled(p) => {
                assert!(!p.fields.contains_key("AUTH0_API_TOKEN"));
            }
            other => panic!("unexpected resolution: {other:?}"),
        }
    }
}
