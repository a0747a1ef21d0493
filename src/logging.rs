// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Diagnostics go to stderr so stdout stays free for `--dry-run` and
//! `--validate-only` output and container logs capture everything.

use tracing_subscriber::EnvFilter;

use crate::config::{EnvSnapshot, DEFAULT_LOG_FILTER, LOG_FORMAT_ENV};

/// `RUST_LOG`
pub const LOG_FILTER_ENV: &str = "RUST_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn from_env(env: &EnvSnapshot) -> Self {
        match env.get(LOG_FORMAT_ENV) {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// Filter directives from `RUST_LOG`, falling back to `info` when unset or
/// unparsable.
pub fn filter_for(env: &EnvSnapshot) -> EnvFilter {
    env.get(LOG_FILTER_ENV)
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Install the global subscriber. Call once, before the first event.
pub fn init(env: &EnvSnapshot) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter_for(env))
        .with_writer(std::io::stderr)
        .with_target(false);

    match LogFormat::from_env(env) {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}
