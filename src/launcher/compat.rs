// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Compatibility shim for the node's encryption key flag.
//!
//! The node is versioned outside this repository and its builds have
//! spelled the key flag differently. The table below lists every known
//! spelling in preference order; the capability check is whether the
//! binary's `--help` output mentions the flag as a whole token. When no
//! spelling is accepted the flag is omitted and the node picks the key up
//! from the environment (see [`KEY_PATH_ENV_NAMES`]).

use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};

use crate::credentials::key_uri;
use crate::tools::{ToolCommand, ToolRunner};

/// How a flag expects the key location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyValueForm {
    /// `/certs/encryption-key.asc`
    Path,
    /// `file:///certs/encryption-key.asc`
    FileUri,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KeyFlag {
    pub flag: &'static str,
    pub form: KeyValueForm,
}

impl KeyFlag {
    /// Render the flag value for `path`.
    pub fn value(&self, path: &Path) -> String {
        match self.form {
            KeyValueForm::Path => path.display().to_string(),
            KeyValueForm::FileUri => key_uri(path),
        }
    }
}

/// Known spellings, most preferred first.
pub const KEY_FLAGS: [KeyFlag; 4] = [
    KeyFlag {
        flag: "--encryption-key-file",
        form: KeyValueForm::Path,
    },
    KeyFlag {
        flag: "--gpg-key-file",
        form: KeyValueForm::Path,
    },
    KeyFlag {
        flag: "--encryption-key-source",
        form: KeyValueForm::FileUri,
    },
    KeyFlag {
        flag: "--key-source",
        form: KeyValueForm::FileUri,
    },
];

/// Variables carrying the key as a plain path.
pub const KEY_PATH_ENV_NAMES: [&str; 4] = [
    "ENCRYPTION_KEY_FILE",
    "GPG_KEY_FILE",
    "NODE_ENCRYPTION_KEY_FILE",
    "NODE_GPG_KEY_FILE",
];

/// Variables carrying the key as a `file://` URI.
pub const KEY_URI_ENV_NAMES: [&str; 2] = ["ENCRYPTION_KEY_SOURCE", "NODE_ENCRYPTION_KEY_SOURCE"];

/// Whether `help` lists `flag` as a standalone option.
///
/// `--key-source` must not match inside `--key-source-type` or
/// `--gpg-key-source`.
pub fn help_mentions(help: &str, flag: &str) -> bool {
    help.match_indices(flag).any(|(start, _)| {
        let before = help[..start].chars().next_back();
        let after = help[start + flag.len()..].chars().next();
        let starts_token = before.is_none_or(|c| c.is_whitespace() || matches!(c, ',' | '[' | '|' | '('));
        let ends_token = after.is_none_or(|c| !(c.is_alphanumeric() || c == '-' || c == '_'));
        starts_token && ends_token
    })
}

/// First accepted spelling in preference order.
pub fn select_flag(help: &str) -> Option<KeyFlag> {
    KEY_FLAGS
        .iter()
        .find(|candidate| help_mentions(help, candidate.flag))
        .copied()
}

/// Ask the binary for its options and pick a key flag.
///
/// Probe failures are not fatal: they mean "no flag".
pub async fn probe_key_flag<R: ToolRunner>(runner: &R, binary: &Path) -> Option<KeyFlag> {
    let output = match runner.run(&ToolCommand::new(binary).arg("--help")).await {
        Ok(output) => output,
        Err(e) => {
            warn!(error = %e, "Could not probe binary options, relying on environment");
            return None;
        }
    };

    // Some builds print usage on stderr and exit non-zero.
    let help = format!("{}\n{}", output.stdout, output.stderr);
    let selected = select_flag(&help);
    debug!(flag = ?selected.map(|f| f.flag), "Probed key flag");
    selected
}
