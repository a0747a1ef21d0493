// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Process Launch
//!
//! Builds the final argument list and environment for the located program
//! and hands the process over to it.
//!
//! Building the plan ([`ProcessLauncher`]) and replacing the process image
//! ([`Handoff::exec`]) are separate steps so the plan can be inspected with
//! `--dry-run` and in tests. `exec` is the terminal action of a run: it only
//! comes back with an error.

pub mod compat;

use std::collections::BTreeMap;
use std::fs::File;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Serialize;
use tracing::{info, warn};

use crate::credentials::{key_uri, resolve_key_path};
use crate::error::StartupError;
use crate::tools::ToolRunner;
use crate::validator::ResolvedConfig;

pub use compat::{KeyFlag, KeyValueForm, KEY_FLAGS, KEY_PATH_ENV_NAMES, KEY_URI_ENV_NAMES};

pub const STORAGE_PATH_FLAG: &str = "--storage-path";

/// Program, arguments and environment overlay for the final `exec`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Applied on top of the inherited environment.
    pub env: BTreeMap<String, String>,
}

/// What the run ends in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handoff {
    /// The located node binary with assembled arguments.
    Binary(LaunchPlan),
    /// The image's own entrypoint script, which takes over the startup.
    Delegate(LaunchPlan),
    /// A command given on the launcher's command line.
    UserCommand(LaunchPlan),
}

/// Printable view of a handoff. Only variable names are included.
#[derive(Debug, Serialize)]
pub struct HandoffSummary<'a> {
    pub kind: &'static str,
    pub program: &'a Path,
    pub args: &'a [String],
    pub env: Vec<&'a str>,
}

impl Handoff {
    pub fn kind(&self) -> &'static str {
        match self {
            Handoff::Binary(_) => "binary",
            Handoff::Delegate(_) => "delegate",
            Handoff::UserCommand(_) => "user_command",
        }
    }

    pub fn plan(&self) -> &LaunchPlan {
        match self {
            Handoff::Binary(plan) | Handoff::Delegate(plan) | Handoff::UserCommand(plan) => plan,
        }
    }

    pub fn summary(&self) -> HandoffSummary<'_> {
        let plan = self.plan();
        HandoffSummary {
            kind: self.kind(),
            program: &plan.program,
            args: &plan.args,
            env: plan.env.keys().map(String::as_str).collect(),
        }
    }

    /// Replace the current process image.
    ///
    /// Never returns on success. The returned value is always
    /// `StartupError::LaunchFailed`.
    pub fn exec(self) -> StartupError {
        let kind = self.kind();
        let plan = match self {
            Handoff::Binary(plan) | Handoff::Delegate(plan) | Handoff::UserCommand(plan) => plan,
        };
        info!(
            kind,
            program = %plan.program.display(),
            args = ?plan.args,
            "Replacing process"
        );

        let source = Command::new(&plan.program)
            .args(&plan.args)
            .envs(&plan.env)
            .exec();

        StartupError::LaunchFailed {
            program: plan.program,
            source,
        }
    }
}

/// Check the key file the node will read.
///
/// # Errors
/// `KeyFileMissingAtLaunch` when the file is absent, not a regular file,
/// or cannot be opened for reading.
pub fn verify_key_file(path: &Path) -> Result<(), StartupError> {
    let missing = |reason: String| StartupError::KeyFileMissingAtLaunch {
        path: path.to_path_buf(),
        reason,
    };

    let metadata = std::fs::metadata(path).map_err(|e| missing(e.to_string()))?;
    if !metadata.is_file() {
        return Err(missing("not a regular file".to_string()));
    }
    File::open(path).map_err(|e| missing(e.to_string()))?;
    Ok(())
}

/// Assembles launch plans from the resolved configuration.
pub struct ProcessLauncher<'a, R> {
    runner: &'a R,
    config: &'a ResolvedConfig,
}

impl<'a, R: ToolRunner> ProcessLauncher<'a, R> {
    pub fn new(runner: &'a R, config: &'a ResolvedConfig) -> Self {
        Self { runner, config }
    }

    /// Resolved, verified key file path.
    fn key_path(&self) -> Result<PathBuf, StartupError> {
        let path = resolve_key_path(&self.config.layout.encryption_key_file);
        verify_key_file(&path)?;
        Ok(path)
    }

    /// Overlay plus every spelling of the key location.
    fn environment(&self, key_path: &Path) -> BTreeMap<String, String> {
        let mut env = self.config.env_overlay();
        let plain = key_path.display().to_string();
        for name in KEY_PATH_ENV_NAMES {
            env.insert(name.to_string(), plain.clone());
        }
        let uri = key_uri(key_path);
        for name in KEY_URI_ENV_NAMES {
            env.insert(name.to_string(), uri.clone());
        }
        env
    }

    /// Plan for the located node binary.
    ///
    /// # Errors
    /// `KeyFileMissingAtLaunch`.
    pub async fn plan_binary(&self, binary: &Path) -> Result<Handoff, StartupError> {
        let key_path = self.key_path()?;

        let mut args = vec![
            STORAGE_PATH_FLAG.to_string(),
            self.config.layout.storage_path.clone(),
        ];
        match compat::probe_key_flag(self.runner, binary).await {
            Some(flag) => {
                info!(flag = flag.flag, "Passing encryption key by flag");
                args.push(flag.flag.to_string());
                args.push(flag.value(&key_path));
            }
            None => {
                warn!(
                    variables = ?KEY_PATH_ENV_NAMES,
                    "Binary accepts no known key flag, passing key by environment only"
                );
            }
        }

        Ok(Handoff::Binary(LaunchPlan {
            program: binary.to_path_buf(),
            args,
            env: self.environment(&key_path),
        }))
    }

    /// Plan for the image's fallback entrypoint.
    ///
    /// # Errors
    /// `KeyFileMissingAtLaunch`.
    pub fn plan_delegate(&self, script: &Path) -> Result<Handoff, StartupError> {
        let key_path = self.key_path()?;
        Ok(Handoff::Delegate(LaunchPlan {
            program: script.to_path_buf(),
            args: Vec::new(),
            env: self.environment(&key_path),
        }))
    }

    /// Plan for a command given on the command line. No flags are added.
    ///
    /// # Errors
    /// `KeyFileMissingAtLaunch`.
    pub fn plan_command(&self, program: &str, args: &[String]) -> Result<Handoff, StartupError> {
        let key_path = self.key_path()?;
        Ok(Handoff::UserCommand(LaunchPlan {
            program: PathBuf::from(program),
            args: args.to_vec(),
            env: self.environment(&key_path),
        }))
    }
}
