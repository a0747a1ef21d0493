// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Startup Orchestration
//!
//! Drives the pipeline strictly in order:
//!
//! ```text
//! Init → Validating → Provisioning → Locating → Launching → (process replaced)
//!            └────────────┴─────────────┴───────────┴──────→ Aborted(exit code)
//! ```
//!
//! Validation is a separate call so the caller can size the tool runner from
//! the resolved configuration before any tool runs. The pipeline ends in a
//! [`Handoff`]; replacing the process image is left to the caller.

use std::fmt;
use std::path::PathBuf;

use tracing::{error, info};

use crate::config::EnvSnapshot;
use crate::credentials::CredentialProvisioner;
use crate::error::StartupError;
use crate::launcher::{Handoff, ProcessLauncher};
use crate::locator::{BinaryLocator, FileSystem, LocateRequest, Location, SearchConfig};
use crate::tools::ToolRunner;
use crate::validator::{self, ResolvedConfig};

/// Where the run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    Validating,
    Provisioning,
    Locating,
    Launching,
    /// Terminal failure, carrying the process exit code.
    Aborted(u8),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Init => write!(f, "init"),
            Stage::Validating => write!(f, "validating"),
            Stage::Provisioning => write!(f, "provisioning"),
            Stage::Locating => write!(f, "locating"),
            Stage::Launching => write!(f, "launching"),
            Stage::Aborted(code) => write!(f, "aborted({code})"),
        }
    }
}

pub struct Orchestrator<F> {
    env: EnvSnapshot,
    fs: F,
    search: SearchConfig,
    cwd: PathBuf,
    command: Vec<String>,
    stage: Stage,
}

impl<F: FileSystem> Orchestrator<F> {
    pub fn new(env: EnvSnapshot, fs: F) -> Self {
        Self {
            env,
            fs,
            search: SearchConfig::default(),
            cwd: PathBuf::from("/"),
            command: Vec::new(),
            stage: Stage::Init,
        }
    }

    pub fn with_search(mut self, search: SearchConfig) -> Self {
        self.search = search;
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    /// Explicit command to run instead of the discovered binary.
    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn enter(&mut self, next: Stage) {
        info!(from = %self.stage, to = %next, "Stage transition");
        self.stage = next;
    }

    fn abort(&mut self, err: StartupError) -> StartupError {
        let code = err.exit_code();
        error!(
            stage = %self.stage,
            error_code = err.error_code(),
            exit_code = code,
            error = %err,
            "Startup aborted"
        );
        self.stage = Stage::Aborted(code);
        err
    }

    /// `Init → Validating`.
    ///
    /// # Errors
    /// Any validation error; the stage becomes `Aborted`.
    pub fn validate(&mut self) -> Result<ResolvedConfig, StartupError> {
        self.enter(Stage::Validating);
        validator::validate(&self.env).map_err(|e| self.abort(e))
    }

    /// `Provisioning → Locating → Launching`, ending in the handoff.
    ///
    /// With an explicit command, locating and flag assembly are skipped.
    ///
    /// # Errors
    /// Provisioning, discovery or launch planning errors; the stage becomes
    /// `Aborted`.
    pub async fn prepare<R: ToolRunner>(
        &mut self,
        config: &ResolvedConfig,
        runner: &R,
    ) -> Result<Handoff, StartupError> {
        match self.run_stages(config, runner).await {
            Ok(handoff) => {
                info!(kind = handoff.kind(), program = %handoff.plan().program.display(), "Ready to launch");
                Ok(handoff)
            }
            Err(e) => Err(self.abort(e)),
        }
    }

    async fn run_stages<R: ToolRunner>(
        &mut self,
        config: &ResolvedConfig,
        runner: &R,
    ) -> Result<Handoff, StartupError> {
        self.enter(Stage::Provisioning);
        CredentialProvisioner::new(runner, config).provision().await?;

        let launcher = ProcessLauncher::new(runner, config);

        if let Some((program, args)) = self.command.split_first() {
            info!(program = %program, "Explicit command given, skipping binary discovery");
            let handoff = launcher.plan_command(program, args)?;
            self.enter(Stage::Launching);
            return Ok(handoff);
        }

        self.enter(Stage::Locating);
        let locator = BinaryLocator::new(&self.fs, self.search.clone());
        let location = locator.locate(&LocateRequest {
            name: &config.binary.name,
            search_path: config.search_path.as_deref(),
            cwd: &self.cwd,
            override_path: config.binary.override_path.as_deref(),
        })?;

        self.enter(Stage::Launching);
        match location {
            Location::Binary { path, .. } => launcher.plan_binary(&path).await,
            Location::Delegate { script } => launcher.plan_delegate(&script),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::*;
    use crate::credentials::gpg::testing::ARMORED_KEY;
    use crate::credentials::tls::testing::{long_lived, write_pair};
    use crate::credentials::CredentialPaths;
    use crate::locator::MemoryFs;
    use crate::tools::testing::{failed, ok, FakeRunner};
    use crate::validator::tests::valid_pairs;

    const DOMAIN: &str = "node.relational.network";
    const NODE_HELP: &str = "Usage: relational-node [OPTIONS]\n\
        \x20 --storage-path <PATH>\n\
        \x20 --encryption-key-file <FILE>\n";

    /// Valid environment with credentials rooted at `cert_dir`.
    fn env_for(cert_dir: &Path, extra: &[(&str, &str)]) -> EnvSnapshot {
        let key = cert_dir.join("encryption-key.asc");
        let mut pairs: Vec<(String, String)> = valid_pairs()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        pairs.push(("CERT_DIR".to_string(), cert_dir.display().to_string()));
        pairs.push(("ENCRYPTION_KEY_FILE".to_string(), key.display().to_string()));
        pairs.push(("PATH".to_string(), "/usr/bin:/bin".to_string()));
        pairs.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        EnvSnapshot::from_pairs(pairs)
    }

    fn node_fs() -> MemoryFs {
        MemoryFs::new()
            .with_executable("/usr/local/bin/relational-node")
            .with_executable("/opt/relational/bin/relational-node")
    }

    fn modified(path: &Path) -> std::time::SystemTime {
        fs::metadata(path).unwrap().modified().unwrap()
    }

    #[tokio::test]
    async fn fresh_container_provisions_and_launches_node() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new()
            .on("openssl", |cmd| {
                write_pair(
                    Path::new(cmd.arg_after("-out").unwrap()),
                    Path::new(cmd.arg_after("-keyout").unwrap()),
                    &long_lived(DOMAIN),
                );
                ok("")
            })
            .on("gpg", |cmd| {
                if cmd.args.iter().any(|a| a == "--list-secret-keys") {
                    failed("gpg: error reading key: No secret key")
                } else if cmd.args.iter().any(|a| a == "--export-secret-keys") {
                    ok(ARMORED_KEY)
                } else {
                    ok("")
                }
            })
            .on("relational-node", |_| ok(NODE_HELP));

        let mut orchestrator = Orchestrator::new(env_for(dir.path(), &[]), node_fs());
        let config = orchestrator.validate().unwrap();
        let handoff = orchestrator.prepare(&config, &runner).await.unwrap();

        let paths = CredentialPaths::new(dir.path());
        assert!(paths.certificate().is_file());
        assert!(paths.self_signed_marker().is_file());
        assert_eq!(fs::read_to_string(paths.encryption_key()).unwrap(), ARMORED_KEY);
        assert_eq!(runner.called("certbot"), 0);

        assert_eq!(orchestrator.stage(), Stage::Launching);
        assert!(matches!(handoff, Handoff::Binary(_)));
        let plan = handoff.plan();
        assert_eq!(plan.program, PathBuf::from("/usr/local/bin/relational-node"));
        assert_eq!(
            plan.args,
            vec![
                "--storage-path".to_string(),
                "/data".to_string(),
                "--encryption-key-file".to_string(),
                paths.encryption_key().display().to_string(),
            ]
        );
        assert_eq!(plan.env["NODE_AUTH0_ENABLED"], "true");
    }

    #[tokio::test]
    async fn no_auth_provider_aborts_before_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_for(
            dir.path(),
            &[
                ("AUTH0_ENABLED", "false"),
                ("FEDERATION_ENABLED", "false"),
                ("OIDC_ENABLED", "false"),
            ],
        );

        let mut orchestrator = Orchestrator::new(env, node_fs());
        let err = orchestrator.validate().unwrap_err();

        assert!(matches!(err, StartupError::NoAuthMethodEnabled { .. }));
        assert_eq!(orchestrator.stage(), Stage::Aborted(crate::error::EXIT_NO_AUTH_METHOD));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn valid_credentials_go_straight_to_discovery() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CredentialPaths::new(dir.path());
        write_pair(&paths.certificate(), &paths.private_key(), &long_lived(DOMAIN));
        fs::write(paths.encryption_key(), ARMORED_KEY).unwrap();
        let stamps = [
            modified(&paths.certificate()),
            modified(&paths.private_key()),
            modified(paths.encryption_key()),
        ];
        let runner = FakeRunner::new().on("relational-node", |_| ok("Usage: relational-node"));

        let mut orchestrator = Orchestrator::new(env_for(dir.path(), &[]), node_fs());
        let config = orchestrator.validate().unwrap();
        let handoff = orchestrator.prepare(&config, &runner).await.unwrap();

        let programs: Vec<String> = runner.calls().iter().map(|c| c.name()).collect();
        assert_eq!(programs, vec!["relational-node"]);
        assert_eq!(
            stamps,
            [
                modified(&paths.certificate()),
                modified(&paths.private_key()),
                modified(paths.encryption_key()),
            ]
        );
        assert_eq!(handoff.plan().args, vec!["--storage-path", "/data"]);
    }

    #[tokio::test]
    async fn explicit_command_skips_discovery() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CredentialPaths::new(dir.path());
        write_pair(&paths.certificate(), &paths.private_key(), &long_lived(DOMAIN));
        fs::write(paths.encryption_key(), ARMORED_KEY).unwrap();
        let runner = FakeRunner::new();

        let mut orchestrator = Orchestrator::new(env_for(dir.path(), &[]), MemoryFs::new())
            .with_command(vec!["/bin/sh".to_string(), "-c".to_string(), "env".to_string()]);
        let config = orchestrator.validate().unwrap();
        let handoff = orchestrator.prepare(&config, &runner).await.unwrap();

        assert!(matches!(handoff, Handoff::UserCommand(_)));
        assert_eq!(handoff.plan().program, PathBuf::from("/bin/sh"));
        assert!(runner.calls().is_empty());
        assert_eq!(orchestrator.stage(), Stage::Launching);
    }

    #[tokio::test]
    async fn missing_binary_aborts_with_discovery_code() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CredentialPaths::new(dir.path());
        write_pair(&paths.certificate(), &paths.private_key(), &long_lived(DOMAIN));
        fs::write(paths.encryption_key(), ARMORED_KEY).unwrap();
        let runner = FakeRunner::new();

        let mut orchestrator = Orchestrator::new(env_for(dir.path(), &[]), MemoryFs::new());
        let config = orchestrator.validate().unwrap();
        let err = orchestrator.prepare(&config, &runner).await.unwrap_err();

        assert!(matches!(err, StartupError::BinaryNotFound { .. }));
        assert_eq!(
            orchestrator.stage(),
            Stage::Aborted(crate::error::EXIT_BINARY_NOT_FOUND)
        );
    }

    #[test]
    fn stages_display_lowercase() {
        assert_eq!(Stage::Provisioning.to_string(), "provisioning");
        assert_eq!(Stage::Aborted(30).to_string(), "aborted(30)");
    }
}
