// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;
use tracing::error;

use relational_launcher::config::EnvSnapshot;
use relational_launcher::locator::HostFs;
use relational_launcher::logging;
use relational_launcher::orchestrator::Orchestrator;
use relational_launcher::tools::SystemRunner;

/// Container entrypoint for the Relational node.
///
/// Validates the environment, provisions TLS and encryption credentials,
/// locates the node binary and replaces itself with it.
#[derive(Parser, Debug)]
#[command(name = "relational-launcher", version, about, long_about = None)]
struct Cli {
    /// Run every stage but print the launch plan instead of executing it
    #[arg(long, conflicts_with = "validate_only")]
    dry_run: bool,

    /// Stop after validation and print the resolved configuration
    #[arg(long)]
    validate_only: bool,

    /// Command to run instead of the discovered node binary
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn print_json<T: Serialize>(value: &T) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Failed to render output");
            ExitCode::FAILURE
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let env = EnvSnapshot::capture();
    logging::init(&env);

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
    let mut orchestrator = Orchestrator::new(env, HostFs)
        .with_cwd(cwd)
        .with_command(cli.command);

    let config = match orchestrator.validate() {
        Ok(config) => config,
        Err(e) => return ExitCode::from(e.exit_code()),
    };
    if cli.validate_only {
        return print_json(&config.summary());
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    let runner = SystemRunner::new(config.tool_timeout);
    let prepared = runtime.block_on(orchestrator.prepare(&config, &runner));
    // Nothing may outlive the runtime into the new process image.
    drop(runtime);

    let handoff = match prepared {
        Ok(handoff) => handoff,
        Err(e) => return ExitCode::from(e.exit_code()),
    };
    if cli.dry_run {
        return print_json(&handoff.summary());
    }

    let err = handoff.exec();
    error!(
        error_code = err.error_code(),
        exit_code = err.exit_code(),
        error = %err,
        "Launch failed"
    );
    ExitCode::from(err.exit_code())
}
