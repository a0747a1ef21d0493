// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relational Launcher - Container Entrypoint for the Relational Node
//!
//! Validates the container environment, makes sure TLS and encryption
//! credentials exist, finds the node executable and replaces the current
//! process with it.
//!
//! ## Modules
//!
//! - `config` - Environment snapshot and recognized variables
//! - `validator` - Required settings and auth provider validation
//! - `credentials` - TLS pair and GPG key provisioning
//! - `locator` - Ordered node binary discovery
//! - `launcher` - Argument assembly, key flag probing and `exec`
//! - `orchestrator` - Stage sequencing
//! - `tools` - Bounded external tool invocation
//! - `logging` - Stderr diagnostics

pub mod config;
pub mod credentials;
pub mod error;
pub mod launcher;
pub mod locator;
pub mod logging;
pub mod orchestrator;
pub mod tools;
pub mod validator;
