// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Binary Discovery
//!
//! The node binary ships inside an externally built image, so its install
//! location is not fixed. Strategies are tried in this order and the first
//! hit wins:
//!
//! 1. Fixed executable directories (`/usr/local/bin`, `/usr/bin`, ...)
//! 2. The captured `PATH`
//! 3. Bounded search of common install roots (`/opt`, `/app`, ...)
//! 4. The working directory
//! 5. Deep search from `/`, skipping virtual and transient mounts
//! 6. Alternate executable names on `PATH`
//! 7. `NODE_BINARY_PATH`, or delegation to a fallback entrypoint script
//!
//! Roots, depths and exclusions live in [`SearchConfig`] so the whole search
//! can run against an in-memory [`MemoryFs`].

pub mod fs;

use std::collections::VecDeque;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::BINARY_PATH_ENV;
use crate::error::StartupError;

pub use fs::{FileSystem, HostFs, MemoryFs};

/// Conventional entrypoint script shipped by the node image.
pub const FALLBACK_ENTRYPOINT: &str = "/usr/local/bin/docker-entrypoint.sh";

/// Discovery roots and bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchConfig {
    pub fixed_dirs: Vec<PathBuf>,
    pub install_dirs: Vec<PathBuf>,
    pub install_depth: usize,
    pub deep_root: PathBuf,
    pub deep_depth: usize,
    /// Never descended into by tree searches.
    pub excluded: Vec<PathBuf>,
    pub alternate_names: Vec<String>,
    pub fallback_entrypoint: PathBuf,
}

impl Default for SearchConfig {
    fn default() -> Self {
        let paths = |list: &[&str]| -> Vec<PathBuf> { list.iter().map(PathBuf::from).collect() };
        Self {
            fixed_dirs: paths(&[
                "/usr/local/bin",
                "/usr/bin",
                "/bin",
                "/usr/local/sbin",
                "/usr/sbin",
                "/app",
            ]),
            install_dirs: paths(&["/opt", "/app", "/srv", "/usr/local", "/home"]),
            install_depth: 3,
            deep_root: PathBuf::from("/"),
            deep_depth: 6,
            excluded: paths(&["/proc", "/sys", "/dev", "/tmp", "/run", "/var/run", "/var/tmp"]),
            alternate_names: vec![
                "relational".to_string(),
                "node-server".to_string(),
                "server".to_string(),
            ],
            fallback_entrypoint: PathBuf::from(FALLBACK_ENTRYPOINT),
        }
    }
}

/// Discovery strategies, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    FixedPath,
    SearchPath,
    InstallDirs,
    WorkingDirectory,
    DeepSearch,
    AlternateNames,
    Override,
    FallbackEntrypoint,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::FixedPath => write!(f, "fixed path"),
            Strategy::SearchPath => write!(f, "PATH"),
            Strategy::InstallDirs => write!(f, "install directories"),
            Strategy::WorkingDirectory => write!(f, "working directory"),
            Strategy::DeepSearch => write!(f, "filesystem search"),
            Strategy::AlternateNames => write!(f, "alternate names"),
            Strategy::Override => write!(f, "override"),
            Strategy::FallbackEntrypoint => write!(f, "fallback entrypoint"),
        }
    }
}

/// Result of discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// Launch this executable with assembled arguments.
    Binary { path: PathBuf, strategy: Strategy },
    /// Hand the whole startup over to the image's own entrypoint.
    Delegate { script: PathBuf },
}

/// Inputs that vary per run.
#[derive(Debug, Clone, Copy)]
pub struct LocateRequest<'a> {
    pub name: &'a str,
    pub search_path: Option<&'a OsStr>,
    pub cwd: &'a Path,
    pub override_path: Option<&'a Path>,
}

pub struct BinaryLocator<F> {
    fs: F,
    search: SearchConfig,
}

impl<F: FileSystem> BinaryLocator<F> {
    pub fn new(fs: F, search: SearchConfig) -> Self {
        Self { fs, search }
    }

    /// Run the strategies in order.
    ///
    /// # Errors
    /// `BinaryNotFound` listing every strategy attempted.
    pub fn locate(&self, request: &LocateRequest<'_>) -> Result<Location, StartupError> {
        let name = request.name;
        let mut attempted = Vec::new();

        let found = |path: PathBuf, strategy: Strategy| {
            info!(path = %path.display(), strategy = %strategy, "Located binary");
            Ok(Location::Binary { path, strategy })
        };

        // 1. fixed directories
        if let Some(path) = self.first_in(&self.search.fixed_dirs, name) {
            return found(path, Strategy::FixedPath);
        }
        attempted.push(format!("{} ({})", Strategy::FixedPath, display_list(&self.search.fixed_dirs)));

        // 2. PATH
        let path_dirs = split_search_path(request.search_path);
        if let Some(path) = self.first_in(&path_dirs, name) {
            return found(path, Strategy::SearchPath);
        }
        attempted.push(format!("{} ({})", Strategy::SearchPath, display_list(&path_dirs)));

        // 3. install roots
        for root in &self.search.install_dirs {
            if let Some(path) = self.search_tree(root, name, self.search.install_depth) {
                return found(path, Strategy::InstallDirs);
            }
        }
        attempted.push(format!(
            "{} ({}, depth {})",
            Strategy::InstallDirs,
            display_list(&self.search.install_dirs),
            self.search.install_depth
        ));

        // 4. working directory
        let local = request.cwd.join(name);
        if self.fs.is_executable(&local) {
            return found(local, Strategy::WorkingDirectory);
        }
        attempted.push(format!("{} ({})", Strategy::WorkingDirectory, request.cwd.display()));

        // 5. deep search
        if let Some(path) = self.search_tree(&self.search.deep_root, name, self.search.deep_depth) {
            return found(path, Strategy::DeepSearch);
        }
        attempted.push(format!(
            "{} ({}, depth {}, excluding {})",
            Strategy::DeepSearch,
            self.search.deep_root.display(),
            self.search.deep_depth,
            display_list(&self.search.excluded)
        ));

        // 6. alternate names
        for alternate in &self.search.alternate_names {
            if let Some(path) = self.first_in(&path_dirs, alternate) {
                return found(path, Strategy::AlternateNames);
            }
        }
        attempted.push(format!(
            "{} ({})",
            Strategy::AlternateNames,
            self.search.alternate_names.join(", ")
        ));

        // 7. override, then fallback entrypoint
        match request.override_path {
            Some(path) if self.fs.is_executable(path) => {
                return found(path.to_path_buf(), Strategy::Override);
            }
            Some(path) => {
                warn!(
                    variable = BINARY_PATH_ENV,
                    path = %path.display(),
                    "Override is not an executable file"
                );
                attempted.push(format!("{BINARY_PATH_ENV} ({})", path.display()));
            }
            None => attempted.push(format!("{BINARY_PATH_ENV} (unset)")),
        }

        let script = &self.search.fallback_entrypoint;
        if self.fs.is_executable(script) {
            warn!(
                script = %script.display(),
                "Node binary not found, delegating to fallback entrypoint"
            );
            return Ok(Location::Delegate {
                script: script.clone(),
            });
        }
        attempted.push(format!("{} ({})", Strategy::FallbackEntrypoint, script.display()));

        Err(StartupError::BinaryNotFound {
            name: name.to_string(),
            attempted,
        })
    }

    fn first_in(&self, dirs: &[PathBuf], name: &str) -> Option<PathBuf> {
        dirs.iter()
            .map(|dir| dir.join(name))
            .find(|candidate| self.fs.is_executable(candidate))
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.search.excluded.iter().any(|ex| path == ex)
    }

    /// Breadth-first search for an executable called `name` at most
    /// `max_depth` levels below `root`.
    fn search_tree(&self, root: &Path, name: &str, max_depth: usize) -> Option<PathBuf> {
        if max_depth == 0 || self.is_excluded(root) || !self.fs.is_dir(root) {
            return None;
        }
        debug!(root = %root.display(), depth = max_depth, "Searching for binary");

        let mut queue = VecDeque::from([(root.to_path_buf(), 1usize)]);
        while let Some((dir, depth)) = queue.pop_front() {
            let Ok(entries) = self.fs.read_dir(&dir) else {
                continue;
            };
            for entry in entries {
                if self.is_excluded(&entry) {
                    continue;
                }
                if entry.file_name() == Some(OsStr::new(name)) && self.fs.is_executable(&entry) {
                    return Some(entry);
                }
                if depth < max_depth && self.fs.is_dir(&entry) {
                    queue.push_back((entry, depth + 1));
                }
            }
        }
        None
    }
}

fn split_search_path(search_path: Option<&OsStr>) -> Vec<PathBuf> {
    search_path
        .map(|p| {
            std::env::split_paths(p)
                .filter(|dir| !dir.as_os_str().is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn display_list(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "none".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use super::*;

    const NAME: &str = "relational-node";

    fn request<'a>(path: Option<&'a OsStr>, override_path: Option<&'a Path>) -> LocateRequest<'a> {
        LocateRequest {
            name: NAME,
            search_path: path,
            cwd: Path::new("/workdir"),
            override_path,
        }
    }

    fn locate(fs: MemoryFs, req: &LocateRequest<'_>) -> Result<Location, StartupError> {
        BinaryLocator::new(fs, SearchConfig::default()).locate(req)
    }

    fn strategy_of(location: Location) -> (PathBuf, Strategy) {
        match location {
            Location::Binary { path, strategy } => (path, strategy),
            other => panic!("expected a binary, got {other:?}"),
        }
    }

    #[test]
    fn fixed_path_beats_deep_search() {
        let fs = MemoryFs::new()
            .with_executable("/usr/local/bin/relational-node")
            .with_executable("/var/lib/relational/relational-node");

        let (path, strategy) = strategy_of(locate(fs, &request(None, None)).unwrap());
        assert_eq!(path, PathBuf::from("/usr/local/bin/relational-node"));
        assert_eq!(strategy, Strategy::FixedPath);
    }

    #[test]
    fn search_path_is_consulted_in_order() {
        let fs = MemoryFs::new()
            .with_executable("/custom/a/relational-node")
            .with_executable("/custom/b/relational-node");
        let path = OsString::from("/custom/b::/custom/a");

        let (found, strategy) = strategy_of(locate(fs, &request(Some(&path), None)).unwrap());
        assert_eq!(found, PathBuf::from("/custom/b/relational-node"));
        assert_eq!(strategy, Strategy::SearchPath);
    }

    #[test]
    fn install_dirs_are_searched_within_depth() {
        let fs = MemoryFs::new().with_executable("/opt/relational/bin/relational-node");
        let (found, strategy) = strategy_of(locate(fs, &request(None, None)).unwrap());
        assert_eq!(found, PathBuf::from("/opt/relational/bin/relational-node"));
        assert_eq!(strategy, Strategy::InstallDirs);
    }

    #[test]
    fn install_search_respects_depth_then_deep_search_finds_it() {
        // Four levels below /opt: beyond the install depth of 3.
        let fs = MemoryFs::new().with_executable("/opt/a/b/c/relational-node");
        let (found, strategy) = strategy_of(locate(fs, &request(None, None)).unwrap());
        assert_eq!(found, PathBuf::from("/opt/a/b/c/relational-node"));
        assert_eq!(strategy, Strategy::DeepSearch);
    }

    #[test]
    fn working_directory_precedes_deep_search() {
        let fs = MemoryFs::new()
            .with_executable("/workdir/relational-node")
            .with_executable("/var/lib/relational-node");
        let (found, strategy) = strategy_of(locate(fs, &request(None, None)).unwrap());
        assert_eq!(found, PathBuf::from("/workdir/relational-node"));
        assert_eq!(strategy, Strategy::WorkingDirectory);
    }

    #[test]
    fn deep_search_skips_excluded_mounts_and_non_executables() {
        let fs = MemoryFs::new()
            .with_executable("/proc/1/root/relational-node")
            .with_executable("/tmp/relational-node")
            .with_file("/etc/relational-node")
            .with_executable("/var/lib/node/relational-node");
        let (found, strategy) = strategy_of(locate(fs, &request(None, None)).unwrap());
        assert_eq!(found, PathBuf::from("/var/lib/node/relational-node"));
        assert_eq!(strategy, Strategy::DeepSearch);
    }

    #[test]
    fn alternate_names_use_search_path() {
        let fs = MemoryFs::new().with_executable("/custom/node-server");
        let path = OsString::from("/custom");
        let (found, strategy) = strategy_of(locate(fs, &request(Some(&path), None)).unwrap());
        assert_eq!(found, PathBuf::from("/custom/node-server"));
        assert_eq!(strategy, Strategy::AlternateNames);
    }

    #[test]
    fn override_is_last_resort_before_fallback() {
        let fs = MemoryFs::new()
            .with_executable("/srv/custom-build")
            .with_executable(FALLBACK_ENTRYPOINT);
        let over = Path::new("/srv/custom-build");
        let (found, strategy) = strategy_of(locate(fs, &request(None, Some(over))).unwrap());
        assert_eq!(found, PathBuf::from("/srv/custom-build"));
        assert_eq!(strategy, Strategy::Override);
    }

    #[test]
    fn fallback_entrypoint_is_delegated_to() {
        let fs = MemoryFs::new().with_executable(FALLBACK_ENTRYPOINT);
        let over = Path::new("/missing/binary");
        let location = locate(fs, &request(None, Some(over))).unwrap();
        assert_eq!(
            location,
            Location::Delegate {
                script: PathBuf::from(FALLBACK_ENTRYPOINT)
            }
        );
    }

    #[test]
    fn not_found_lists_every_strategy() {
        let err = locate(MemoryFs::new(), &request(None, None)).unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_BINARY_NOT_FOUND);
        match err {
            StartupError::BinaryNotFound { name, attempted } => {
                assert_eq!(name, NAME);
                assert_eq!(attempted.len(), 8);
                assert!(attempted[0].starts_with("fixed path"));
                assert!(attempted[4].contains("excluding /proc"));
                assert!(attempted[6].contains("NODE_BINARY_PATH (unset)"));
                assert!(attempted[7].starts_with("fallback entrypoint"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
