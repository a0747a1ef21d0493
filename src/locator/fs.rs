// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Filesystem seam for binary discovery.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// The filesystem operations discovery needs.
pub trait FileSystem {
    /// Regular file (symlinks followed) with any execute bit set.
    fn is_executable(&self, path: &Path) -> bool;

    /// Real directory; symlinked directories are reported as `false` so
    /// traversal never loops.
    fn is_dir(&self, path: &Path) -> bool;

    /// Immediate children, sorted.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;
}

impl<T: FileSystem + ?Sized> FileSystem for &T {
    fn is_executable(&self, path: &Path) -> bool {
        (**self).is_executable(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        (**self).is_dir(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        (**self).read_dir(path)
    }
}

/// The real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostFs;

impl FileSystem for HostFs {
    fn is_executable(&self, path: &Path) -> bool {
        fs::metadata(path)
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }

    fn is_dir(&self, path: &Path) -> bool {
        fs::symlink_metadata(path)
            .map(|m| m.file_type().is_dir())
            .unwrap_or(false)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut entries = fs::read_dir(path)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .collect::<Vec<_>>();
        entries.sort();
        Ok(entries)
    }
}

/// In-memory tree of directories and executables (useful for testing).
#[derive(Debug, Clone, Default)]
pub struct MemoryFs {
    dirs: BTreeSet<PathBuf>,
    files: BTreeSet<PathBuf>,
    executables: BTreeSet<PathBuf>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_parents(&mut self, path: &Path) {
        for ancestor in path.ancestors().skip(1) {
            self.dirs.insert(ancestor.to_path_buf());
        }
    }

    /// Add an executable file (and its parent directories).
    pub fn with_executable(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        self.add_parents(path);
        self.files.insert(path.to_path_buf());
        self.executables.insert(path.to_path_buf());
        self
    }

    /// Add a non-executable file.
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        self.add_parents(path);
        self.files.insert(path.to_path_buf());
        self
    }

    pub fn with_dir(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        self.add_parents(path);
        self.dirs.insert(path.to_path_buf());
        self
    }
}

impl FileSystem for MemoryFs {
    fn is_executable(&self, path: &Path) -> bool {
        self.executables.contains(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.dirs.contains(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        if !self.dirs.contains(path) {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        }
        let children: BTreeSet<PathBuf> = self
            .dirs
            .iter()
            .chain(self.files.iter())
            .filter(|p| p.parent() == Some(path))
            .cloned()
            .collect();
        Ok(children.into_iter().collect())
    }
}
