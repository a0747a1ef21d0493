// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Permission-aware file writes for credential material.
//!
//! Files are written to a sibling `.tmp` path, given their final mode and
//! then renamed into place, so a reader never observes a half-written
//! credential and a failed write leaves nothing behind under the final name.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

/// Public certificates.
pub const CERT_MODE: u32 = 0o644;
/// Private keys and secrets.
pub const SECRET_MODE: u32 = 0o600;
/// GPG home.
pub const PRIVATE_DIR_MODE: u32 = 0o700;

/// Temporary sibling used while a file is being produced.
pub fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Create a directory (and parents), optionally forcing its mode.
pub fn ensure_dir(path: &Path, mode: Option<u32>) -> io::Result<()> {
    fs::create_dir_all(path)?;
    if let Some(mode) = mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    Ok(())
}

/// Atomically write `contents` to `path` with `mode`.
pub fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let staged = staging_path(path);
    let result = (|| {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(&staged)?;
        file.write_all(contents)?;
        file.sync_all()?;
        drop(file);
        promote(&staged, path, mode)
    })();
    if result.is_err() {
        discard(&[&staged]);
    }
    result
}

/// Give a staged file its final mode and move it over `dest`.
pub fn promote(staged: &Path, dest: &Path, mode: u32) -> io::Result<()> {
    // The open mode is filtered by the umask; set it explicitly.
    fs::set_permissions(staged, fs::Permissions::from_mode(mode))?;
    fs::rename(staged, dest)
}

/// Best-effort removal of leftovers.
pub fn discard(paths: &[&Path]) {
    for path in paths {
        let _ = fs::remove_file(path);
    }
}

/// Permission bits of an existing file.
pub fn mode_of(path: &Path) -> io::Result<u32> {
    Ok(fs::metadata(path)?.permissions().mode() & 0o777)
}
