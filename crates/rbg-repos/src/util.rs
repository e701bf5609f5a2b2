// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use crate::error::RepositoryResult;

/// Ensure `dir` exists, creating it (mode 0700) if it doesn't.
///
/// Returns whether the directory was created by this call.
pub(crate) fn ensure_dir(dir: &Path) -> RepositoryResult<bool> {
    if dir.exists() {
        Ok(false)
    } else {
        DirBuilder::new().mode(0o700).create(dir)?;
        Ok(true)
    }
}

/// Return the absolute path of the running executable.
pub(crate) fn exe_path() -> RepositoryResult<PathBuf> {
    Ok(std::env::current_exe()?)
}
