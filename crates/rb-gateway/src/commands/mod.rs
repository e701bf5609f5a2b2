// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

pub mod reinstall_hooks;
pub mod serve;
pub mod trigger_webhooks;

use std::path::Path;

use tracing::error;

use rbg_config::Config;
use rbg_repos::Repository;

/// Install hooks for all repositories in the configuration.
///
/// Failures are logged per repository; the collected errors are returned so
/// that callers can decide whether they are fatal.
pub(crate) fn install_all_hooks(config: &Config, config_path: &Path, force: bool) -> usize {
    let mut failures = 0;

    for repository in config.repositories.values() {
        if let Err(err) = repository.install_hooks(config_path, force) {
            error!(
                "An error occurred while installing hooks for repository \"{}\": {}",
                repository.name(),
                err
            );
            failures += 1;
        }
    }

    failures
}
