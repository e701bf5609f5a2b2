// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The `reinstall-hooks` command: force-reinstall the webhook trigger
//! scripts in every configured repository.

use std::path::Path;

use anyhow::{bail, Context};

use rbg_config::Config;

use super::install_all_hooks;

pub fn run(config_path: &Path) -> anyhow::Result<()> {
    let config = Config::load(config_path).context("Could not parse configuration")?;

    let failures = install_all_hooks(&config, config_path, true);

    if failures != 0 {
        bail!("Could not install hooks in {} repositories", failures);
    }

    Ok(())
}
